// audit2rollup-config - Runtime configuration for the rollup and forwarder handlers
//
// Supports configuration from multiple sources:
// 1. Environment variables (highest priority; AUDIT2ROLLUP_* then legacy names)
// 2. Config file path from AUDIT2ROLLUP_CONFIG env var
// 3. Config file contents from AUDIT2ROLLUP_CONFIG_CONTENT env var
// 4. Default config file location (./audit2rollup.toml)
// 5. Built-in defaults (lowest priority)

use anyhow::Result;
use audit2rollup_core::rules::default_column_rules;
use audit2rollup_core::{AggregationRules, ColumnRule, RollupOptions, UnmappedColumnPolicy};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod env_overrides;
mod sources;
mod validation;

pub use env_overrides::{EnvSource, ENV_PREFIX};
pub use sources::{load_with_env, StdEnvSource};

pub const DEFAULT_ACCUMULATOR_KEY: &str = "accumulator/events.parquet";
pub const DEFAULT_SNAPSHOT_PREFIX: &str = "rollups/";
pub const DEFAULT_REGION: &str = "us-east-1";

/// Main runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub target: TargetConfig,

    #[serde(default)]
    pub aggregation: AggregationConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forward: Option<ForwardConfig>,
}

/// Cross-account bucket holding the raw event files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Used when the inbound message does not name a bucket
    #[serde(default)]
    pub bucket: String,
    /// Role assumed before reading; ambient credentials when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_arn: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            role_arn: None,
            region: default_region(),
            endpoint: None,
        }
    }
}

/// Destination bucket for the accumulator and rollup snapshots
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    #[serde(default)]
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default = "default_accumulator_key")]
    pub accumulator_key: String,
    #[serde(default = "default_snapshot_prefix")]
    pub snapshot_prefix: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: default_region(),
            endpoint: None,
            accumulator_key: default_accumulator_key(),
            snapshot_prefix: default_snapshot_prefix(),
        }
    }
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

fn default_accumulator_key() -> String {
    DEFAULT_ACCUMULATOR_KEY.to_string()
}

fn default_snapshot_prefix() -> String {
    DEFAULT_SNAPSHOT_PREFIX.to_string()
}

/// Resampling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    #[serde(default = "default_time_column")]
    pub time_column: String,
    #[serde(default = "default_bucket_width_secs")]
    pub bucket_width_secs: u64,
    #[serde(default)]
    pub unmapped_columns: UnmappedColumnPolicy,
    #[serde(default = "default_column_rules")]
    pub rules: Vec<ColumnRule>,
    /// CSV field delimiter (single ASCII character)
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
}

fn default_time_column() -> String {
    audit2rollup_core::DEFAULT_TIME_COLUMN.to_string()
}

fn default_bucket_width_secs() -> u64 {
    audit2rollup_core::DEFAULT_BUCKET_WIDTH.as_secs()
}

fn default_delimiter() -> char {
    ','
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            time_column: default_time_column(),
            bucket_width_secs: default_bucket_width_secs(),
            unmapped_columns: UnmappedColumnPolicy::default(),
            rules: default_column_rules(),
            delimiter: default_delimiter(),
        }
    }
}

impl AggregationConfig {
    pub fn bucket_width(&self) -> Duration {
        Duration::from_secs(self.bucket_width_secs)
    }

    pub fn rules(&self) -> AggregationRules {
        AggregationRules::new(self.rules.clone(), self.unmapped_columns)
    }

    pub fn rollup_options(&self) -> RollupOptions {
        RollupOptions {
            time_column: self.time_column.clone(),
            bucket_width: self.bucket_width(),
            rules: self.rules(),
        }
    }
}

/// What happens when one object of a batch cannot be fetched or decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectErrorPolicy {
    /// Fail the invocation; nothing is written
    #[default]
    Abort,
    /// Skip the object, leave it out of the ledger, keep going
    Quarantine,
}

impl std::fmt::Display for ObjectErrorPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectErrorPolicy::Abort => write!(f, "abort"),
            ObjectErrorPolicy::Quarantine => write!(f, "quarantine"),
        }
    }
}

impl std::str::FromStr for ObjectErrorPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "abort" | "fail" => Ok(ObjectErrorPolicy::Abort),
            "quarantine" | "skip" => Ok(ObjectErrorPolicy::Quarantine),
            _ => anyhow::bail!(
                "Unsupported object error policy: {}. Supported: abort, quarantine",
                s
            ),
        }
    }
}

/// Invocation pipeline tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
    #[serde(default)]
    pub on_object_error: ObjectErrorPolicy,
    #[serde(default = "default_skip_processed")]
    pub skip_processed_objects: bool,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_max_concurrent_fetches() -> usize {
    8
}

fn default_skip_processed() -> bool {
    true
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: default_max_concurrent_fetches(),
            on_object_error: ObjectErrorPolicy::default(),
            skip_processed_objects: default_skip_processed(),
            retry: RetryConfig::default(),
        }
    }
}

/// Backoff for destination writes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

/// Object forwarder: own-account upload bucket → cross-account bucket
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForwardConfig {
    /// Own-account bucket; falls back to the bucket named in the event
    #[serde(default)]
    pub source_bucket: String,
    #[serde(default)]
    pub target_bucket: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_arn: Option<String>,
    /// Prepended verbatim to the uploaded object key
    #[serde(default)]
    pub prefix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl RuntimeConfig {
    /// Load configuration from all sources with priority
    pub fn load() -> Result<Self> {
        sources::load_config()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }
}
