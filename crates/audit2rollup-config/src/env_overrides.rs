use super::{ForwardConfig, LogFormat, ObjectErrorPolicy, RuntimeConfig};
use anyhow::{anyhow, Context, Result};
use audit2rollup_core::{ColumnRule, Reduction, UnmappedColumnPolicy};

pub const ENV_PREFIX: &str = "AUDIT2ROLLUP_";

/// Abstraction over environment-variable lookups so tests can supply their own
/// source of overrides.
pub trait EnvSource {
    fn get(&self, key: &str) -> Option<String>;

    /// Get an environment variable WITHOUT the AUDIT2ROLLUP_ prefix
    /// Used for the legacy deployment variables and AWS_REGION
    fn get_raw(&self, key: &str) -> Option<String>;
}

/// Apply environment-variable overrides (highest priority) to the runtime config.
///
/// Legacy unprefixed variables are applied first so prefixed ones win.
pub fn apply_env_overrides<E: EnvSource>(config: &mut RuntimeConfig, env: &E) -> Result<()> {
    apply_legacy_overrides(config, env);

    // Source bucket
    if let Some(bucket) = get_env_string(env, "SOURCE_BUCKET") {
        config.source.bucket = bucket;
    }
    if let Some(role) = get_env_string(env, "SOURCE_ROLE_ARN") {
        config.source.role_arn = non_empty(role);
    }
    if let Some(region) = get_env_string(env, "SOURCE_REGION") {
        config.source.region = region;
    }
    if let Some(endpoint) = get_env_string(env, "SOURCE_ENDPOINT") {
        config.source.endpoint = non_empty(endpoint);
    }

    // Target bucket
    if let Some(bucket) = get_env_string(env, "TARGET_BUCKET") {
        config.target.bucket = bucket;
    }
    if let Some(region) = get_env_string(env, "TARGET_REGION") {
        config.target.region = region;
    }
    if let Some(endpoint) = get_env_string(env, "TARGET_ENDPOINT") {
        config.target.endpoint = non_empty(endpoint);
    }
    if let Some(key) = get_env_string(env, "ACCUMULATOR_KEY") {
        config.target.accumulator_key = key;
    }
    if let Some(prefix) = get_env_string(env, "SNAPSHOT_PREFIX") {
        config.target.snapshot_prefix = prefix;
    }

    // Aggregation
    if let Some(column) = get_env_string(env, "TIME_COLUMN") {
        config.aggregation.time_column = column;
    }
    if let Some(val) = get_env_u64(env, "BUCKET_WIDTH_SECS")? {
        config.aggregation.bucket_width_secs = val;
    }
    if let Some(policy) = get_env_string(env, "UNMAPPED_COLUMNS") {
        config.aggregation.unmapped_columns = policy
            .parse::<UnmappedColumnPolicy>()
            .map_err(|e| anyhow!(e))
            .context("Invalid AUDIT2ROLLUP_UNMAPPED_COLUMNS value")?;
    }
    if let Some(rules) = get_env_string(env, "AGGREGATION_RULES") {
        config.aggregation.rules =
            parse_rules(&rules).context("Invalid AUDIT2ROLLUP_AGGREGATION_RULES value")?;
    }
    if let Some(delimiter) = get_env_string(env, "CSV_DELIMITER") {
        let mut chars = delimiter.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => config.aggregation.delimiter = c,
            _ => anyhow::bail!(
                "Failed to parse {}CSV_DELIMITER: expected a single character",
                ENV_PREFIX
            ),
        }
    }

    // Pipeline
    if let Some(val) = get_env_usize(env, "MAX_CONCURRENT_FETCHES")? {
        config.pipeline.max_concurrent_fetches = val;
    }
    if let Some(policy) = get_env_string(env, "ON_OBJECT_ERROR") {
        config.pipeline.on_object_error = policy
            .parse::<ObjectErrorPolicy>()
            .context("Invalid AUDIT2ROLLUP_ON_OBJECT_ERROR value")?;
    }
    if let Some(val) = get_env_bool(env, "SKIP_PROCESSED_OBJECTS")? {
        config.pipeline.skip_processed_objects = val;
    }
    if let Some(val) = get_env_u32(env, "PERSIST_MAX_ATTEMPTS")? {
        config.pipeline.retry.max_attempts = val;
    }
    if let Some(val) = get_env_u64(env, "PERSIST_BASE_DELAY_MS")? {
        config.pipeline.retry.base_delay_ms = val;
    }
    if let Some(val) = get_env_u64(env, "PERSIST_MAX_DELAY_MS")? {
        config.pipeline.retry.max_delay_ms = val;
    }

    // Logging
    if let Some(level) = get_env_string(env, "LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(format) = get_env_string(env, "LOG_FORMAT") {
        config.logging.format = match format.to_lowercase().as_str() {
            "text" => LogFormat::Text,
            _ => LogFormat::Json,
        };
    }

    // Forwarder
    if let Some(bucket) = get_env_string(env, "FORWARD_SOURCE_BUCKET") {
        ensure_forward(config).source_bucket = bucket;
    }
    if let Some(bucket) = get_env_string(env, "FORWARD_TARGET_BUCKET") {
        ensure_forward(config).target_bucket = bucket;
    }
    if let Some(role) = get_env_string(env, "FORWARD_ROLE_ARN") {
        ensure_forward(config).role_arn = non_empty(role);
    }
    if let Some(prefix) = get_env_string(env, "FORWARD_PREFIX") {
        ensure_forward(config).prefix = prefix;
    }

    Ok(())
}

/// Variable names used by earlier deployments of the two handlers.
///
/// `TARGET_S3_BUCKET_ROLE` / `TARGET_S3_PREFIX` mark a forwarder deployment:
/// there the target bucket is the cross-account forward destination and the
/// source bucket is the own-account upload bucket.
fn apply_legacy_overrides<E: EnvSource>(config: &mut RuntimeConfig, env: &E) {
    if let Some(region) = get_raw_env_string(env, "AWS_REGION") {
        config.source.region = region.clone();
        config.target.region = region;
    }

    let source_bucket = get_raw_env_string(env, "SOURCE_S3_BUCKET");
    let target_bucket = get_raw_env_string(env, "TARGET_S3_BUCKET");

    if let Some(ref bucket) = source_bucket {
        config.source.bucket = bucket.clone();
    }
    if let Some(role) = get_raw_env_string(env, "SOURCE_S3_BUCKET_ROLE") {
        config.source.role_arn = non_empty(role);
    }
    if let Some(ref bucket) = target_bucket {
        config.target.bucket = bucket.clone();
    }

    let forward_role = get_raw_env_string(env, "TARGET_S3_BUCKET_ROLE");
    let forward_prefix = get_raw_env_string(env, "TARGET_S3_PREFIX");
    if forward_role.is_none() && forward_prefix.is_none() {
        return;
    }

    let forward = ensure_forward(config);
    if let Some(role) = forward_role {
        forward.role_arn = non_empty(role);
    }
    if let Some(prefix) = forward_prefix {
        forward.prefix = prefix;
    }
    if forward.source_bucket.is_empty() {
        if let Some(bucket) = source_bucket {
            forward.source_bucket = bucket;
        }
    }
    if forward.target_bucket.is_empty() {
        if let Some(bucket) = target_bucket {
            forward.target_bucket = bucket;
        }
    }
}

/// Parse `column=reduction` pairs separated by commas
pub fn parse_rules(value: &str) -> Result<Vec<ColumnRule>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (column, reduction) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("expected column=reduction, got '{}'", pair))?;
            let reduction = reduction
                .trim()
                .parse::<Reduction>()
                .map_err(|e| anyhow!(e))?;
            Ok(ColumnRule::new(column.trim(), reduction))
        })
        .collect()
}

fn ensure_forward(config: &mut RuntimeConfig) -> &mut ForwardConfig {
    config.forward.get_or_insert_with(ForwardConfig::default)
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

fn get_env_string<E: EnvSource>(env: &E, key: &str) -> Option<String> {
    env.get(key)
}

/// Get a raw environment variable without the AUDIT2ROLLUP_ prefix
fn get_raw_env_string<E: EnvSource>(env: &E, key: &str) -> Option<String> {
    env.get_raw(key)
}

fn get_env_usize<E: EnvSource>(env: &E, key: &str) -> Result<Option<usize>> {
    match get_env_string(env, key) {
        Some(val) => {
            let parsed = val
                .parse::<usize>()
                .map_err(|e| anyhow!("Failed to parse {}{}: {}", ENV_PREFIX, key, e))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

fn get_env_u64<E: EnvSource>(env: &E, key: &str) -> Result<Option<u64>> {
    match get_env_string(env, key) {
        Some(val) => {
            let parsed = val
                .parse::<u64>()
                .map_err(|e| anyhow!("Failed to parse {}{}: {}", ENV_PREFIX, key, e))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

fn get_env_u32<E: EnvSource>(env: &E, key: &str) -> Result<Option<u32>> {
    match get_env_string(env, key) {
        Some(val) => {
            let parsed = val
                .parse::<u32>()
                .map_err(|e| anyhow!("Failed to parse {}{}: {}", ENV_PREFIX, key, e))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

fn get_env_bool<E: EnvSource>(env: &E, key: &str) -> Result<Option<bool>> {
    match get_env_string(env, key) {
        Some(val) => {
            let parsed = val.parse::<bool>().map_err(|e| {
                anyhow!(
                    "Failed to parse {}{} (expected bool): {}",
                    ENV_PREFIX,
                    key,
                    e
                )
            })?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}
