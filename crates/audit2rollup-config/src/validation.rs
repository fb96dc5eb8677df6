// Configuration validation
//
// Validates that required fields are present and values are sensible

use crate::*;
use audit2rollup_core::{ColumnRule, UnmappedColumnPolicy};
use anyhow::{bail, Result};
use tracing::warn;

pub fn validate_config(config: &RuntimeConfig) -> Result<()> {
    if config.target.bucket.is_empty() && config.forward.is_none() {
        bail!("target.bucket is required (or configure a forward section)");
    }

    if !config.target.bucket.is_empty() {
        validate_target_config(&config.target)?;
        if config.source.bucket.is_empty() {
            warn!("source.bucket is empty; every message must name its s3_bucket");
        }
        if config.source.role_arn.is_none() {
            warn!("source.role_arn is not set; source objects are read with ambient credentials");
        }
    }

    validate_aggregation_config(&config.aggregation)?;
    validate_pipeline_config(&config.pipeline)?;

    if let Some(ref forward) = config.forward {
        validate_forward_config(forward)?;
    }

    Ok(())
}

fn validate_target_config(config: &TargetConfig) -> Result<()> {
    if config.accumulator_key.is_empty() || config.accumulator_key.ends_with('/') {
        bail!("target.accumulator_key must name an object, got '{}'", config.accumulator_key);
    }

    if config.snapshot_prefix.starts_with('/') {
        warn!(
            snapshot_prefix = %config.snapshot_prefix,
            "target.snapshot_prefix starts with '/'; keys will contain an empty path segment"
        );
    }

    if !config.snapshot_prefix.is_empty()
        && config.accumulator_key.starts_with(&config.snapshot_prefix)
    {
        bail!("target.accumulator_key must not live under target.snapshot_prefix");
    }

    Ok(())
}

fn validate_aggregation_config(config: &AggregationConfig) -> Result<()> {
    if config.time_column.is_empty() {
        bail!("aggregation.time_column must not be empty");
    }

    if config.bucket_width_secs == 0 {
        bail!("aggregation.bucket_width_secs must be greater than 0");
    }

    if !config.delimiter.is_ascii() {
        bail!("aggregation.delimiter must be a single ASCII character");
    }

    for rule in &config.rules {
        if rule.column.is_empty() {
            bail!("aggregation.rules entries must name a column");
        }
        if rule.column == config.time_column {
            bail!(
                "aggregation.rules must not aggregate the time column '{}'",
                config.time_column
            );
        }
    }

    if config.rules.is_empty() && config.unmapped_columns == UnmappedColumnPolicy::Drop {
        warn!("aggregation.rules is empty and unmapped columns are dropped; rollups will only hold bucket starts");
    }

    Ok(())
}

fn validate_pipeline_config(config: &PipelineConfig) -> Result<()> {
    if config.max_concurrent_fetches == 0 {
        bail!("pipeline.max_concurrent_fetches must be greater than 0");
    }

    if config.max_concurrent_fetches > 64 {
        warn!(
            max_concurrent_fetches = config.max_concurrent_fetches,
            "pipeline.max_concurrent_fetches is very large; may exhaust memory"
        );
    }

    if config.retry.max_attempts == 0 {
        bail!("pipeline.retry.max_attempts must be greater than 0");
    }

    if config.retry.base_delay_ms > config.retry.max_delay_ms {
        bail!("pipeline.retry.base_delay_ms must not exceed pipeline.retry.max_delay_ms");
    }

    Ok(())
}

fn validate_forward_config(config: &ForwardConfig) -> Result<()> {
    if config.target_bucket.is_empty() {
        bail!("forward.target_bucket is required when forwarding is configured");
    }

    if config.role_arn.is_none() {
        warn!("forward.role_arn is not set; forwarded objects are written with ambient credentials");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> RuntimeConfig {
        let mut config = RuntimeConfig::default();
        config.target.bucket = "rollups".to_string();
        config.source.bucket = "events".to_string();
        config
    }

    #[test]
    fn test_valid_config() {
        assert!(validate_config(&valid()).is_ok());
    }

    #[test]
    fn test_target_bucket_required() {
        assert!(validate_config(&RuntimeConfig::default()).is_err());

        let mut forward_only = RuntimeConfig::default();
        forward_only.forward = Some(ForwardConfig {
            target_bucket: "partner".to_string(),
            ..Default::default()
        });
        assert!(validate_config(&forward_only).is_ok());
    }

    #[test]
    fn test_validate_aggregation_config() {
        let mut config = valid();
        config.aggregation.bucket_width_secs = 0;
        assert!(validate_config(&config).is_err());

        let mut config = valid();
        config.aggregation.rules.push(ColumnRule::new(
            "eventTime",
            audit2rollup_core::Reduction::Unique,
        ));
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_pipeline_config() {
        let mut config = valid();
        config.pipeline.max_concurrent_fetches = 0;
        assert!(validate_config(&config).is_err());

        let mut config = valid();
        config.pipeline.retry.base_delay_ms = 5_000;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_accumulator_key_must_be_an_object() {
        let mut config = valid();
        config.target.accumulator_key = "accumulator/".to_string();
        assert!(validate_config(&config).is_err());

        let mut config = valid();
        config.target.accumulator_key = "rollups/acc.parquet".to_string();
        assert!(validate_config(&config).is_err());
    }
}
