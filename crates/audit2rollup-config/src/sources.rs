// Configuration source loading.
//
// Priority order:
// 1. Environment variables (AUDIT2ROLLUP_* prefix, then legacy names)
// 2. Config file path from AUDIT2ROLLUP_CONFIG
// 3. Inline config content from AUDIT2ROLLUP_CONFIG_CONTENT
// 4. Default config file (./audit2rollup.toml)
// 5. Built-in defaults

use crate::env_overrides::{self, EnvSource, ENV_PREFIX};
use crate::RuntimeConfig;
use anyhow::{Context, Result};
use std::env;
use std::path::Path;

const DEFAULT_CONFIG_FILE: &str = "./audit2rollup.toml";

/// Load configuration using the process environment and filesystem.
pub fn load_config() -> Result<RuntimeConfig> {
    load_with_env(&StdEnvSource)
}

/// Load configuration with an explicit environment source.
pub fn load_with_env<E: EnvSource>(env: &E) -> Result<RuntimeConfig> {
    let mut config = load_from_file(env)?.unwrap_or_default();
    env_overrides::apply_env_overrides(&mut config, env)?;
    config.validate()?;
    Ok(config)
}

fn load_from_file<E: EnvSource>(env: &E) -> Result<Option<RuntimeConfig>> {
    if let Some(path) = env.get("CONFIG") {
        return read_file(Path::new(&path)).map(Some);
    }

    if let Some(content) = env.get("CONFIG_CONTENT") {
        let config: RuntimeConfig = toml::from_str(&content).with_context(|| {
            format!("Failed to parse inline config from {}CONFIG_CONTENT", ENV_PREFIX)
        })?;
        return Ok(Some(config));
    }

    let default_path = Path::new(DEFAULT_CONFIG_FILE);
    if default_path.exists() {
        return read_file(default_path).map(Some);
    }

    Ok(None)
}

fn read_file(path: &Path) -> Result<RuntimeConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Reads `AUDIT2ROLLUP_*` and raw variables from the process environment
pub struct StdEnvSource;

impl EnvSource for StdEnvSource {
    fn get(&self, key: &str) -> Option<String> {
        env::var(format!("{}{}", ENV_PREFIX, key)).ok()
    }

    fn get_raw(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapEnv(HashMap<&'static str, String>);

    impl EnvSource for MapEnv {
        fn get(&self, key: &str) -> Option<String> {
            self.0.get(key).cloned()
        }

        fn get_raw(&self, _key: &str) -> Option<String> {
            None
        }
    }

    #[test]
    fn inline_content_then_env_overrides() {
        let mut vars = HashMap::new();
        vars.insert(
            "CONFIG_CONTENT",
            r#"
            [target]
            bucket = "from-file"
            snapshot_prefix = "hourly/"

            [pipeline]
            max_concurrent_fetches = 4
            "#
            .to_string(),
        );
        vars.insert("MAX_CONCURRENT_FETCHES", "16".to_string());

        let config = load_with_env(&MapEnv(vars)).unwrap();
        assert_eq!(config.target.bucket, "from-file");
        assert_eq!(config.target.snapshot_prefix, "hourly/");
        assert_eq!(config.pipeline.max_concurrent_fetches, 16);
    }

    #[test]
    fn invalid_inline_content_is_an_error() {
        let mut vars = HashMap::new();
        vars.insert("CONFIG_CONTENT", "[target".to_string());
        let err = load_with_env(&MapEnv(vars)).unwrap_err();
        assert!(format!("{err:#}").contains("AUDIT2ROLLUP_CONFIG_CONTENT"));
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let mut vars = HashMap::new();
        vars.insert("CONFIG", "/nonexistent/audit2rollup.toml".to_string());
        assert!(load_with_env(&MapEnv(vars)).is_err());
    }
}
