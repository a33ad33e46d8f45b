use std::path::Path;
use std::str::FromStr;

use tracing::warn;

use super::BatchConfig;
use crate::error::ConfigError;

/// Read and parse an env var. Missing or empty yields `None`; unparsable
/// values are logged and ignored.
fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok().filter(|s| !s.is_empty())?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparsable env override");
            None
        }
    }
}

impl BatchConfig {
    /// Parse config from a TOML string, apply `BATCH_*` overrides, validate.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a TOML string without consulting the environment.
    pub fn parse_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Defaults with environment overrides applied, then validated.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub(crate) fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse("BATCH_MIN_SIZE") {
            self.min_batch_size = v;
        }
        if let Some(v) = env_parse("BATCH_MAX_SIZE") {
            self.max_batch_size = v;
        }
        if let Some(v) = env_parse("BATCH_TARGET_SIZE") {
            self.target_batch_size = v;
        }
        if let Some(v) = env_parse("BATCH_CRITICAL_SIZE") {
            self.critical_batch_size = v;
        }
        if let Some(v) = env_parse("BATCH_HIGH_PRIORITY_SIZE") {
            self.high_priority_batch_size = v;
        }
        if let Some(v) = env_parse("BATCH_TARGET_UTILIZATION") {
            self.target_utilization = v;
        }
        if let Some(v) = env_parse("BATCH_UTILIZATION_WINDOW") {
            self.utilization_window = v;
        }
        if let Some(v) = env_parse("BATCH_MIN_TIMEOUT_MS") {
            self.min_timeout_ms = v;
        }
        if let Some(v) = env_parse("BATCH_MAX_TIMEOUT_MS") {
            self.max_timeout_ms = v;
        }
        if let Some(v) = env_parse("BATCH_SUBMIT_TIMEOUT_MS") {
            self.submit_timeout_ms = Some(v);
        }
        if let Some(v) = env_parse("BATCH_ENABLE_COALESCING") {
            self.enable_coalescing = v;
        }
        if let Some(v) = env_parse("BATCH_ADAPTIVE_TIMEOUT") {
            self.enable_adaptive_timeout = v;
        }
        if let Some(v) = env_parse("BATCH_UTILIZATION_AWARE") {
            self.enable_utilization_aware_sizing = v;
        }
    }
}
