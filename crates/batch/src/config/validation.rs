use super::{BatchConfig, MAX_TIMEOUT_MS};
use crate::error::ConfigError;

impl BatchConfig {
    /// Validate the config: size ordering, fractions, and timeout bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_sizes()?;
        self.validate_utilization()?;
        self.validate_timeouts()?;
        Ok(())
    }

    /// Ensure `1 <= min <= target <= max` and non-zero priority overrides.
    fn validate_sizes(&self) -> Result<(), ConfigError> {
        if self.min_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "min_batch_size must be at least 1".into(),
            ));
        }
        if self.min_batch_size > self.target_batch_size {
            return Err(ConfigError::Invalid(format!(
                "min_batch_size ({}) exceeds target_batch_size ({})",
                self.min_batch_size, self.target_batch_size
            )));
        }
        if self.target_batch_size > self.max_batch_size {
            return Err(ConfigError::Invalid(format!(
                "target_batch_size ({}) exceeds max_batch_size ({})",
                self.target_batch_size, self.max_batch_size
            )));
        }
        if self.critical_batch_size == 0 || self.high_priority_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "critical_batch_size and high_priority_batch_size must be at least 1".into(),
            ));
        }
        Ok(())
    }

    fn validate_utilization(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.target_utilization) {
            return Err(ConfigError::Invalid(format!(
                "target_utilization ({}) must be within [0, 1]",
                self.target_utilization
            )));
        }
        if self.utilization_window == 0 {
            return Err(ConfigError::Invalid(
                "utilization_window must be at least 1".into(),
            ));
        }
        Ok(())
    }

    fn validate_timeouts(&self) -> Result<(), ConfigError> {
        let named = [
            ("min_timeout_ms", Some(self.min_timeout_ms)),
            ("max_timeout_ms", Some(self.max_timeout_ms)),
            ("critical_timeout_ms", Some(self.critical_timeout_ms)),
            ("submit_timeout_ms", self.submit_timeout_ms),
        ];
        for (name, value) in named {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(ConfigError::Invalid(format!(
                        "{name} ({v}) must be a finite, non-negative number"
                    )));
                }
                if v > MAX_TIMEOUT_MS {
                    return Err(ConfigError::Invalid(format!(
                        "{name} ({v}) exceeds the {MAX_TIMEOUT_MS} ms limit"
                    )));
                }
            }
        }
        if self.min_timeout_ms > self.max_timeout_ms {
            return Err(ConfigError::Invalid(format!(
                "min_timeout_ms ({}) exceeds max_timeout_ms ({})",
                self.min_timeout_ms, self.max_timeout_ms
            )));
        }
        Ok(())
    }
}
