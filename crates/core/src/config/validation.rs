//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

/// Longest accepted TTL or sweep interval (365 days).
pub const MAX_AGE_SECS: u64 = 365 * 24 * 60 * 60;

/// Largest accepted grid overscan, in rows/columns.
pub const MAX_OVERSCAN: usize = 50;

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `api_base_url` is not an absolute http(s) URL
    /// - `timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - `user_agent` is empty
    /// - `blob_capacity` or `max_blob_bytes` is 0
    /// - a TTL or the sweep interval is 0 or longer than 365 days
    /// - `overscan` exceeds [`MAX_OVERSCAN`]
    /// - `lazy_threshold` is outside `0.0..=1.0` or the root margin is negative
    pub fn validate(&self) -> Result<(), ConfigError> {
        match url::Url::parse(&self.api_base_url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
            Ok(parsed) => {
                return Err(invalid("api_base_url", &format!("unsupported scheme: {}", parsed.scheme())));
            }
            Err(e) => return Err(invalid("api_base_url", &e.to_string())),
        }

        if self.timeout_ms < 100 {
            return Err(invalid("timeout_ms", "must be at least 100ms"));
        }
        if self.timeout_ms > 300_000 {
            return Err(invalid("timeout_ms", "must not exceed 5 minutes (300000ms)"));
        }

        if self.user_agent.is_empty() {
            return Err(invalid("user_agent", "must not be empty"));
        }

        if self.blob_capacity == 0 {
            return Err(invalid("blob_capacity", "must be greater than 0"));
        }
        if self.max_blob_bytes == 0 {
            return Err(invalid("max_blob_bytes", "must be greater than 0"));
        }

        for (field, secs) in [
            ("validator_max_age_secs", self.validator_max_age_secs),
            ("validator_sweep_secs", self.validator_sweep_secs),
            ("blob_max_age_secs", self.blob_max_age_secs),
        ] {
            if secs == 0 {
                return Err(invalid(field, "must be greater than 0"));
            }
            if secs > MAX_AGE_SECS {
                return Err(invalid(field, "must not exceed 365 days (31536000s)"));
            }
        }

        if self.overscan > MAX_OVERSCAN {
            return Err(invalid("overscan", "must not exceed 50"));
        }

        if !(0.0..=1.0).contains(&self.lazy_threshold) {
            return Err(invalid("lazy_threshold", "must be between 0.0 and 1.0"));
        }
        if self.lazy_root_margin_px < 0.0 || !self.lazy_root_margin_px.is_finite() {
            return Err(invalid("lazy_root_margin_px", "must be a non-negative number"));
        }

        if self.preload_window > self.blob_capacity {
            tracing::warn!(
                preload_window = self.preload_window,
                blob_capacity = self.blob_capacity,
                "preload_window exceeds blob_capacity; preloads will evict each other"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_bad_base_url() {
        let config = AppConfig { api_base_url: "not a url".into(), ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "api_base_url"));
    }

    #[test]
    fn test_validate_unsupported_scheme() {
        let config = AppConfig { api_base_url: "ftp://media.test".into(), ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "api_base_url"));
    }

    #[test]
    fn test_validate_timeout_bounds() {
        let config = AppConfig { timeout_ms: 50, ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field, .. }) if field == "timeout_ms"));

        let config = AppConfig { timeout_ms: 301_000, ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field, .. }) if field == "timeout_ms"));
    }

    #[test]
    fn test_validate_empty_user_agent() {
        let config = AppConfig { user_agent: String::new(), ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "user_agent"));
    }

    #[test]
    fn test_validate_zero_capacity() {
        let config = AppConfig { blob_capacity: 0, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "blob_capacity"));
    }

    #[test]
    fn test_validate_zero_ttl() {
        let config = AppConfig { validator_max_age_secs: 0, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "validator_max_age_secs"));
    }

    #[test]
    fn test_validate_ttl_upper_bound() {
        let config = AppConfig { validator_max_age_secs: 10_000_000_000_000_000, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "validator_max_age_secs"));

        let config = AppConfig { blob_max_age_secs: MAX_AGE_SECS + 1, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "blob_max_age_secs"));

        let config = AppConfig { validator_sweep_secs: MAX_AGE_SECS, ..Default::default() };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_overscan_cap() {
        let config = AppConfig { overscan: MAX_OVERSCAN + 1, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "overscan"));
    }

    #[test]
    fn test_validate_threshold_range() {
        let config = AppConfig { lazy_threshold: 1.5, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "lazy_threshold"));
    }

    #[test]
    fn test_validate_negative_margin() {
        let config = AppConfig { lazy_root_margin_px: -1.0, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "lazy_root_margin_px"));
    }

    #[test]
    fn test_validate_edge_case_values() {
        let config = AppConfig { timeout_ms: 100, lazy_threshold: 0.0, blob_capacity: 1, preload_window: 1, ..Default::default() };
        assert!(config.validate().is_ok());
    }
}
