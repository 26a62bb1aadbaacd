//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (GALLERY_*)
//! 2. TOML config file (if GALLERY_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::cache::DEFAULT_BLOB_CAPACITY;
use crate::lazy::LazyLoadConfig;

mod validation;

pub use validation::{ConfigError, MAX_AGE_SECS, MAX_OVERSCAN};

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (GALLERY_*)
/// 2. TOML config file (if GALLERY_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Base URL of the media API, e.g. `http://localhost:8080/api`.
    ///
    /// Set via GALLERY_API_BASE_URL environment variable.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// User-Agent string for HTTP requests.
    ///
    /// Set via GALLERY_USER_AGENT environment variable.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// HTTP request timeout in milliseconds.
    ///
    /// Set via GALLERY_TIMEOUT_MS environment variable.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Path to the SQLite database holding persisted validators.
    ///
    /// Set via GALLERY_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// How long a stored validator stays usable, in seconds.
    #[serde(default = "default_validator_max_age_secs")]
    pub validator_max_age_secs: u64,

    /// Interval between validator sweeps, in seconds.
    #[serde(default = "default_validator_sweep_secs")]
    pub validator_sweep_secs: u64,

    /// Maximum number of blobs held in memory.
    #[serde(default = "default_blob_capacity")]
    pub blob_capacity: usize,

    /// How long a cached blob stays usable, in seconds.
    #[serde(default = "default_blob_max_age_secs")]
    pub blob_max_age_secs: u64,

    /// Largest blob body accepted from the API, in bytes.
    #[serde(default = "default_max_blob_bytes")]
    pub max_blob_bytes: usize,

    /// Rows/columns rendered beyond the visible grid window.
    #[serde(default = "default_overscan")]
    pub overscan: usize,

    /// Visible fraction at which a cell counts as intersecting.
    #[serde(default = "default_lazy_threshold")]
    pub lazy_threshold: f64,

    /// Pixels the viewport is expanded by before intersection tests.
    #[serde(default = "default_lazy_root_margin_px")]
    pub lazy_root_margin_px: f64,

    /// Whether a cell stops being tracked after its first intersection.
    #[serde(default = "default_true")]
    pub lazy_trigger_once: bool,

    /// Number of items preloaded around a focus index.
    #[serde(default = "default_preload_window")]
    pub preload_window: usize,
}

fn default_api_base_url() -> String {
    "http://localhost:8080/api".into()
}

fn default_user_agent() -> String {
    "gallery-cache/0.1".into()
}

fn default_timeout_ms() -> u64 {
    20_000
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./gallery-cache.sqlite")
}

fn default_validator_max_age_secs() -> u64 {
    24 * 60 * 60
}

fn default_validator_sweep_secs() -> u64 {
    60 * 60
}

fn default_blob_capacity() -> usize {
    DEFAULT_BLOB_CAPACITY
}

fn default_blob_max_age_secs() -> u64 {
    30 * 60
}

fn default_max_blob_bytes() -> usize {
    20 * 1024 * 1024
}

fn default_overscan() -> usize {
    2
}

fn default_lazy_threshold() -> f64 {
    0.1
}

fn default_lazy_root_margin_px() -> f64 {
    100.0
}

fn default_true() -> bool {
    true
}

fn default_preload_window() -> usize {
    5
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            user_agent: default_user_agent(),
            timeout_ms: default_timeout_ms(),
            db_path: default_db_path(),
            validator_max_age_secs: default_validator_max_age_secs(),
            validator_sweep_secs: default_validator_sweep_secs(),
            blob_capacity: default_blob_capacity(),
            blob_max_age_secs: default_blob_max_age_secs(),
            max_blob_bytes: default_max_blob_bytes(),
            overscan: default_overscan(),
            lazy_threshold: default_lazy_threshold(),
            lazy_root_margin_px: default_lazy_root_margin_px(),
            lazy_trigger_once: true,
            preload_window: default_preload_window(),
        }
    }
}

/// Seconds to a TTL; values chrono cannot represent saturate.
fn ttl(secs: u64) -> chrono::Duration {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Validator TTL.
    pub fn validator_max_age(&self) -> chrono::Duration {
        ttl(self.validator_max_age_secs)
    }

    /// Period of the background validator sweep.
    pub fn validator_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.validator_sweep_secs)
    }

    /// Blob TTL.
    pub fn blob_max_age(&self) -> chrono::Duration {
        ttl(self.blob_max_age_secs)
    }

    /// Lazy-load settings for grid views.
    pub fn lazy_load(&self) -> LazyLoadConfig {
        LazyLoadConfig {
            threshold: self.lazy_threshold,
            root_margin: self.lazy_root_margin_px,
            trigger_once: self.lazy_trigger_once,
        }
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `GALLERY_`
    /// 2. TOML file from `GALLERY_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("GALLERY_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("GALLERY_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.api_base_url, "http://localhost:8080/api");
        assert_eq!(config.user_agent, "gallery-cache/0.1");
        assert_eq!(config.timeout_ms, 20_000);
        assert_eq!(config.db_path, PathBuf::from("./gallery-cache.sqlite"));
        assert_eq!(config.validator_max_age_secs, 86_400);
        assert_eq!(config.validator_sweep_secs, 3_600);
        assert_eq!(config.blob_capacity, 100);
        assert_eq!(config.blob_max_age_secs, 1_800);
        assert_eq!(config.overscan, 2);
        assert!(config.lazy_trigger_once);
        assert_eq!(config.preload_window, 5);
    }

    #[test]
    fn test_duration_helpers() {
        let config = AppConfig::default();
        assert_eq!(config.timeout(), Duration::from_millis(20_000));
        assert_eq!(config.validator_max_age(), chrono::Duration::hours(24));
        assert_eq!(config.validator_sweep_interval(), Duration::from_secs(3_600));
        assert_eq!(config.blob_max_age(), chrono::Duration::minutes(30));
    }

    #[test]
    fn test_unrepresentable_ttl_saturates() {
        let config = AppConfig { validator_max_age_secs: u64::MAX, blob_max_age_secs: 10_000_000_000_000_000, ..Default::default() };
        assert_eq!(config.validator_max_age(), chrono::Duration::MAX);
        assert_eq!(config.blob_max_age(), chrono::Duration::MAX);
    }

    #[test]
    fn test_lazy_load_projection() {
        let config = AppConfig { lazy_threshold: 0.25, lazy_trigger_once: false, ..Default::default() };
        let lazy = config.lazy_load();
        assert_eq!(lazy.threshold, 0.25);
        assert_eq!(lazy.root_margin, 100.0);
        assert!(!lazy.trigger_once);
    }

    #[test]
    fn test_load_from_toml_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("gallery.toml", "blob_capacity = 42\napi_base_url = \"https://media.test/api\"")?;
            jail.set_env("GALLERY_CONFIG_FILE", "gallery.toml");
            jail.set_env("GALLERY_OVERSCAN", "3");

            let config = AppConfig::load().expect("config loads");
            assert_eq!(config.blob_capacity, 42);
            assert_eq!(config.api_base_url, "https://media.test/api");
            assert_eq!(config.overscan, 3);
            Ok(())
        });
    }
}
