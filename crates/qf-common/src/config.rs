//! Configuration loading utilities.
//!
//! Layered configuration via figment:
//! - Default values (compiled in)
//! - Configuration file (TOML)
//! - Environment variables
//!
//! # Example
//!
//! ```rust,ignore
//! use qf_common::config::{EngineConfig, load_config};
//!
//! let config: EngineConfig = load_config("qf", None)?;
//! ```

#[cfg(feature = "config")]
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Storage backend connection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Connection string for the configured backend (opaque to the engine).
    #[serde(default = "default_storage_url")]
    pub url: String,

    /// Maximum connections in the pool (when the backend is pooled).
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_storage_url() -> String {
    "memory://".to_string()
}

fn default_max_connections() -> u32 {
    10
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            url: default_storage_url(),
            max_connections: default_max_connections(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging.
    #[serde(default)]
    pub json_logs: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

/// Quota engine behavior configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QuotaConfig {
    /// Reject `track_usage`/`check_quota` calls whose `project` is unknown to the directory.
    #[serde(default)]
    pub enforce_project_names: bool,

    /// Reject calls whose `username` is unknown to the directory.
    #[serde(default)]
    pub enforce_user_names: bool,

    /// Maximum number of denial-cache entries retained before the oldest are evicted.
    #[serde(default = "default_denial_cache_capacity")]
    pub denial_cache_capacity: usize,
}

fn default_denial_cache_capacity() -> usize {
    10_000
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            enforce_project_names: false,
            enforce_user_names: false,
            denial_cache_capacity: default_denial_cache_capacity(),
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub quota: QuotaConfig,
}

/// Load configuration from layered sources.
///
/// Sources (in order of precedence): defaults, then an optional TOML file,
/// then environment variables prefixed with the uppercase `prefix` followed
/// by `_` (e.g. with prefix `qf`, `QF_QUOTA_ENFORCE_USER_NAMES` sets
/// `quota.enforce_user_names`).
#[cfg(feature = "config")]
pub fn load_config<T: Default + Serialize + for<'de> Deserialize<'de>>(
    prefix: &str,
    config_file: Option<&str>,
) -> Result<T, figment::Error> {
    let mut figment = Figment::new().merge(Serialized::defaults(T::default()));

    if let Some(path) = config_file {
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed(&format!("{}_", prefix.to_uppercase())).split("_"));

    figment.extract()
}

/// Load the engine configuration from defaults, file, and environment.
#[cfg(feature = "config")]
pub fn load_engine_config(config_file: Option<&str>) -> Result<EngineConfig, figment::Error> {
    load_config("qf", config_file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_config_defaults() {
        let config = StorageConfig::default();
        assert_eq!(config.max_connections, 10);
    }

    #[test]
    fn test_engine_config_defaults() {
        let config = EngineConfig::default();
        assert!(!config.quota.enforce_user_names);
        assert_eq!(config.quota.denial_cache_capacity, 10_000);
    }

    #[cfg(feature = "config")]
    #[test]
    fn test_load_config_defaults() {
        let config: EngineConfig = load_config("test", None).unwrap();
        assert_eq!(config.storage.max_connections, 10);
    }
}
