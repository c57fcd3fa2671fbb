//! Configuration management for Tessera
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. Environment variables (TESSERA_* prefix, highest precedence)
//! 2. tessera.local.toml (gitignored, local overrides)
//! 3. tessera.toml (git-tracked, project config)
//! 4. ~/.config/tessera/config.toml (user defaults)
//! 5. Built-in defaults (lowest precedence)

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tessera_types::{Consistency, RetryPolicy, SerialConsistency};

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

/// Observed bound of the prepared statement cache.
pub const DEFAULT_PREPARED_CACHE_CAPACITY: usize = 100;

/// Main Tessera client configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TesseraConfig {
    pub client: ClientConfig,
    pub caches: CacheConfig,
    pub defaults: QueryDefaults,
}

/// Worker pool and blocking-call settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Threads in the shared completion pool.
    pub worker_threads: usize,
    /// Upper bound for synchronous (blocking) calls.
    pub blocking_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            worker_threads: 4,
            blocking_timeout_ms: 60_000,
        }
    }
}

impl ClientConfig {
    pub fn blocking_timeout(&self) -> Duration {
        Duration::from_millis(self.blocking_timeout_ms)
    }
}

/// Capacities of the bounded caches shared by every query of a context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub prepared_statements: usize,
    pub column_metadata: usize,
    pub user_types: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            prepared_statements: DEFAULT_PREPARED_CACHE_CAPACITY,
            column_metadata: 100,
            user_types: 100,
        }
    }
}

/// Per-query settings applied when a statement does not set its own.
///
/// `None` means "use the network client's own default".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryDefaults {
    pub consistency: Option<Consistency>,
    pub serial_consistency: Option<SerialConsistency>,
    pub tracing: Option<bool>,
    pub retry_policy: Option<RetryPolicy>,
    pub page_size: Option<u32>,
}

impl TesseraConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from specific project directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Checks the invariants the client relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client.worker_threads == 0 {
            return Err(ConfigError::ValidationError(
                "client.worker_threads must be >= 1".to_string(),
            ));
        }
        if self.client.blocking_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "client.blocking_timeout_ms must be > 0".to_string(),
            ));
        }
        for (name, capacity) in [
            ("caches.prepared_statements", self.caches.prepared_statements),
            ("caches.column_metadata", self.caches.column_metadata),
            ("caches.user_types", self.caches.user_types),
        ] {
            if capacity == 0 {
                return Err(ConfigError::ValidationError(format!("{name} must be > 0")));
            }
        }
        if self.defaults.page_size == Some(0) {
            return Err(ConfigError::ValidationError(
                "defaults.page_size must be > 0 when set".to_string(),
            ));
        }
        Ok(())
    }

    /// Renders the configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TesseraConfig::default();
        assert_eq!(config.client.worker_threads, 4);
        assert_eq!(config.client.blocking_timeout(), Duration::from_secs(60));
        assert_eq!(config.caches.prepared_statements, 100);
        assert_eq!(config.defaults.consistency, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut config = TesseraConfig::default();
        config.caches.user_types = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("caches.user_types"));
    }

    #[test]
    fn test_zero_page_size_rejected() {
        let mut config = TesseraConfig::default();
        config.defaults.page_size = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = TesseraConfig::default();
        config.defaults.consistency = Some(Consistency::LocalQuorum);
        config.defaults.retry_policy = Some(RetryPolicy::Fallthrough);

        let rendered = config.to_toml().unwrap();
        assert!(rendered.contains("LOCAL_QUORUM"));

        let parsed: TesseraConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }
}
