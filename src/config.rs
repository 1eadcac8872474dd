//! Config file handling
//!
//! `<config dir>/pulsechain/config.toml`, every key optional:
//!
//! ```toml
//! [cache]
//! enabled = true
//! max_memory_bytes = 52428800
//! cleanup_interval = "5m"
//! default_ttl = "5m"
//! eviction = "last_access"
//!
//! [retry]
//! max_retries = 3
//! retry_delay = "1s"
//! exponential_backoff = true
//!
//! [request]
//! timeout = "30s"
//!
//! [security]
//! require_https = false
//!
//! [chain]
//! stop_on_error = false
//! persist_script_variables = false
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::{CacheSettings, EvictionPolicy, DEFAULT_CLEANUP_INTERVAL, DEFAULT_MAX_MEMORY_BYTES, DEFAULT_TTL};
use crate::client::DEFAULT_TIMEOUT;
use crate::errors::{PulsechainError, Result};
use crate::pipeline::{ChainOptions, FailurePolicy};
use crate::retry::{is_retryable, RetryOptions, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY};

/// pulsechain configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub retry: RetryConfig,
    pub request: RequestConfig,
    pub security: SecurityConfig,
    pub chain: ChainConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_memory_bytes: usize,
    #[serde(with = "human_duration")]
    pub cleanup_interval: Duration,
    #[serde(with = "human_duration")]
    pub default_ttl: Duration,
    /// Persistent tier location; the platform cache dir when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
    pub eviction: EvictionPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_memory_bytes: DEFAULT_MAX_MEMORY_BYTES,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            default_ttl: DEFAULT_TTL,
            directory: None,
            eviction: EvictionPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    #[serde(with = "human_duration")]
    pub retry_delay: Duration,
    pub exponential_backoff: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            exponential_backoff: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestConfig {
    /// Bound for a single attempt
    #[serde(with = "human_duration")]
    pub timeout: Duration,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self { timeout: DEFAULT_TIMEOUT }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub require_https: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub stop_on_error: bool,
    pub persist_script_variables: bool,
}

impl Config {
    /// Load from `path`, or from the default location when `path` is `None`.
    ///
    /// A missing default file yields the defaults; a missing explicit file is
    /// an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let default = Self::default_path();
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };

        let content = std::fs::read_to_string(&path)
            .map_err(|e| PulsechainError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| PulsechainError::Config(format!("Invalid config TOML: {}", e)))
    }

    /// Get the default config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join("pulsechain"))
            .unwrap_or_else(|| PathBuf::from(".pulsechain"))
    }

    pub fn default_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Directory of the persistent cache tier
    pub fn cache_dir(&self) -> PathBuf {
        self.cache.directory.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .map(|p| p.join("pulsechain"))
                .unwrap_or_else(|| Self::config_dir().join("cache"))
        })
    }

    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            max_memory_bytes: self.cache.max_memory_bytes,
            cleanup_interval: self.cache.cleanup_interval,
            eviction: self.cache.eviction,
        }
    }

    pub fn retry_options(&self) -> RetryOptions<PulsechainError> {
        RetryOptions::new(
            self.retry.max_retries,
            self.retry.retry_delay,
            self.retry.exponential_backoff,
        )
        .retry_if(is_retryable)
    }

    pub fn chain_options(&self) -> ChainOptions {
        ChainOptions {
            failure_policy: if self.chain.stop_on_error {
                FailurePolicy::StopOnError
            } else {
                FailurePolicy::Continue
            },
            use_cache: self.cache.enabled,
            cache_ttl: Some(self.cache.default_ttl),
            persist_script_variables: self.chain.persist_script_variables,
        }
    }
}

/// Durations as human strings: "500ms", "30s", "5m"
mod human_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert!(config.cache.enabled);
        assert_eq!(config.request.timeout, Duration::from_secs(30));
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn test_parse_sections() {
        let config = Config::from_toml_str(
            r#"
            [cache]
            enabled = false
            default_ttl = "90s"
            eviction = "last_access"
            directory = "/tmp/pc-cache"

            [retry]
            max_retries = 1
            retry_delay = "250ms"
            exponential_backoff = false

            [request]
            timeout = "5s"

            [security]
            require_https = true

            [chain]
            stop_on_error = true
            "#,
        )
        .unwrap();

        assert!(!config.cache.enabled);
        assert_eq!(config.cache.default_ttl, Duration::from_secs(90));
        assert_eq!(config.cache.eviction, EvictionPolicy::LastAccess);
        assert_eq!(config.cache_dir(), PathBuf::from("/tmp/pc-cache"));
        assert_eq!(config.retry_options().delay_for_attempt(2), Duration::from_millis(250));
        assert_eq!(config.request.timeout, Duration::from_secs(5));
        assert!(config.security.require_https);

        let options = config.chain_options();
        assert_eq!(options.failure_policy, FailurePolicy::StopOnError);
        assert!(!options.use_cache);
        assert!(!options.persist_script_variables);
    }

    #[test]
    fn test_invalid_duration_is_config_error() {
        let err = Config::from_toml_str("[request]\ntimeout = \"soon\"").unwrap_err();
        assert!(matches!(err, PulsechainError::Config(_)));
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[retry]\nmax_retries = 0\n").unwrap();
        assert_eq!(Config::load(Some(&path)).unwrap().retry.max_retries, 0);

        let missing = dir.path().join("missing.toml");
        assert!(matches!(Config::load(Some(&missing)), Err(PulsechainError::Config(_))));
    }

    #[test]
    fn test_serialized_durations_are_human() {
        let text = toml::to_string(&Config::default()).unwrap();
        assert!(text.contains("timeout = \"30s\""));
        assert_eq!(Config::from_toml_str(&text).unwrap(), Config::default());
    }
}
