//! `cachelock` Configuration Module
//!
//! Provides configuration file support via `cachelock.toml`, environment
//! variables, and runtime overrides.
//!
//! # Priority (highest to lowest)
//!
//! 1. Runtime overrides (builder methods on [`LockPolicy`])
//! 2. Environment variables (`CACHELOCK_*`, nested keys separated by `__`)
//! 3. Configuration file (`cachelock.toml`)
//! 4. Default values

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default bound on clone and append retries.
pub const DEFAULT_MAX_TRIES: usize = 10_000;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to parse configuration.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Invalid configuration value.
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue {
        /// Configuration key that failed validation.
        key: String,
        /// Validation error message.
        message: String,
    },

    /// Failed to render configuration.
    #[error("Failed to serialize configuration: {0}")]
    SerializeError(String),
}

/// Lock acquisition section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockingConfig {
    /// Retry bound for clone walks and merge appends.
    pub max_tries: usize,
    /// Bounded wait for non-prevailing merge requesters. The prevailing
    /// requester re-checks for blocked appends at this interval.
    pub max_wait_ms: u64,
    /// Bounded wait between clone walk attempts.
    pub clone_wait_ms: u64,
    /// Bounded wait per append attempt, taken while the merge's locks are held.
    pub append_wait_ms: u64,
    /// Cap on the prevailing requester's wait (`None` = until released).
    pub prevailing_wait_ms: Option<u64>,
    /// Lock change sets before merging them into the cache.
    pub lock_on_merge: bool,
}

impl Default for LockingConfig {
    fn default() -> Self {
        Self {
            max_tries: DEFAULT_MAX_TRIES,
            max_wait_ms: 1000,
            clone_wait_ms: 10,
            append_wait_ms: 10,
            prevailing_wait_ms: None,
            lock_on_merge: true,
        }
    }
}

/// Cache invalidation section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvalidationConfig {
    /// Entries not read or refreshed for this long count as invalidated.
    pub time_to_live_ms: Option<u64>,
    /// Refresh invalidated objects instead of cloning them from the cache.
    pub refresh_on_stale_read: bool,
}

/// Logging configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: error, warn, info, debug, trace.
    pub level: String,
    /// Log format: text or json.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Main `cachelock` configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CachelockConfig {
    /// Lock acquisition configuration.
    pub locking: LockingConfig,
    /// Invalidation configuration.
    pub invalidation: InvalidationConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl CachelockConfig {
    /// Loads configuration from default sources.
    ///
    /// Priority: defaults < file < environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration parsing fails.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("cachelock.toml")
    }

    /// Loads configuration from a specific file path.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration parsing fails.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("CACHELOCK_").split("__").lowercase(true));

        figment
            .extract()
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Creates a configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing fails.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::string(toml_str));

        figment
            .extract()
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Renders the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.locking.max_tries == 0 {
            return Err(ConfigError::InvalidValue {
                key: "locking.max_tries".to_string(),
                message: "value must be >= 1".to_string(),
            });
        }

        for (key, value) in [
            ("locking.max_wait_ms", Some(self.locking.max_wait_ms)),
            ("locking.clone_wait_ms", Some(self.locking.clone_wait_ms)),
            ("locking.append_wait_ms", Some(self.locking.append_wait_ms)),
            ("locking.prevailing_wait_ms", self.locking.prevailing_wait_ms),
            ("invalidation.time_to_live_ms", self.invalidation.time_to_live_ms),
        ] {
            if value == Some(0) {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: "value must be >= 1".to_string(),
                });
            }
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::InvalidValue {
                key: "logging.level".to_string(),
                message: format!(
                    "value '{}' is invalid, expected one of: {:?}",
                    self.logging.level, valid_levels
                ),
            });
        }

        let valid_formats = ["text", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(ConfigError::InvalidValue {
                key: "logging.format".to_string(),
                message: format!(
                    "value '{}' is invalid, expected one of: {:?}",
                    self.logging.format, valid_formats
                ),
            });
        }

        Ok(())
    }

    /// Runtime lock policy derived from this configuration.
    #[must_use]
    pub fn policy(&self) -> LockPolicy {
        LockPolicy::from(&self.locking)
    }
}

/// Lock tuning in runtime units, held by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    /// Retry bound for clone walks and merge appends, at least 1.
    pub max_tries: usize,
    /// Bounded wait for non-prevailing requesters; re-check interval of the
    /// prevailing requester.
    pub max_wait: Duration,
    /// Bounded wait between clone walk attempts.
    pub clone_wait: Duration,
    /// Bounded wait per append attempt.
    pub append_wait: Duration,
    /// Cap on the prevailing requester's wait.
    pub prevailing_wait: Option<Duration>,
    /// Lock change sets before merging.
    pub lock_on_merge: bool,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self::from(&LockingConfig::default())
    }
}

impl From<&LockingConfig> for LockPolicy {
    fn from(cfg: &LockingConfig) -> Self {
        Self {
            max_tries: cfg.max_tries.max(1),
            max_wait: Duration::from_millis(cfg.max_wait_ms),
            clone_wait: Duration::from_millis(cfg.clone_wait_ms),
            append_wait: Duration::from_millis(cfg.append_wait_ms),
            prevailing_wait: cfg.prevailing_wait_ms.map(Duration::from_millis),
            lock_on_merge: cfg.lock_on_merge,
        }
    }
}

impl LockPolicy {
    /// Overrides the retry bound. Zero is raised to one attempt.
    #[must_use]
    pub fn with_max_tries(mut self, max_tries: usize) -> Self {
        self.max_tries = max_tries.max(1);
        self
    }

    /// Overrides the bounded merge wait.
    #[must_use]
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// Overrides the clone retry wait.
    #[must_use]
    pub fn with_clone_wait(mut self, clone_wait: Duration) -> Self {
        self.clone_wait = clone_wait;
        self
    }

    /// Overrides the per-attempt append wait.
    #[must_use]
    pub fn with_append_wait(mut self, append_wait: Duration) -> Self {
        self.append_wait = append_wait;
        self
    }

    /// Overrides the prevailing requester's wait cap.
    #[must_use]
    pub fn with_prevailing_wait(mut self, prevailing_wait: Option<Duration>) -> Self {
        self.prevailing_wait = prevailing_wait;
        self
    }

    /// Enables or disables locking on merge.
    #[must_use]
    pub fn with_lock_on_merge(mut self, lock_on_merge: bool) -> Self {
        self.lock_on_merge = lock_on_merge;
        self
    }
}
