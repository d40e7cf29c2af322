//! Configuration management for batchload hooks.
//!
//! This module provides configuration loading with multiple sources:
//! 1. Default values (hardcoded)
//! 2. Configuration file (YAML)
//! 3. Environment variables (override)
//!
//! # Configuration Hierarchy
//!
//! Environment variables take precedence over config file values,
//! which take precedence over defaults.
//!
//! # Example
//!
//! ```ignore
//! use batchload_hooks::config::BatchLoadConfig;
//!
//! // Load from file with env overrides
//! let config = BatchLoadConfig::load("batchload.yaml")?;
//!
//! // Or load from environment only
//! let config = BatchLoadConfig::from_env()?;
//! ```
//!
//! # Example YAML Configuration
//!
//! ```yaml
//! scope:
//!   strategy: isolated
//!
//! logging:
//!   level: debug
//!   json: false
//!   include_spans: true
//! ```

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Prefix of environment variable overrides.
const ENV_PREFIX: &str = "BATCHLOAD";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Batch loading hooks configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct BatchLoadConfig {
    /// Scope boundary settings
    #[serde(default)]
    pub scope: ScopeSettings,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Where a unit of work gets its scope from.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScopeStrategy {
    /// A fresh scope per unit of work, propagated to the work's future.
    #[default]
    Isolated,
    /// The scope installed by an enclosing scoped future, cleared before and
    /// after. Without one, the thread's scope off the tokio runtime and a
    /// fresh scope on it.
    Ambient,
}

/// Scope boundary settings.
///
/// Environment variable: `BATCHLOAD_SCOPE__STRATEGY` (`isolated` or `ambient`).
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ScopeSettings {
    #[serde(default)]
    pub strategy: ScopeStrategy,
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LoggingSettings {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Use JSON format (true for production, false for development)
    #[serde(default)]
    pub json: bool,

    /// Log span enter/exit events, including each batch wave
    #[serde(default)]
    pub include_spans: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            include_spans: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

impl BatchLoadConfig {
    /// Load configuration from a YAML file with environment variable overrides.
    ///
    /// Environment variables are prefixed with `BATCHLOAD_` and use `__` as
    /// separator, e.g. `BATCHLOAD_LOGGING__LEVEL=debug` overrides `logging.level`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigLoadError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        let config = Config::builder()
            .add_source(Config::try_from(&BatchLoadConfig::default())?)
            .add_source(File::from(path).format(FileFormat::Yaml))
            .add_source(env_source())
            .build()?;

        let loaded: BatchLoadConfig = config.try_deserialize()?;
        loaded.validate()?;

        Ok(loaded)
    }

    /// Load configuration from environment variables only.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        let config = Config::builder()
            .add_source(Config::try_from(&BatchLoadConfig::default())?)
            .add_source(env_source())
            .build()?;

        let loaded: BatchLoadConfig = config.try_deserialize()?;
        loaded.validate()?;

        Ok(loaded)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        if !VALID_LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigLoadError::Invalid {
                message: format!(
                    "logging.level must be one of: {:?}, got: {}",
                    VALID_LOG_LEVELS, self.logging.level
                ),
            });
        }

        Ok(())
    }
}

// BATCHLOAD_LOGGING__LEVEL -> logging.level
fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
}
