//! Configuration parsing and validation.
//!
//! The supervisor is configured from a TOML file with `[worker]`,
//! `[health]`, and `[restart]` sections; every section has full defaults
//! except the worker command.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::health::HealthCheckConfig;
use crate::process::WorkerSpec;
use crate::restart::RestartPolicy;

/// Top-level supervisor configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// The worker process to supervise.
    #[serde(default)]
    pub worker: WorkerSpec,

    /// Health check configuration.
    #[serde(default)]
    pub health: HealthCheckConfig,

    /// Restart policy.
    #[serde(default)]
    pub restart: RestartPolicy,
}

impl SupervisorConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Serialize configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Validate every section's invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] naming the violated invariant.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.worker.validate().map_err(ConfigError::Validation)?;
        self.health.validate().map_err(ConfigError::Validation)?;
        self.restart.validate().map_err(ConfigError::Validation)?;
        Ok(())
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error reading configuration file.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Validation error.
    #[error("configuration validation failed: {0}")]
    Validation(String),
}
