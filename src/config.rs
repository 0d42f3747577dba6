//! Endpoint configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::transport::codec::MAX_FRAME_BYTES;
use crate::{AppError, Result};

fn default_name() -> String {
    "stdio".into()
}

fn default_max_frame_bytes() -> usize {
    MAX_FRAME_BYTES
}

fn default_inbound_queue() -> usize {
    64
}

fn default_drain_timeout_ms() -> u64 {
    1000
}

/// Endpoint configuration parsed from `config.toml`.
///
/// Every field has a default, so an empty file is a valid configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct EndpointConfig {
    /// Connection tag used in log records.
    #[serde(default = "default_name")]
    pub name: String,
    /// Maximum inbound frame length in bytes.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// Capacity of the channel between the read loop and the dispatcher.
    #[serde(default = "default_inbound_queue")]
    pub inbound_queue: usize,
    /// How long teardown lets already-spawned message tasks finish their
    /// writes before the output is shut.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
    /// Optional dotenv file re-read before every exchange.
    #[serde(default)]
    pub env_file: Option<PathBuf>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            max_frame_bytes: default_max_frame_bytes(),
            inbound_queue: default_inbound_queue(),
            drain_timeout_ms: default_drain_timeout_ms(),
            env_file: None,
        }
    }
}

impl EndpointConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Teardown drain window.
    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AppError::Config("name must not be empty".into()));
        }

        if self.max_frame_bytes == 0 {
            return Err(AppError::Config(
                "max_frame_bytes must be greater than zero".into(),
            ));
        }

        if self.inbound_queue == 0 {
            return Err(AppError::Config(
                "inbound_queue must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}
