//! # Node Configuration
//!
//! YAML file plus environment overrides. Every field has a default, so an
//! empty file (or no file) yields a working node that keeps its state under
//! `./p2px-data`.
//!
//! Environment variables:
//! - `P2PX_DATA_DIR` overrides `data_dir`
//! - `P2PX_RETRY_DELAY_SECS` overrides `retry_delay_secs`
//! - `TRADE_NOTIFICATION_CLI` overrides `journal.notification_cli`

use std::num::NonZeroU16;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use p2px_core::NodeAddress;

/// Errors loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("cannot read config {path}: {source}")]
    Read {
        /// The file path.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The configuration file is not valid YAML for [`NodeConfig`].
    #[error("invalid config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// An environment override could not be parsed.
    #[error("invalid value for {var}: {value}")]
    InvalidEnv {
        /// The variable name.
        var: String,
        /// The rejected value.
        value: String,
    },

    /// A field holds a value the node cannot run with.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Trade-phase journal settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    /// Whether phase changes are journaled.
    pub enabled: bool,
    /// Notification command run after each trade data write.
    pub notification_cli: Option<String>,
    /// How long to wait for the notification command.
    pub cli_timeout_ms: u64,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            notification_cli: None,
            cli_timeout_ms: 1_000,
        }
    }
}

impl JournalConfig {
    /// The notification command timeout.
    pub fn cli_timeout(&self) -> Duration {
        Duration::from_millis(self.cli_timeout_ms)
    }
}

/// Node settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// This node's network address.
    pub node_address: NodeAddress,
    /// Directory holding snapshots and the trade journal.
    pub data_dir: PathBuf,
    /// Delay of the single retry for a dispute result whose dispute is missing.
    pub retry_delay_secs: u64,
    /// Trade-phase journal.
    pub journal: JournalConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_address: default_node_address(),
            data_dir: PathBuf::from("p2px-data"),
            retry_delay_secs: 2,
            journal: JournalConfig::default(),
        }
    }
}

fn default_node_address() -> NodeAddress {
    NodeAddress::localhost(DEFAULT_PORT)
}

const DEFAULT_PORT: NonZeroU16 = match NonZeroU16::new(9999) {
    Some(port) => port,
    None => NonZeroU16::MIN,
};

impl NodeConfig {
    /// Read a YAML configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] or [`ConfigError::Yaml`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    /// Parse a YAML document. An empty document yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] for malformed input.
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Apply overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] for an unparsable value.
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_env_from(|var| std::env::var(var).ok())
    }

    /// Apply overrides from `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] for an unparsable value.
    pub fn apply_env_from(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(dir) = lookup("P2PX_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(raw) = lookup("P2PX_RETRY_DELAY_SECS") {
            self.retry_delay_secs = raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: "P2PX_RETRY_DELAY_SECS".to_string(),
                value: raw.clone(),
            })?;
        }
        if let Some(cli) = lookup("TRADE_NOTIFICATION_CLI") {
            self.journal.notification_cli = Some(cli);
        }
        Ok(self)
    }

    /// Check values the node cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("data_dir must not be empty".into()));
        }
        if self.journal.cli_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "journal.cli_timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    /// The retry delay.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    /// Directory of the trade-phase journal.
    pub fn trade_data_dir(&self) -> PathBuf {
        self.data_dir.join("trade_data")
    }
}
