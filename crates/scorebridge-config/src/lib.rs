#![deny(unsafe_code)]

//! Configuration loading and validation for scorebridge.
//!
//! Loads TOML configuration files and validates them. Provides the
//! [`BridgeConfig`] type as the single configuration value that is handed to
//! every component at construction; nothing reads configuration from globals.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default Unix socket path clients connect to.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/scorebridge.sock";

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("no backend address configured (set --grpc-address or backend.address)")]
    MissingBackendAddress,

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Path of the Unix domain socket served to local clients.
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Exchange backend configuration.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            backend: BackendConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_socket_path() -> PathBuf {
    PathBuf::from(DEFAULT_SOCKET_PATH)
}

/// Configuration for the remote exchange service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// gRPC address of the exchange service, e.g. `10.0.0.5:50051` or
    /// `http://exchange.local:50051`. Required; there is no default.
    #[serde(default)]
    pub address: Option<String>,

    /// Upper bound on establishing the channel, in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// What a failed `get` fetch does to the bridge.
    #[serde(default)]
    pub on_failure: BackendFailurePolicy,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            address: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            on_failure: BackendFailurePolicy::default(),
        }
    }
}

fn default_connect_timeout_secs() -> u64 {
    5
}

/// Reaction to a backend failure while serving a `get` command.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum BackendFailurePolicy {
    /// Close the offending client connection and keep serving.
    #[default]
    Disconnect,
    /// Stop serving and shut the bridge down with a failure status.
    Exit,
}

impl BackendFailurePolicy {
    /// Whether a backend failure under this policy ends the process.
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::Exit)
    }
}

impl fmt::Display for BackendFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnect => f.write_str("disconnect"),
            Self::Exit => f.write_str("exit"),
        }
    }
}

impl FromStr for BackendFailurePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disconnect" => Ok(Self::Disconnect),
            "exit" => Ok(Self::Exit),
            other => Err(ConfigError::Validation(format!(
                "unknown backend failure policy '{other}' (expected 'disconnect' or 'exit')"
            ))),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "trace").
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl BridgeConfig {
    /// Load configuration from a TOML file.
    ///
    /// The backend address may still be absent after loading; it is usually
    /// supplied on the command line, so [`BridgeConfig::backend_address`] is
    /// the check that enforces it.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        let config = Self::parse(&content)?;
        debug!(path = %path.display(), "Loaded configuration file");
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: BridgeConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate field values that do not depend on CLI overrides.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.socket_path.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "socket_path must not be empty".to_string(),
            ));
        }
        if self.backend.connect_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "backend.connect_timeout_secs must be non-zero".to_string(),
            ));
        }
        if let Some(address) = &self.backend.address
            && address.trim().is_empty()
        {
            return Err(ConfigError::Validation(
                "backend.address must not be empty when set".to_string(),
            ));
        }
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "logging.level must be one of {valid_levels:?}, got '{}'",
                self.logging.level
            )));
        }
        Ok(())
    }

    /// The configured backend address, or an error if none was given.
    pub fn backend_address(&self) -> Result<&str, ConfigError> {
        match self.backend.address.as_deref().map(str::trim) {
            Some(address) if !address.is_empty() => Ok(address),
            _ => Err(ConfigError::MissingBackendAddress),
        }
    }
}
