//! Server configuration.
//!
//! The configuration is read from a YAML document shaped like:
//!
//! ```yaml
//! engine:
//!   type: "in_memory"
//! network:
//!   address: "127.0.0.1:3223"
//!   max_connections: 100
//!   max_message_size: "4KB"
//!   idle_timeout: 5m
//! logging:
//!   level: "info"
//!   output: "stdout"
//! ```
//!
//! Every section and field is optional; missing ones take the defaults
//! below. The server core only ever sees an already validated `Config`.

use serde::{Deserialize, Deserializer};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Full configuration of a server process.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub network: NetworkConfig,
    pub logging: LoggingConfig,
}

/// Storage engine selection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    #[serde(rename = "type")]
    pub kind: EngineKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    #[default]
    #[serde(alias = "in-memory")]
    InMemory,
}

/// Listener and session limits.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the listener binds to.
    pub address: String,

    /// Capacity of the admission pool.
    pub max_connections: usize,

    /// Longest accepted request line, in bytes. Accepts plain integers or
    /// sizes such as `4KB`.
    #[serde(deserialize_with = "deserialize_size")]
    pub max_message_size: usize,

    /// How long a session may wait for the next line, or for a response to
    /// be written. Accepts integers (seconds) or durations such as `5m`.
    #[serde(deserialize_with = "deserialize_duration")]
    pub idle_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `trace`, `debug`, `info`, `warn` or `error`.
    pub level: String,

    /// `stdout`, `stderr` or a file path logs are appended to.
    pub output: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid size '{0}'")]
    InvalidSize(String),

    #[error("invalid duration '{0}'")]
    InvalidDuration(String),

    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}

impl Default for NetworkConfig {
    fn default() -> NetworkConfig {
        NetworkConfig {
            address: crate::DEFAULT_ADDRESS.to_string(),
            max_connections: 20,
            max_message_size: 1024,
            idle_timeout: Duration::from_secs(60),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> LoggingConfig {
        LoggingConfig {
            level: "debug".to_string(),
            output: "stdout".to_string(),
        }
    }
}

impl Config {
    /// Reads, parses and validates the file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Config::from_yaml(&text)
    }

    /// Parses and validates a YAML document.
    pub fn from_yaml(text: &str) -> Result<Config, ConfigError> {
        // An empty document is a valid, all-defaults configuration.
        let config: Config = if text.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(text)?
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.network.validate()
    }
}

impl NetworkConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.address.trim().is_empty() {
            return Err(ConfigError::Invalid("network.address is empty"));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid("network.max_connections must be positive"));
        }
        if self.max_message_size == 0 {
            return Err(ConfigError::Invalid("network.max_message_size must be positive"));
        }
        if self.idle_timeout.is_zero() {
            return Err(ConfigError::Invalid("network.idle_timeout must be positive"));
        }
        Ok(())
    }
}

/// Size or duration as written in YAML: a bare integer or a string with a
/// unit suffix.
#[derive(Deserialize)]
#[serde(untagged)]
enum Quantity {
    Number(u64),
    Text(String),
}

fn deserialize_size<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    let size = match Quantity::deserialize(deserializer)? {
        Quantity::Number(n) => usize::try_from(n).map_err(|_| ConfigError::InvalidSize(n.to_string())),
        Quantity::Text(text) => parse_size(&text),
    };

    size.map_err(serde::de::Error::custom)
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let duration = match Quantity::deserialize(deserializer)? {
        Quantity::Number(secs) => Ok(Duration::from_secs(secs)),
        Quantity::Text(text) => parse_duration(&text),
    };

    duration.map_err(serde::de::Error::custom)
}

/// Splits `"10MB"` into `(10, "MB")`. The number must be a positive
/// integer made only of ASCII digits.
fn split_quantity(text: &str) -> Option<(u64, &str)> {
    let end = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    let (digits, unit) = text.split_at(end);

    match atoi::atoi::<u64>(digits.as_bytes()) {
        Some(0) | None => None,
        Some(n) => Some((n, unit.trim())),
    }
}

/// Parses `<n>B`, `<n>KB`, `<n>MB` or `<n>GB`, with binary multiples. A bare
/// number is a byte count.
pub fn parse_size(text: &str) -> Result<usize, ConfigError> {
    let invalid = || ConfigError::InvalidSize(text.to_string());

    let (n, unit) = split_quantity(text.trim()).ok_or_else(invalid)?;
    let multiplier: u64 = match unit {
        "" | "B" => 1,
        "KB" => 1024,
        "MB" => 1024 * 1024,
        "GB" => 1024 * 1024 * 1024,
        _ => return Err(invalid()),
    };

    n.checked_mul(multiplier)
        .and_then(|bytes| usize::try_from(bytes).ok())
        .ok_or_else(invalid)
}

/// Parses `<n>ms`, `<n>s`, `<n>m` or `<n>h`. A bare number is seconds.
pub fn parse_duration(text: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidDuration(text.to_string());

    let (n, unit) = split_quantity(text.trim()).ok_or_else(invalid)?;
    let duration = match unit {
        "ms" => Duration::from_millis(n),
        "" | "s" => Duration::from_secs(n),
        "m" => Duration::from_secs(n.checked_mul(60).ok_or_else(invalid)?),
        "h" => Duration::from_secs(n.checked_mul(60 * 60).ok_or_else(invalid)?),
        _ => return Err(invalid()),
    };

    Ok(duration)
}
