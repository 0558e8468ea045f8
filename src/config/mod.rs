//! Application configuration
//!
//! Defaults can be overridden by a TOML file (path in `CHAT_CONFIG`) and then
//! by individual environment variables.
//!
//! # Example
//!
//! ```toml
//! [stream]
//! endpoint = "http://localhost:8504/query-stream"
//! connect_timeout_secs = 10
//!
//! [store]
//! exclusive_sends = false
//! ```

use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::StoreOptions;

pub const DEFAULT_ENDPOINT: &str = "http://localhost:8504/query-stream";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub stream: StreamConfig,

    #[serde(default)]
    pub store: StoreConfig,
}

/// Where answers are streamed from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl StreamConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Reject new questions while an answer is streaming
    #[serde(default)]
    pub exclusive_sends: bool,
}

impl From<&StoreConfig> for StoreOptions {
    fn from(config: &StoreConfig) -> Self {
        StoreOptions {
            exclusive_sends: config.exclusive_sends,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from a variable lookup, so callers other than the process
    /// environment can supply values
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = match lookup("CHAT_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };

        if let Some(endpoint) = lookup("CHAT_STREAM_ENDPOINT") {
            config.stream.endpoint = endpoint;
        }
        if let Some(secs) = lookup("CHAT_CONNECT_TIMEOUT_SECS") {
            config.stream.connect_timeout_secs = secs.trim().parse().map_err(|_| {
                ConfigError::Validation(format!("CHAT_CONNECT_TIMEOUT_SECS is not a number: {}", secs))
            })?;
        }
        if let Some(flag) = lookup("CHAT_EXCLUSIVE_SENDS") {
            config.store.exclusive_sends = parse_flag(&flag);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = reqwest::Url::parse(&self.stream.endpoint).map_err(|e| {
            ConfigError::Validation(format!("invalid endpoint '{}': {}", self.stream.endpoint, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Validation(format!(
                "endpoint must be http or https, got '{}'",
                url.scheme()
            )));
        }
        Ok(())
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}
