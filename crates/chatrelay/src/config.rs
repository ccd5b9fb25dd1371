//! Relay configuration.

use std::num::ParseIntError;

use serde::{Deserialize, Serialize};

/// Capacity of every action and handoff channel unless configured.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Environment variable naming the host to bind.
pub const HOST_VAR: &str = "HOST_IP";
/// Environment variable naming the TCP port clients connect to.
pub const TCP_PORT_VAR: &str = "TCP_PORT";
/// Environment variable naming the API port.
pub const API_PORT_VAR: &str = "API_PORT";

/// Errors from loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required variable is unset or empty.
    #[error("missing required setting {0}")]
    Missing(&'static str),

    /// A port variable is not a valid `u16`.
    #[error("{var}={value:?} is not a valid port: {source}")]
    InvalidPort {
        var: &'static str,
        value: String,
        #[source]
        source: ParseIntError,
    },
}

/// Settings for one relay process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Host or IP to bind the TCP listener on.
    pub host: String,

    /// Port for client connections. `0` lets the OS choose.
    pub tcp_port: u16,

    /// Port reserved for an HTTP API. Validated and stored; nothing
    /// listens on it yet.
    pub api_port: u16,

    /// Bound on every action and handoff channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

impl RelayConfig {
    pub fn new(host: impl Into<String>, tcp_port: u16, api_port: u16) -> Self {
        Self {
            host: host.into(),
            tcp_port,
            api_port,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Reads `HOST_IP`, `TCP_PORT` and `API_PORT` from the process
    /// environment. All three are required.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Builds a config from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |var: &'static str| {
            lookup(var)
                .filter(|value| !value.trim().is_empty())
                .ok_or(ConfigError::Missing(var))
        };
        let port = |var: &'static str| -> Result<u16, ConfigError> {
            let value = required(var)?;
            value
                .trim()
                .parse::<u16>()
                .map_err(|source| ConfigError::InvalidPort {
                    var,
                    value,
                    source,
                })
        };

        let host = required(HOST_VAR)?;
        let tcp_port = port(TCP_PORT_VAR)?;
        let api_port = port(API_PORT_VAR)?;
        Ok(Self::new(host.trim(), tcp_port, api_port))
    }

    /// Sets the channel capacity. Values below 1 are raised to 1.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// `host:tcp_port`, ready for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.tcp_port)
    }
}
