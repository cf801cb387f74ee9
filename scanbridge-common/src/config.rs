use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// MQTT broker connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Broker host name or IP address.
    pub host: String,

    /// Broker TCP port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// MQTT client identifier.
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Ask the broker to keep session state across reconnects
    /// (MQTT `clean_session = false`).
    #[serde(default = "default_persistent_session")]
    pub persistent_session: bool,

    /// Keep-alive interval in seconds.
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// Time allowed for the TCP connect plus CONNACK, in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Capacity of the client's outbound request queue.
    #[serde(default = "default_request_capacity")]
    pub request_capacity: usize,

    /// QoS level used for published payloads (0, 1 or 2).
    #[serde(default)]
    pub qos: u8,
}

/// Smallest keep-alive interval accepted by the MQTT client.
pub const MIN_KEEP_ALIVE_SECS: u64 = 5;

fn default_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "scanner-bridge".to_string()
}

fn default_persistent_session() -> bool {
    true
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_capacity() -> usize {
    64
}

impl BrokerConfig {
    /// Create a broker configuration with defaults for everything but the host.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            client_id: default_client_id(),
            persistent_session: default_persistent_session(),
            keep_alive_secs: default_keep_alive_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_capacity: default_request_capacity(),
            qos: 0,
        }
    }

    /// `host:port` for logging.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validate the broker settings.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::Config("broker host cannot be empty".to_string()));
        }
        if self.port == 0 {
            return Err(Error::Config("broker port cannot be 0".to_string()));
        }
        if self.client_id.is_empty() {
            return Err(Error::Config("broker client_id cannot be empty".to_string()));
        }
        if self.qos > 2 {
            return Err(Error::Config(format!(
                "invalid qos {} (use 0, 1 or 2)",
                self.qos
            )));
        }
        if self.keep_alive_secs < MIN_KEEP_ALIVE_SECS {
            return Err(Error::Config(format!(
                "broker keep_alive_secs must be at least {}",
                MIN_KEEP_ALIVE_SECS
            )));
        }
        if self.request_capacity == 0 {
            return Err(Error::Config(
                "broker request_capacity must be at least 1".to_string(),
            ));
        }
        if self.connect_timeout_secs == 0 {
            return Err(Error::Config(
                "broker connect_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format (default).
    #[default]
    Text,
    /// Structured JSON format.
    Json,
}

/// Common logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Load a configuration file in JSON5 format.
pub fn load_config<T: for<'de> Deserialize<'de>>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    json5::from_str(&content).map_err(|e| {
        Error::Config(format!(
            "Failed to parse config file '{}': {}",
            path.display(),
            e
        ))
    })
}

/// Load a configuration from a JSON5 string.
pub fn parse_config<T: for<'de> Deserialize<'de>>(content: &str) -> Result<T> {
    json5::from_str(content).map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
}
