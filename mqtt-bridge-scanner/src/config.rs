//! Configuration for the scanner bridge.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use scanbridge_common::validate_publish_topic;
use scanbridge_framework::{BridgeConfig, BridgeError, BrokerConfig, LoggingConfig};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Device {device}: invalid topic: {reason}")]
    InvalidTopic { device: String, reason: String },
    #[error("Device {0} is configured more than once")]
    DuplicateDevice(String),
}

impl From<ConfigError> for BridgeError {
    fn from(e: ConfigError) -> Self {
        BridgeError::validation(e.to_string())
    }
}

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerBridgeConfig {
    /// MQTT broker connection settings
    pub broker: BrokerConfig,

    /// Bridge behaviour (backoff, timeouts, status)
    #[serde(default)]
    pub bridge: BridgeSettings,

    /// Scanner devices to read from
    pub devices: Vec<DeviceSpec>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Bridge-wide settings shared by every device link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeSettings {
    /// Fixed delay before retrying any failed connection (default: 5)
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_secs: u64,

    /// Device TCP connect timeout (default: 10)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Maximum bytes per read; each read becomes one message (default: 1024)
    #[serde(default = "default_read_chunk_size")]
    pub read_chunk_size: usize,

    /// Topic for retained bridge status messages
    #[serde(default)]
    pub status_topic: Option<String>,
}

fn default_reconnect_interval() -> u64 {
    5
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_read_chunk_size() -> usize {
    1024
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            reconnect_interval_secs: default_reconnect_interval(),
            connect_timeout_secs: default_connect_timeout(),
            read_chunk_size: default_read_chunk_size(),
            status_topic: None,
        }
    }
}

impl BridgeSettings {
    /// Backoff between connection attempts.
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs)
    }

    /// Device connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// One scanner device: where to read from and where to publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSpec {
    /// Host name or IP address
    pub address: String,
    /// TCP port
    pub port: u16,
    /// MQTT topic for this device's data
    pub topic: String,
}

impl DeviceSpec {
    /// Create a device spec.
    pub fn new(address: impl Into<String>, port: u16, topic: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port,
            topic: topic.into(),
        }
    }

    /// Device identity, `address:port`.
    pub fn id(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

impl fmt::Display for DeviceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

impl ScannerBridgeConfig {
    /// Validate the device list and bridge settings.
    pub fn validate_devices(&self) -> Result<(), ConfigError> {
        if self.devices.is_empty() {
            return Err(ConfigError::Validation(
                "At least one device must be configured".to_string(),
            ));
        }

        if self.bridge.reconnect_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "bridge.reconnect_interval_secs must be greater than 0".to_string(),
            ));
        }

        if self.bridge.connect_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "bridge.connect_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.bridge.read_chunk_size == 0 {
            return Err(ConfigError::Validation(
                "bridge.read_chunk_size must be greater than 0".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for device in &self.devices {
            if device.address.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "Device address cannot be empty".to_string(),
                ));
            }

            if device.port == 0 {
                return Err(ConfigError::Validation(format!(
                    "Device {}: port must be 1-65535",
                    device
                )));
            }

            validate_publish_topic(&device.topic).map_err(|e| ConfigError::InvalidTopic {
                device: device.id(),
                reason: e.to_string(),
            })?;

            if !seen.insert((device.address.as_str(), device.port)) {
                return Err(ConfigError::DuplicateDevice(device.id()));
            }
        }

        Ok(())
    }
}

impl BridgeConfig for ScannerBridgeConfig {
    fn broker(&self) -> &BrokerConfig {
        &self.broker
    }

    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn status_topic(&self) -> Option<&str> {
        self.bridge.status_topic.as_deref()
    }

    fn reconnect_interval(&self) -> Duration {
        self.bridge.reconnect_interval()
    }

    fn validate(&self) -> scanbridge_framework::Result<()> {
        self.broker
            .validate()
            .map_err(|e| BridgeError::validation(e.to_string()))?;
        if let Some(topic) = self.status_topic() {
            validate_publish_topic(topic)?;
        }
        self.validate_devices()?;
        Ok(())
    }
}
