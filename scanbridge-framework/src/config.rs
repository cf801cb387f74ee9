//! Configuration traits and utilities.

use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::error::{BridgeError, Result};
use crate::supervisor::DEFAULT_RECONNECT_INTERVAL;
use crate::{BrokerConfig, LoggingConfig};

/// Trait for bridge configuration types.
///
/// Implement this trait for your bridge's configuration struct to get
/// automatic loading, validation, and access to common config fields.
///
/// # Example
///
/// ```ignore
/// use serde::Deserialize;
/// use scanbridge_framework::{BridgeConfig, BridgeError, BrokerConfig, LoggingConfig};
///
/// #[derive(Debug, Deserialize)]
/// pub struct MyBridgeConfig {
///     pub broker: BrokerConfig,
///     pub logging: LoggingConfig,
///     pub devices: Vec<MyDevice>,
/// }
///
/// impl BridgeConfig for MyBridgeConfig {
///     fn broker(&self) -> &BrokerConfig {
///         &self.broker
///     }
///
///     fn logging(&self) -> &LoggingConfig {
///         &self.logging
///     }
///
///     fn validate(&self) -> scanbridge_framework::Result<()> {
///         if self.devices.is_empty() {
///             return Err(BridgeError::validation("At least one device required"));
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait BridgeConfig: Sized + DeserializeOwned {
    /// Get the broker configuration.
    fn broker(&self) -> &BrokerConfig;

    /// Get the logging configuration.
    fn logging(&self) -> &LoggingConfig;

    /// Topic for retained bridge status messages, if status reporting is enabled.
    fn status_topic(&self) -> Option<&str> {
        None
    }

    /// Fixed delay before retrying any failed connection.
    fn reconnect_interval(&self) -> Duration {
        DEFAULT_RECONNECT_INTERVAL
    }

    /// Validate the configuration.
    ///
    /// Called automatically after loading. Override to add custom validation;
    /// the default checks the broker settings and the status topic.
    fn validate(&self) -> Result<()> {
        self.broker()
            .validate()
            .map_err(|e| BridgeError::validation(e.to_string()))?;
        if let Some(topic) = self.status_topic() {
            scanbridge_common::validate_publish_topic(topic)?;
        }
        Ok(())
    }

    /// Load configuration from a file path.
    ///
    /// Supports JSON5 format. Calls [`validate`](Self::validate) after loading.
    fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(BridgeError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate configuration from a JSON5 string.
    fn parse(content: &str) -> Result<Self> {
        let config: Self = json5::from_str(content)?;

        config.validate()?;

        Ok(config)
    }
}
