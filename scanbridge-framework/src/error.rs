//! Error types for the bridge framework.

use thiserror::Error;

/// Result type alias using [`BridgeError`].
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors that can occur in a bridge.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file not found.
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Configuration parse error.
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// Configuration validation error.
    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    /// A connect attempt to the broker failed.
    #[error("Broker connection error: {0}")]
    BrokerConnection(String),

    /// The publisher is not connected to the broker.
    #[error("Not connected to broker")]
    NotConnected,

    /// The broker connection failed while publishing.
    #[error("Failed to publish to {topic}: {message}")]
    Publish { topic: String, message: String },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The bridge is shutting down.
    #[error("Shutdown in progress")]
    Shutdown,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a configuration validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ConfigValidation(msg.into())
    }

    /// Create a broker connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::BrokerConnection(msg.into())
    }

    /// Create a publish error for a topic.
    pub fn publish(topic: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Publish {
            topic: topic.into(),
            message: msg.into(),
        }
    }
}

impl From<scanbridge_common::Error> for BridgeError {
    fn from(err: scanbridge_common::Error) -> Self {
        match err {
            scanbridge_common::Error::Io(e) => Self::Io(e),
            scanbridge_common::Error::Topic(msg) => Self::ConfigValidation(msg),
            scanbridge_common::Error::Config(msg) => Self::Config(msg),
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<json5::Error> for BridgeError {
    fn from(err: json5::Error) -> Self {
        Self::ConfigParse(err.to_string())
    }
}
