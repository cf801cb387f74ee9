//! Scanner bridge common library
//!
//! Shared types and utilities for bridges that republish device data to an
//! MQTT broker:
//!
//! - [`config`] - Broker and logging configuration, JSON5 loading
//! - [`mqtt`] - MQTT client options built from configuration
//! - [`topic`] - MQTT topic name validation
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod mqtt;
pub mod topic;

// Re-export commonly used types at the crate root
pub use config::{BrokerConfig, LogFormat, LoggingConfig, load_config, parse_config};
pub use error::{Error, Result};
pub use mqtt::{mqtt_options, qos};
pub use topic::validate_publish_topic;

/// Initialize tracing with the given configuration.
///
/// Supports two output formats:
/// - `LogFormat::Text` (default): Human-readable text format
/// - `LogFormat::Json`: Structured JSON format for log aggregation systems
///
/// `RUST_LOG`, when set, takes precedence over the configured level.
///
/// # Example
///
/// ```ignore
/// use scanbridge_common::{LoggingConfig, LogFormat, init_tracing};
///
/// let config = LoggingConfig {
///     level: "info".to_string(),
///     format: LogFormat::Json,
/// };
/// init_tracing(&config)?;
/// ```
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
    }

    Ok(())
}
