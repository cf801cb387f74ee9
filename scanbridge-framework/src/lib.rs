//! Scanner Bridge Framework
//!
//! Building blocks for bridges that forward device data to an MQTT broker.
//!
//! # Overview
//!
//! This framework provides:
//! - [`BridgeConfig`] trait for configuration loading and validation
//! - [`BridgeRunner`] for managing bridge lifecycle (startup, shutdown, signal handling)
//! - [`PublisherSupervisor`], the single owner of the broker connection
//! - [`Forwarder`] for publishing device payloads with one reconnect-and-retry
//! - [`BridgeArgs`] for common CLI argument parsing
//! - [`BridgeStatus`] for standardized status reporting
//!
//! # Example
//!
//! ```ignore
//! use scanbridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = BridgeArgs::parse_with_default("mybridge.json5");
//!     let config = MyBridgeConfig::load(&args.config)?;
//!
//!     let mut runner = BridgeRunner::new("mybridge", config, Some(&args))?;
//!
//!     // Register protocol-specific workers
//!     let forwarder = runner.forwarder();
//!     runner.supervise("worker", move |cancel| my_worker(forwarder.clone(), cancel));
//!
//!     // Run until Ctrl+C
//!     runner.run().await?;
//!     Ok(())
//! }
//! ```

mod args;
mod config;
mod connector;
mod error;
mod forwarder;
mod mqtt;
mod runner;
mod signal;
mod status;
mod supervisor;

#[cfg(test)]
mod testing;

pub use args::BridgeArgs;
pub use config::BridgeConfig;
pub use connector::{BrokerClient, BrokerConnector, BrokerEvent, DisconnectNotifier};
pub use error::{BridgeError, Result};
pub use forwarder::{ForwardOutcome, ForwardStats, ForwardStatsSnapshot, Forwarder, Payload};
pub use mqtt::MqttConnector;
pub use runner::{BridgeRunner, SHUTDOWN_GRACE};
pub use signal::wait_for_shutdown_signal;
pub use status::{BridgeStatus, StatusPublisher};
pub use supervisor::{DEFAULT_RECONNECT_INTERVAL, PublisherState, PublisherSupervisor};

// Re-export commonly used types from scanbridge-common
pub use scanbridge_common::{BrokerConfig, LogFormat, LoggingConfig, validate_publish_topic};
