//! Broker connection abstraction.
//!
//! The supervisor never talks to an MQTT client directly. It asks a
//! [`BrokerConnector`] for a fresh connection and receives a
//! [`BrokerClient`] handle. Connection loss is reported back through the
//! [`DisconnectNotifier`] handed to `connect`, which turns the client
//! library's network-loop failure into a [`BrokerEvent`] message for the
//! supervisor's state machine.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

/// Events delivered from a connection's network loop to the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    /// The connection with the given generation was lost.
    Disconnected { generation: u64, reason: String },
}

/// Reports the loss of one specific broker connection.
///
/// Each successful connect gets its own notifier tagged with the
/// connection's generation, so late reports from replaced connections can
/// be told apart from the live one. Firing consumes the notifier.
#[derive(Debug)]
pub struct DisconnectNotifier {
    generation: u64,
    events: mpsc::UnboundedSender<BrokerEvent>,
}

impl DisconnectNotifier {
    pub(crate) fn new(generation: u64, events: mpsc::UnboundedSender<BrokerEvent>) -> Self {
        Self { generation, events }
    }

    /// Generation of the connection this notifier belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Report that the connection was lost.
    pub fn notify(self, reason: impl Into<String>) {
        let event = BrokerEvent::Disconnected {
            generation: self.generation,
            reason: reason.into(),
        };
        if self.events.send(event).is_err() {
            tracing::debug!(
                generation = self.generation,
                "Supervisor gone, dropping disconnect notification"
            );
        }
    }
}

/// Handle to one established broker connection.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Publish `payload` to `topic`.
    ///
    /// An error means the connection can no longer be trusted.
    async fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> Result<()>;

    /// Close the connection gracefully.
    async fn disconnect(&self) -> Result<()>;
}

/// Factory for broker connections.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Human-readable broker endpoint for logs.
    fn endpoint(&self) -> String;

    /// Establish a new connection.
    ///
    /// Resolves once the broker has accepted the session. The implementation
    /// must fire `notifier` when this connection is later lost.
    async fn connect(&self, notifier: DisconnectNotifier) -> Result<Arc<dyn BrokerClient>>;
}
