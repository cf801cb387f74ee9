//! Bridge status reporting.

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::supervisor::PublisherSupervisor;

/// Bridge status information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeStatus {
    /// Bridge name (e.g., "scanner").
    pub bridge: String,
    /// Bridge version.
    pub version: String,
    /// Current status ("running", "offline").
    pub status: String,
    /// Timestamp (millis since epoch).
    pub timestamp: i64,
    /// Additional metadata (bridge-specific).
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

impl BridgeStatus {
    fn new(bridge: impl Into<String>, version: impl Into<String>, status: &str) -> Self {
        Self {
            bridge: bridge.into(),
            version: version.into(),
            status: status.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            metadata: serde_json::Value::Null,
        }
    }

    /// Create a new status with "running" state.
    pub fn running(bridge: impl Into<String>, version: impl Into<String>) -> Self {
        Self::new(bridge, version, "running")
    }

    /// Create a status with "offline" state.
    pub fn offline(bridge: impl Into<String>, version: impl Into<String>) -> Self {
        Self::new(bridge, version, "offline")
    }

    /// Add metadata to the status, nested under `metadata`.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Serialize to JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Publish this status as a retained message on `topic`.
    pub async fn publish(&self, supervisor: &PublisherSupervisor, topic: &str) -> Result<()> {
        supervisor.publish_retained(topic, &self.to_bytes()?).await
    }
}

/// Helper to publish bridge status on startup and shutdown.
pub struct StatusPublisher {
    topic: String,
    bridge_name: String,
    version: String,
}

impl StatusPublisher {
    /// Create a new status publisher.
    pub fn new(
        topic: impl Into<String>,
        bridge_name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            bridge_name: bridge_name.into(),
            version: version.into(),
        }
    }

    /// Status topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The offline status, serialized, for use as the broker's last will.
    pub fn offline_payload(&self) -> Result<Vec<u8>> {
        BridgeStatus::offline(&self.bridge_name, &self.version).to_bytes()
    }

    /// Publish "running" status with optional metadata.
    pub async fn publish_running(
        &self,
        supervisor: &PublisherSupervisor,
        metadata: Option<serde_json::Value>,
    ) -> Result<()> {
        let mut status = BridgeStatus::running(&self.bridge_name, &self.version);
        if let Some(meta) = metadata {
            status = status.with_metadata(meta);
        }
        status.publish(supervisor, &self.topic).await
    }

    /// Publish "offline" status with optional metadata.
    pub async fn publish_offline(
        &self,
        supervisor: &PublisherSupervisor,
        metadata: Option<serde_json::Value>,
    ) -> Result<()> {
        let mut status = BridgeStatus::offline(&self.bridge_name, &self.version);
        if let Some(meta) = metadata {
            status = status.with_metadata(meta);
        }
        status.publish(supervisor, &self.topic).await
    }
}
