//! Hand-off of device payloads to the shared publisher.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::supervisor::PublisherSupervisor;

/// One chunk of device data bound for a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    /// Destination topic.
    pub topic: String,
    /// Decoded device text.
    pub text: String,
}

impl Payload {
    /// Create a payload.
    pub fn new(topic: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            text: text.into(),
        }
    }

    /// Wire bytes (UTF-8).
    pub fn as_bytes(&self) -> &[u8] {
        self.text.as_bytes()
    }
}

/// What happened to a forwarded payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// Published on the first try.
    Delivered,
    /// Published after one forced reconnect.
    DeliveredAfterRetry,
    /// Not published; the payload is gone.
    Dropped,
}

/// Delivery counters shared by every device.
#[derive(Debug, Default)]
pub struct ForwardStats {
    delivered: AtomicU64,
    retried: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time copy of [`ForwardStats`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardStatsSnapshot {
    /// Payloads published on the first try.
    pub delivered: u64,
    /// Payloads published after a forced reconnect.
    pub delivered_after_retry: u64,
    /// Payloads dropped.
    pub dropped: u64,
}

impl ForwardStatsSnapshot {
    /// Total number of payloads handled.
    pub fn total(&self) -> u64 {
        self.delivered + self.delivered_after_retry + self.dropped
    }

    /// Delivery rate as a percentage.
    pub fn delivery_rate(&self) -> f64 {
        if self.total() == 0 {
            100.0
        } else {
            ((self.delivered + self.delivered_after_retry) as f64 / self.total() as f64) * 100.0
        }
    }
}

impl ForwardStats {
    fn record(&self, outcome: ForwardOutcome) {
        let counter = match outcome {
            ForwardOutcome::Delivered => &self.delivered,
            ForwardOutcome::DeliveredAfterRetry => &self.retried,
            ForwardOutcome::Dropped => &self.dropped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Read the current counters.
    pub fn snapshot(&self) -> ForwardStatsSnapshot {
        ForwardStatsSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            delivered_after_retry: self.retried.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Publishes payloads for device links, with exactly one reconnect-and-retry.
///
/// If the first publish fails, the forwarder forces one reconnect attempt
/// and, if that succeeds, publishes once more. Anything still failing is
/// logged and dropped so the calling device never waits for a full broker
/// recovery. Full recovery is left to the supervisor's own reconnect loop.
#[derive(Clone)]
pub struct Forwarder {
    supervisor: Arc<PublisherSupervisor>,
    stats: Arc<ForwardStats>,
}

impl Forwarder {
    /// Create a forwarder over the shared supervisor.
    pub fn new(supervisor: Arc<PublisherSupervisor>) -> Self {
        Self {
            supervisor,
            stats: Arc::new(ForwardStats::default()),
        }
    }

    /// Shared delivery counters.
    pub fn stats(&self) -> &Arc<ForwardStats> {
        &self.stats
    }

    /// Forward one payload.
    pub async fn publish(&self, payload: &Payload) -> ForwardOutcome {
        let outcome = self.forward(payload).await;
        self.stats.record(outcome);
        outcome
    }

    async fn forward(&self, payload: &Payload) -> ForwardOutcome {
        let topic = payload.topic.as_str();

        let first = match self.supervisor.publish(topic, payload.as_bytes()).await {
            Ok(()) => {
                tracing::debug!(topic, bytes = payload.text.len(), "Forwarded payload");
                return ForwardOutcome::Delivered;
            }
            Err(e) => e,
        };

        tracing::warn!(topic, error = %first, "Publish failed, forcing broker reconnect");

        if let Err(e) = self.supervisor.reconnect_now().await {
            tracing::error!(
                topic,
                bytes = payload.text.len(),
                error = %e,
                "Broker reconnect failed, dropping payload"
            );
            return ForwardOutcome::Dropped;
        }

        match self.supervisor.publish(topic, payload.as_bytes()).await {
            Ok(()) => {
                tracing::info!(topic, "Forwarded payload after reconnect");
                ForwardOutcome::DeliveredAfterRetry
            }
            Err(e) => {
                tracing::error!(
                    topic,
                    bytes = payload.text.len(),
                    error = %e,
                    "Retry failed, dropping payload"
                );
                ForwardOutcome::Dropped
            }
        }
    }
}
