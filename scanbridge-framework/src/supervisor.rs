//! Supervision of the shared broker connection.
//!
//! [`PublisherSupervisor`] is the single owner of the downstream connection.
//! Device tasks publish through it concurrently while it recovers from
//! connection loss on its own.
//!
//! # State machine
//!
//! ```text
//!                 connect ok
//! Disconnected ─────────────────────────────┐
//!      │ disconnect event / failed          ▼
//!      │ forced attempt                 Connected
//!      ▼                                    │
//! Connecting ── attempt ok ─────────────────┤
//!      ▲  └── attempt failed: sleep, retry  │
//!      └──────── disconnect event ──────────┘
//! ```
//!
//! - `Connecting` means a reconnect loop owns recovery. It is entered only
//!   under the attempt gate, so at most one loop exists.
//! - Connect attempts (startup loop, reconnect loop, forced attempts from
//!   [`reconnect_now`](PublisherSupervisor::reconnect_now)) are serialized by
//!   the same gate: never two attempts in flight. A forced attempt that
//!   finds the gate taken adopts the outcome of the attempt in flight.
//! - Publishing only takes the short state lock and never waits on an
//!   attempt.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::connector::{BrokerClient, BrokerConnector, BrokerEvent, DisconnectNotifier};
use crate::error::{BridgeError, Result};

/// Fixed delay between failed connect attempts.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

/// Connection state of the publisher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PublisherState {
    /// No usable connection and no reconnect loop running.
    #[default]
    Disconnected,
    /// A connect loop is trying to (re)establish the connection.
    Connecting,
    /// A connection is established and publishes are accepted.
    Connected,
}

impl std::fmt::Display for PublisherState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PublisherState::Disconnected => write!(f, "disconnected"),
            PublisherState::Connecting => write!(f, "connecting"),
            PublisherState::Connected => write!(f, "connected"),
        }
    }
}

#[derive(Default)]
struct Inner {
    state: PublisherState,
    client: Option<Arc<dyn BrokerClient>>,
    /// Generation of the current (or most recent) connection.
    generation: u64,
}

impl Inner {
    fn state(&self) -> PublisherState {
        self.state
    }

    fn set_state(&mut self, state: PublisherState) {
        if self.state != state {
            tracing::debug!(from = %self.state, to = %state, "Publisher state change");
        }
        self.state = state;
    }
}

/// Owner of the single broker connection.
pub struct PublisherSupervisor {
    connector: Arc<dyn BrokerConnector>,
    reconnect_interval: Duration,
    cancel: CancellationToken,
    /// Serializes connect attempts and every transition into `Connecting`.
    attempt_gate: Mutex<()>,
    inner: Mutex<Inner>,
    /// Outcome of the latest connect attempt: `None` on success, else the error.
    outcomes: watch::Sender<Option<String>>,
    events: mpsc::UnboundedSender<BrokerEvent>,
    loops_active: AtomicUsize,
}

impl PublisherSupervisor {
    /// Create the supervisor and start its disconnect-event pump.
    ///
    /// No connection is made until [`connect_loop`](Self::connect_loop) runs.
    /// Cancelling `cancel` stops the pump and every reconnect loop.
    pub fn spawn(
        connector: Arc<dyn BrokerConnector>,
        reconnect_interval: Duration,
        cancel: CancellationToken,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let (events, rx) = mpsc::unbounded_channel();
        let supervisor = Arc::new(Self {
            connector,
            reconnect_interval,
            cancel,
            attempt_gate: Mutex::new(()),
            inner: Mutex::new(Inner::default()),
            outcomes: watch::Sender::new(None),
            events,
            loops_active: AtomicUsize::new(0),
        });

        let pump = tokio::spawn(Arc::clone(&supervisor).event_pump(rx));
        (supervisor, pump)
    }

    /// Broker endpoint, for logs.
    pub fn endpoint(&self) -> String {
        self.connector.endpoint()
    }

    /// Current connection state.
    pub async fn state(&self) -> PublisherState {
        self.inner.lock().await.state()
    }

    /// Whether publishes are currently accepted.
    pub async fn is_connected(&self) -> bool {
        self.state().await == PublisherState::Connected
    }

    /// Generation of the current (or most recent) connection; 0 before the first.
    pub async fn generation(&self) -> u64 {
        self.inner.lock().await.generation
    }

    /// Number of connect loops currently running (0 or 1).
    pub fn reconnect_loops_active(&self) -> usize {
        self.loops_active.load(Ordering::SeqCst)
    }

    /// Connect at startup, retrying with the fixed interval until it works.
    ///
    /// Returns `Ok` once connected (immediately if already connected) and
    /// [`BridgeError::Shutdown`] if cancelled first.
    pub async fn connect_loop(&self) -> Result<()> {
        {
            let gate = self.attempt_gate.lock().await;
            let mut inner = self.inner.lock().await;
            match inner.state() {
                PublisherState::Connected => return Ok(()),
                PublisherState::Connecting => {
                    drop(inner);
                    drop(gate);
                    return self.wait_connected().await;
                }
                PublisherState::Disconnected => {
                    inner.set_state(PublisherState::Connecting);
                    self.loops_active.fetch_add(1, Ordering::SeqCst);
                }
            }
        }

        tracing::info!(broker = %self.endpoint(), "Connecting to broker");
        self.run_connect_loop().await
    }

    /// Publish `payload` to `topic` on the current connection.
    ///
    /// Fails with [`BridgeError::NotConnected`] when there is no connection.
    /// A transport failure marks the connection as lost and is returned as is;
    /// this never retries or waits for a reconnect.
    pub async fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        self.publish_with_retain(topic, payload, false).await
    }

    /// Publish a retained message (status reporting).
    pub async fn publish_retained(&self, topic: &str, payload: &[u8]) -> Result<()> {
        self.publish_with_retain(topic, payload, true).await
    }

    async fn publish_with_retain(&self, topic: &str, payload: &[u8], retain: bool) -> Result<()> {
        let (client, generation) = {
            let inner = self.inner.lock().await;
            match (inner.state(), &inner.client) {
                (PublisherState::Connected, Some(client)) => (Arc::clone(client), inner.generation),
                _ => return Err(BridgeError::NotConnected),
            }
        };

        match client.publish(topic, payload, retain).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let mut inner = self.inner.lock().await;
                if inner.generation == generation && inner.state() == PublisherState::Connected {
                    tracing::warn!(
                        broker = %self.endpoint(),
                        generation,
                        error = %e,
                        "Publish failed, marking broker connection as lost"
                    );
                    inner.client = None;
                    inner.set_state(PublisherState::Disconnected);
                }
                Err(e)
            }
        }
    }

    /// Make one connect attempt right now, for a caller holding a payload.
    ///
    /// Returns `Ok` if the publisher is connected afterwards. If another
    /// attempt is in flight, its outcome is returned instead of starting a
    /// second one, so a caller never waits for more than one attempt. If an
    /// own attempt fails and no reconnect loop is running, one is started so
    /// recovery does not depend on further traffic.
    pub async fn reconnect_now(self: &Arc<Self>) -> Result<()> {
        // A new receiver has already seen the current outcome.
        let mut outcomes = self.outcomes.subscribe();

        let _gate = match self.attempt_gate.try_lock() {
            Ok(gate) => gate,
            Err(_) => {
                let gate = tokio::select! {
                    _ = self.cancel.cancelled() => return Err(BridgeError::Shutdown),
                    changed = outcomes.changed() => {
                        return match changed {
                            Ok(()) => Self::shared_outcome(&outcomes),
                            Err(_) => Err(BridgeError::Shutdown),
                        };
                    }
                    gate = self.attempt_gate.lock() => gate,
                };
                if outcomes.has_changed().unwrap_or(false) {
                    return Self::shared_outcome(&outcomes);
                }
                gate
            }
        };

        match self.attempt().await {
            Ok(()) => Ok(()),
            Err(e) => {
                let mut inner = self.inner.lock().await;
                if inner.state() == PublisherState::Disconnected {
                    self.start_reconnect_loop(&mut inner);
                }
                Err(e)
            }
        }
    }

    fn shared_outcome(outcomes: &watch::Receiver<Option<String>>) -> Result<()> {
        match outcomes.borrow().as_deref() {
            None => Ok(()),
            Some(reason) => Err(BridgeError::connection(reason)),
        }
    }

    /// Handle the loss of connection `generation`.
    ///
    /// Reports for connections that were already replaced are ignored, as
    /// are reports while a reconnect loop is already running. Otherwise the
    /// connection is dropped and a reconnect loop is started.
    pub async fn on_disconnect(self: &Arc<Self>, generation: u64, reason: &str) {
        let _gate = self.attempt_gate.lock().await;
        let mut inner = self.inner.lock().await;

        if generation != inner.generation {
            tracing::debug!(
                generation,
                current = inner.generation,
                reason,
                "Ignoring disconnect of a replaced connection"
            );
            return;
        }

        if inner.state() == PublisherState::Connecting {
            tracing::debug!(generation, reason, "Reconnect already in progress");
            return;
        }

        tracing::warn!(
            broker = %self.endpoint(),
            generation,
            reason,
            "Broker connection lost"
        );
        inner.client = None;
        inner.set_state(PublisherState::Disconnected);
        self.start_reconnect_loop(&mut inner);
    }

    /// Stop all loops and close the connection gracefully.
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        let client = {
            let mut inner = self.inner.lock().await;
            inner.set_state(PublisherState::Disconnected);
            inner.client.take()
        };

        if let Some(client) = client {
            if let Err(e) = client.disconnect().await {
                tracing::warn!(error = %e, "Error disconnecting from broker");
            } else {
                tracing::info!(broker = %self.endpoint(), "Disconnected from broker");
            }
        }
    }

    /// Caller must hold the attempt gate.
    fn start_reconnect_loop(self: &Arc<Self>, inner: &mut Inner) {
        if self.cancel.is_cancelled() {
            return;
        }

        inner.set_state(PublisherState::Connecting);
        self.loops_active.fetch_add(1, Ordering::SeqCst);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.run_connect_loop().await {
                tracing::debug!(error = %e, "Reconnect loop stopped");
            }
        });
    }

    /// Retry until connected or cancelled. The caller has already counted
    /// this loop in `loops_active`; it is released while holding the gate so
    /// a successor can never overlap.
    async fn run_connect_loop(&self) -> Result<()> {
        let mut failures: u64 = 0;

        loop {
            {
                let _gate = self.attempt_gate.lock().await;
                match self.attempt().await {
                    Ok(()) => {
                        self.loops_active.fetch_sub(1, Ordering::SeqCst);
                        if failures > 0 {
                            tracing::info!(
                                broker = %self.endpoint(),
                                failures,
                                "Broker connection restored"
                            );
                        }
                        return Ok(());
                    }
                    Err(BridgeError::Shutdown) => {
                        self.loops_active.fetch_sub(1, Ordering::SeqCst);
                        return Err(BridgeError::Shutdown);
                    }
                    Err(e) => {
                        failures += 1;
                        tracing::warn!(
                            broker = %self.endpoint(),
                            attempt = failures,
                            error = %e,
                            retry_in_secs = self.reconnect_interval.as_secs_f64(),
                            "Broker connection failed"
                        );
                    }
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _gate = self.attempt_gate.lock().await;
                    self.loops_active.fetch_sub(1, Ordering::SeqCst);
                    return Err(BridgeError::Shutdown);
                }
                _ = tokio::time::sleep(self.reconnect_interval) => {}
            }
        }
    }

    /// One connect attempt. Caller must hold the attempt gate.
    async fn attempt(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(BridgeError::Shutdown);
        }

        let generation = {
            let inner = self.inner.lock().await;
            if inner.state() == PublisherState::Connected {
                self.outcomes.send_replace(None);
                return Ok(());
            }
            inner.generation + 1
        };

        let notifier = DisconnectNotifier::new(generation, self.events.clone());
        let client = tokio::select! {
            _ = self.cancel.cancelled() => return Err(BridgeError::Shutdown),
            result = self.connector.connect(notifier) => match result {
                Ok(client) => client,
                Err(e) => {
                    let reason = match &e {
                        BridgeError::BrokerConnection(reason) => reason.clone(),
                        other => other.to_string(),
                    };
                    self.outcomes.send_replace(Some(reason));
                    return Err(e);
                }
            },
        };

        let mut inner = self.inner.lock().await;
        inner.generation = generation;
        inner.client = Some(client);
        inner.set_state(PublisherState::Connected);
        self.outcomes.send_replace(None);
        tracing::info!(broker = %self.endpoint(), generation, "Connected to broker");

        Ok(())
    }

    async fn wait_connected(&self) -> Result<()> {
        loop {
            if self.is_connected().await {
                return Ok(());
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(BridgeError::Shutdown),
                _ = tokio::time::sleep(Duration::from_millis(50)) => {}
            }
        }
    }

    /// Deliver disconnect events into the state machine.
    async fn event_pump(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<BrokerEvent>) {
        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => break,
                event = rx.recv() => event,
            };

            match event {
                Some(BrokerEvent::Disconnected { generation, reason }) => {
                    self.on_disconnect(generation, &reason).await;
                }
                None => break,
            }
        }
        tracing::debug!("Publisher event pump stopped");
    }
}
