//! Scanner device links.
//!
//! A [`DeviceLink`] owns the TCP connection to one scanner. It alternates
//! between a connect phase (retrying forever with a fixed backoff) and a read
//! phase (each read becomes one payload) until cancelled.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use scanbridge_framework::{DEFAULT_RECONNECT_INTERVAL, ForwardOutcome, Forwarder, Payload};

use crate::config::{BridgeSettings, DeviceSpec};

/// Default device connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default read size; one read is one message.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 1024;

/// Connection state of a device link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Disconnected => write!(f, "disconnected"),
            LinkState::Connecting => write!(f, "connecting"),
            LinkState::Connected => write!(f, "connected"),
        }
    }
}

/// How a read phase ended.
enum ReadEnd {
    /// Peer closed the connection.
    Closed,
    /// The socket reported an error.
    Failed,
    /// Shutdown was requested.
    Cancelled,
}

/// Upstream connection manager for one scanner device.
pub struct DeviceLink {
    spec: DeviceSpec,
    device: String,
    forwarder: Forwarder,
    reconnect_interval: Duration,
    connect_timeout: Duration,
    chunk_size: usize,
    state: watch::Sender<LinkState>,
    connect_attempts: AtomicU64,
}

impl DeviceLink {
    /// Create a link with default timings.
    pub fn new(spec: DeviceSpec, forwarder: Forwarder) -> Self {
        let (state, _) = watch::channel(LinkState::Disconnected);
        Self {
            device: spec.id(),
            spec,
            forwarder,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            chunk_size: DEFAULT_READ_CHUNK_SIZE,
            state,
            connect_attempts: AtomicU64::new(0),
        }
    }

    /// Create a link with timings from the bridge settings.
    pub fn from_settings(spec: DeviceSpec, forwarder: Forwarder, settings: &BridgeSettings) -> Self {
        Self::new(spec, forwarder)
            .with_reconnect_interval(settings.reconnect_interval())
            .with_connect_timeout(settings.connect_timeout())
            .with_chunk_size(settings.read_chunk_size)
    }

    /// Set the fixed backoff between connection attempts.
    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    /// Set the TCP connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the maximum number of bytes per read.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn spec(&self) -> &DeviceSpec {
        &self.spec
    }

    /// Current state.
    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    /// Number of TCP connect attempts made so far.
    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts.load(Ordering::Relaxed)
    }

    /// Run the link until `cancel` fires.
    ///
    /// Connection failures, peer closes and read errors never end the loop;
    /// each is followed by the fixed backoff and a new connect phase.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(device = %self.device, topic = %self.spec.topic, "Starting device link");

        loop {
            let Some(stream) = self.connect(&cancel).await else {
                break;
            };

            let end = self.read_until_closed(stream, &cancel).await;
            self.set_state(LinkState::Disconnected);

            match end {
                ReadEnd::Cancelled => break,
                ReadEnd::Closed | ReadEnd::Failed => {
                    info!(
                        device = %self.device,
                        retry_in_secs = self.reconnect_interval.as_secs_f64(),
                        "Device disconnected, will reconnect"
                    );
                }
            }

            if !self.backoff(&cancel).await {
                break;
            }
        }

        self.set_state(LinkState::Disconnected);
        info!(device = %self.device, "Device link stopped");
    }

    /// Connect phase: retry with the fixed backoff until connected.
    ///
    /// Returns `None` only when cancelled.
    async fn connect(&self, cancel: &CancellationToken) -> Option<TcpStream> {
        let mut failures: u64 = 0;

        loop {
            self.set_state(LinkState::Connecting);
            self.connect_attempts.fetch_add(1, Ordering::Relaxed);
            debug!(device = %self.device, "Connecting to device");

            let connect = TcpStream::connect((self.spec.address.as_str(), self.spec.port));
            let result = tokio::select! {
                _ = cancel.cancelled() => return None,
                result = tokio::time::timeout(self.connect_timeout, connect) => result,
            };

            match result {
                Ok(Ok(stream)) => {
                    self.set_state(LinkState::Connected);
                    info!(device = %self.device, failures, "Connected to device");
                    return Some(stream);
                }
                Ok(Err(e)) => {
                    failures += 1;
                    warn!(
                        device = %self.device,
                        attempt = failures,
                        error = %e,
                        retry_in_secs = self.reconnect_interval.as_secs_f64(),
                        "Device connection failed"
                    );
                }
                Err(_) => {
                    failures += 1;
                    warn!(
                        device = %self.device,
                        attempt = failures,
                        timeout_secs = self.connect_timeout.as_secs_f64(),
                        retry_in_secs = self.reconnect_interval.as_secs_f64(),
                        "Device connection timed out"
                    );
                }
            }

            self.set_state(LinkState::Disconnected);
            if !self.backoff(cancel).await {
                return None;
            }
        }
    }

    /// Read phase. The socket is closed when this returns.
    async fn read_until_closed(&self, mut stream: TcpStream, cancel: &CancellationToken) -> ReadEnd {
        let mut buf = vec![0u8; self.chunk_size];

        loop {
            let read = tokio::select! {
                _ = cancel.cancelled() => return ReadEnd::Cancelled,
                read = stream.read(&mut buf) => read,
            };

            let n = match read {
                Ok(0) => {
                    info!(device = %self.device, "Device closed the connection");
                    return ReadEnd::Closed;
                }
                Ok(n) => n,
                Err(e) => {
                    warn!(device = %self.device, error = %e, "Device read failed");
                    return ReadEnd::Failed;
                }
            };

            let text = match std::str::from_utf8(&buf[..n]) {
                Ok(text) => text,
                Err(e) => {
                    warn!(
                        device = %self.device,
                        bytes = n,
                        error = %e,
                        "Discarding chunk that is not valid UTF-8"
                    );
                    continue;
                }
            };

            debug!(device = %self.device, bytes = n, "Received data");
            let outcome = self.forwarder.publish(&Payload::new(&self.spec.topic, text)).await;
            if outcome == ForwardOutcome::Dropped {
                debug!(device = %self.device, topic = %self.spec.topic, "Payload dropped");
            }
        }
    }

    /// Sleep the fixed backoff. Returns `false` if cancelled first.
    async fn backoff(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(self.reconnect_interval) => true,
        }
    }

    fn set_state(&self, state: LinkState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(device = %self.device, from = %previous, to = %state, "Link state change");
        }
    }
}
