//! Shared helpers for the scanner bridge integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpListener;

use scanbridge_framework::{BridgeError, BrokerClient, BrokerConnector, DisconnectNotifier, Result};

/// In-memory broker recording every publish.
#[derive(Default)]
pub struct RecordingBroker {
    pub refuse: AtomicBool,
    pub fail_publish: AtomicBool,
    /// Time each connect attempt takes before it resolves, in millis.
    pub connect_delay_ms: AtomicU64,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    published: Mutex<Vec<(String, String)>>,
    notifiers: Mutex<Vec<DisconnectNotifier>>,
}

impl RecordingBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connector(self: &Arc<Self>) -> Arc<dyn BrokerConnector> {
        Arc::new(RecordingConnector(Arc::clone(self)))
    }

    /// Publishes so far as (topic, text).
    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().unwrap().clone()
    }

    /// Publishes on `topic`, text only.
    pub fn published_on(&self, topic: &str) -> Vec<String> {
        self.published()
            .into_iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, text)| text)
            .collect()
    }

    /// Simulate the broker dropping the newest connection.
    pub fn drop_connection(&self, reason: &str) {
        if let Some(notifier) = self.notifiers.lock().unwrap().pop() {
            notifier.notify(reason);
        }
    }

    /// Wait until at least `count` messages were published on `topic`.
    pub async fn wait_for_publishes(&self, topic: &str, count: usize) -> Vec<String> {
        for _ in 0..200 {
            let texts = self.published_on(topic);
            if texts.len() >= count {
                return texts;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "expected {} publishes on {}, got {:?}",
            count,
            topic,
            self.published_on(topic)
        );
    }
}

struct RecordingConnector(Arc<RecordingBroker>);

struct RecordingClient(Arc<RecordingBroker>);

#[async_trait]
impl BrokerConnector for RecordingConnector {
    fn endpoint(&self) -> String {
        "memory://broker".to_string()
    }

    async fn connect(&self, notifier: DisconnectNotifier) -> Result<Arc<dyn BrokerClient>> {
        let delay = self.0.connect_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.0.connects.fetch_add(1, Ordering::SeqCst);
        if self.0.refuse.load(Ordering::SeqCst) {
            return Err(BridgeError::connection("connection refused"));
        }
        self.0.notifiers.lock().unwrap().push(notifier);
        Ok(Arc::new(RecordingClient(Arc::clone(&self.0))))
    }
}

#[async_trait]
impl BrokerClient for RecordingClient {
    async fn publish(&self, topic: &str, payload: &[u8], _retain: bool) -> Result<()> {
        if self.0.fail_publish.load(Ordering::SeqCst) {
            return Err(BridgeError::publish(topic, "connection reset"));
        }
        let text = String::from_utf8_lossy(payload).into_owned();
        self.0
            .published
            .lock()
            .unwrap()
            .push((topic.to_string(), text));
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.0.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Loopback listener standing in for a scanner device.
pub async fn device_listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}
