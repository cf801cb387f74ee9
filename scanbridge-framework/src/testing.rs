//! In-memory broker used by the framework's unit tests.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::connector::{BrokerClient, BrokerConnector, DisconnectNotifier};
use crate::error::{BridgeError, Result};
use crate::supervisor::{DEFAULT_RECONNECT_INTERVAL, PublisherSupervisor};

#[derive(Default)]
pub(crate) struct FakeBroker {
    pub refuse_remaining: AtomicUsize,
    pub refuse_always: AtomicBool,
    pub fail_publish: AtomicBool,
    /// How long each connect attempt takes, in millis (at least 10).
    pub connect_delay_ms: AtomicU64,
    pub connects: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub notifiers: Mutex<Vec<DisconnectNotifier>>,
    pub published: Mutex<Vec<(String, Vec<u8>, bool)>>,
    pub disconnects: AtomicUsize,
}

impl FakeBroker {
    /// Fire the disconnect notifier of the newest connection.
    pub fn drop_connection(&self, reason: &str) {
        if let Some(notifier) = self.notifiers.lock().unwrap().pop() {
            notifier.notify(reason);
        }
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>, bool)> {
        self.published.lock().unwrap().clone()
    }
}

pub(crate) struct FakeConnector(pub Arc<FakeBroker>);

struct FakeClient(Arc<FakeBroker>);

#[async_trait]
impl BrokerClient for FakeClient {
    async fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> Result<()> {
        if self.0.fail_publish.load(Ordering::SeqCst) {
            return Err(BridgeError::publish(topic, "broken pipe"));
        }
        self.0
            .published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload.to_vec(), retain));
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.0.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl BrokerConnector for FakeConnector {
    fn endpoint(&self) -> String {
        "fake://broker".to_string()
    }

    async fn connect(&self, notifier: DisconnectNotifier) -> Result<Arc<dyn BrokerClient>> {
        let broker = &self.0;
        let now = broker.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        broker.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let delay = broker.connect_delay_ms.load(Ordering::SeqCst).max(10);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        broker.in_flight.fetch_sub(1, Ordering::SeqCst);
        broker.connects.fetch_add(1, Ordering::SeqCst);

        if broker.refuse_always.load(Ordering::SeqCst) {
            return Err(BridgeError::connection("connection refused"));
        }
        let refuse = broker
            .refuse_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refuse {
            return Err(BridgeError::connection("connection refused"));
        }

        broker.notifiers.lock().unwrap().push(notifier);
        Ok(Arc::new(FakeClient(Arc::clone(broker))))
    }
}

/// Supervisor over `broker` with the default reconnect interval.
pub(crate) fn supervisor(broker: &Arc<FakeBroker>) -> Arc<PublisherSupervisor> {
    let (supervisor, _pump) = PublisherSupervisor::spawn(
        Arc::new(FakeConnector(Arc::clone(broker))),
        DEFAULT_RECONNECT_INTERVAL,
        CancellationToken::new(),
    );
    supervisor
}
