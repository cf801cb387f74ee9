//! MQTT implementation of the broker connection seam.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, LastWill, Outgoing, Packet, QoS};
use tokio::task::JoinHandle;

use scanbridge_common::{BrokerConfig, mqtt_options};

use crate::connector::{BrokerClient, BrokerConnector, DisconnectNotifier};
use crate::error::{BridgeError, Result};

/// How long a graceful disconnect waits for queued requests to go out.
const DISCONNECT_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Opens MQTT connections described by a [`BrokerConfig`].
///
/// Every call to [`connect`](BrokerConnector::connect) builds a new client
/// and event loop. With `persistent_session` enabled the broker keeps the
/// session for the client id, so a replacement connection resumes it.
#[derive(Debug, Clone)]
pub struct MqttConnector {
    config: BrokerConfig,
    qos: QoS,
    last_will: Option<LastWill>,
}

impl MqttConnector {
    /// Create a connector for the given broker.
    pub fn new(config: BrokerConfig) -> Result<Self> {
        let qos = scanbridge_common::qos(config.qos)?;
        Ok(Self {
            config,
            qos,
            last_will: None,
        })
    }

    /// Register a last-will message with the broker on every connect.
    pub fn with_last_will(mut self, will: LastWill) -> Self {
        self.last_will = Some(will);
        self
    }

    /// QoS used for publishes.
    pub fn qos(&self) -> QoS {
        self.qos
    }
}

#[async_trait]
impl BrokerConnector for MqttConnector {
    fn endpoint(&self) -> String {
        format!("mqtt://{}", self.config.address())
    }

    async fn connect(&self, notifier: DisconnectNotifier) -> Result<Arc<dyn BrokerClient>> {
        let options = mqtt_options(&self.config, self.last_will.clone())?;
        let (client, mut eventloop) = AsyncClient::new(options, self.config.request_capacity);

        let timeout = Duration::from_secs(self.config.connect_timeout_secs);
        let session_present = tokio::time::timeout(timeout, wait_for_connack(&mut eventloop))
            .await
            .map_err(|_| {
                BridgeError::connection(format!(
                    "no CONNACK from {} within {}s",
                    self.config.address(),
                    self.config.connect_timeout_secs
                ))
            })??;

        tracing::debug!(
            broker = %self.config.address(),
            generation = notifier.generation(),
            session_present,
            "MQTT session established"
        );

        let driver = tokio::spawn(drive_event_loop(eventloop, notifier));

        Ok(Arc::new(MqttClient {
            client,
            qos: self.qos,
            driver: Mutex::new(Some(driver)),
        }))
    }
}

/// Poll until the broker answers the CONNECT packet.
async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<bool> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    return Ok(ack.session_present);
                }
                return Err(BridgeError::connection(format!(
                    "broker refused connection: {:?}",
                    ack.code
                )));
            }
            Ok(_) => continue,
            Err(e) => return Err(BridgeError::connection(e.to_string())),
        }
    }
}

/// Keep the connection's network loop running until it fails once.
///
/// The event loop is dropped afterwards, which closes the request queue of
/// the matching [`MqttClient`] so later publishes on it fail fast.
async fn drive_event_loop(mut eventloop: EventLoop, notifier: DisconnectNotifier) {
    let reason = loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Disconnect)) => {
                break "broker sent DISCONNECT".to_string();
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                tracing::debug!(generation = notifier.generation(), "Sent DISCONNECT");
                break "disconnect requested".to_string();
            }
            Ok(event) => {
                tracing::trace!(generation = notifier.generation(), ?event, "MQTT event");
            }
            Err(e) => break e.to_string(),
        }
    };

    notifier.notify(reason);
}

/// Publishing handle for one MQTT connection.
struct MqttClient {
    client: AsyncClient,
    qos: QoS,
    driver: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl BrokerClient for MqttClient {
    async fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> Result<()> {
        // Full or closed request queue is a publish failure.
        self.client
            .try_publish(topic, self.qos, retain, payload.to_vec())
            .map_err(|e| BridgeError::publish(topic, e.to_string()))
    }

    async fn disconnect(&self) -> Result<()> {
        self.client
            .try_disconnect()
            .map_err(|e| BridgeError::connection(e.to_string()))?;

        // Let the event loop send what is queued ahead of DISCONNECT.
        let driver = self.driver.lock().ok().and_then(|mut d| d.take());
        if let Some(driver) = driver {
            if tokio::time::timeout(DISCONNECT_FLUSH_TIMEOUT, driver).await.is_err() {
                tracing::warn!("MQTT event loop did not finish after DISCONNECT");
            }
        }
        Ok(())
    }
}
