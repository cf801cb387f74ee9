//! Bridge runner for lifecycle management.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use rumqttc::LastWill;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use scanbridge_common::{LoggingConfig, init_tracing};

use crate::BridgeArgs;
use crate::config::BridgeConfig;
use crate::connector::BrokerConnector;
use crate::error::{BridgeError, Result};
use crate::forwarder::Forwarder;
use crate::mqtt::MqttConnector;
use crate::signal::wait_for_shutdown_signal;
use crate::status::StatusPublisher;
use crate::supervisor::PublisherSupervisor;

/// How long workers get to finish after shutdown is requested.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

type WorkerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type WorkerFactory = Box<dyn Fn(CancellationToken) -> WorkerFuture + Send + Sync>;

struct Worker {
    name: String,
    factory: WorkerFactory,
}

/// Bridge runner that manages the lifecycle of a bridge.
///
/// Handles:
/// - Logging initialization
/// - The broker connection (through [`PublisherSupervisor`])
/// - Startup ordering: workers start once the broker is reachable
/// - Worker supervision: a worker that panics is restarted
/// - Graceful shutdown on SIGINT/SIGTERM
/// - Status publishing (when a status topic is configured)
///
/// # Example
///
/// ```ignore
/// use scanbridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let args = BridgeArgs::parse_with_default("mybridge.json5");
///     let config = MyBridgeConfig::load(&args.config)?;
///
///     let mut runner = BridgeRunner::new("mybridge", config, Some(&args))?;
///
///     let forwarder = runner.forwarder();
///     runner.supervise("worker", move |cancel| {
///         let forwarder = forwarder.clone();
///         async move { my_worker(forwarder, cancel).await }
///     });
///
///     runner.run().await?;
///     Ok(())
/// }
/// ```
pub struct BridgeRunner<C: BridgeConfig> {
    /// Bridge name for logging and status.
    name: String,
    /// Bridge version.
    version: String,
    /// The loaded configuration.
    config: C,
    /// Owner of the broker connection.
    supervisor: Arc<PublisherSupervisor>,
    /// Disconnect-event pump of the supervisor.
    event_pump: JoinHandle<()>,
    /// Payload forwarder shared by workers.
    forwarder: Forwarder,
    /// Process-wide shutdown token.
    cancel: CancellationToken,
    /// Status publisher (optional).
    status_publisher: Option<StatusPublisher>,
    /// Workers started once the broker is connected.
    workers: Vec<Worker>,
    /// Extra fields for the "running" status.
    status_metadata: Option<serde_json::Value>,
}

impl<C: BridgeConfig> BridgeRunner<C> {
    /// Create a bridge runner talking MQTT to the configured broker.
    ///
    /// Initializes logging (CLI log level overrides the config). When the
    /// config names a status topic, the offline status is registered as the
    /// connection's last will.
    pub fn new(name: impl Into<String>, config: C, args: Option<&BridgeArgs>) -> Result<Self> {
        let name = name.into();
        let version = env!("CARGO_PKG_VERSION").to_string();

        let log_config = match args.and_then(|a| a.log_level.clone()) {
            Some(level) => LoggingConfig {
                level,
                ..config.logging().clone()
            },
            None => config.logging().clone(),
        };
        init_tracing(&log_config).map_err(|e| BridgeError::config(e.to_string()))?;

        tracing::info!(bridge = %name, version = %version, "Starting bridge");

        let mut connector = MqttConnector::new(config.broker().clone())?;
        if let Some(topic) = config.status_topic() {
            let status = StatusPublisher::new(topic, &name, &version);
            let will = LastWill::new(topic, status.offline_payload()?, connector.qos(), true);
            connector = connector.with_last_will(will);
        }

        Ok(Self::with_connector(name, config, Arc::new(connector)))
    }

    /// Create a bridge runner over an arbitrary broker connector.
    ///
    /// Does not touch the global tracing subscriber.
    pub fn with_connector(
        name: impl Into<String>,
        config: C,
        connector: Arc<dyn BrokerConnector>,
    ) -> Self {
        let name = name.into();
        let version = env!("CARGO_PKG_VERSION").to_string();
        let cancel = CancellationToken::new();

        let (supervisor, event_pump) = PublisherSupervisor::spawn(
            connector,
            config.reconnect_interval(),
            cancel.child_token(),
        );
        let forwarder = Forwarder::new(Arc::clone(&supervisor));
        let status_publisher = config
            .status_topic()
            .map(|topic| StatusPublisher::new(topic, &name, &version));

        Self {
            name,
            version,
            config,
            supervisor,
            event_pump,
            forwarder,
            cancel,
            status_publisher,
            workers: Vec::new(),
            status_metadata: None,
        }
    }

    /// Get the bridge name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the bridge version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &C {
        &self.config
    }

    /// Get the publisher supervisor.
    pub fn supervisor(&self) -> &Arc<PublisherSupervisor> {
        &self.supervisor
    }

    /// Get a clone of the forwarder.
    pub fn forwarder(&self) -> Forwarder {
        self.forwarder.clone()
    }

    /// Token cancelled when the bridge shuts down.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Register a supervised worker.
    ///
    /// Workers start after the first broker connection. `factory` is called
    /// with a cancellation token each time the worker (re)starts. A worker
    /// that returns is done; a worker that panics is restarted after the
    /// reconnect interval.
    pub fn supervise<F, Fut>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.workers.push(Worker {
            name: name.into(),
            factory: Box::new(move |cancel| Box::pin(factory(cancel))),
        });
    }

    /// Run the bridge until a shutdown signal is received.
    pub async fn run(self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = wait_for_shutdown_signal().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signals");
            }
        })
        .await
    }

    /// Run the bridge with custom status metadata.
    pub async fn run_with_metadata(self, metadata: Option<serde_json::Value>) -> Result<()> {
        self.with_status_metadata(metadata).run().await
    }

    /// Set the metadata published with the "running" status.
    ///
    /// Without it, the status lists the registered worker names.
    pub fn with_status_metadata(mut self, metadata: Option<serde_json::Value>) -> Self {
        self.status_metadata = metadata;
        self
    }

    /// Run the bridge until `shutdown` completes.
    ///
    /// This will:
    /// 1. Connect to the broker, retrying until it works
    /// 2. Publish "running" status (if enabled)
    /// 3. Start all workers
    /// 4. Wait for `shutdown`
    /// 5. Cancel workers and give them [`SHUTDOWN_GRACE`] to stop
    /// 6. Publish "offline" status (if enabled) and disconnect
    pub async fn run_until<S>(self, shutdown: S) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let connected = tokio::select! {
            result = self.supervisor.connect_loop() => result.is_ok(),
            _ = &mut shutdown => false,
        };

        if !connected {
            tracing::info!(bridge = %self.name, "Shutdown requested before broker connection");
            self.cancel.cancel();
            self.supervisor.shutdown().await;
            return Ok(());
        }

        if let Some(ref status_pub) = self.status_publisher {
            if let Err(e) = status_pub
                .publish_running(&self.supervisor, Some(self.status_metadata()))
                .await
            {
                tracing::warn!(error = %e, "Failed to publish running status");
            }
        }

        let reconnect_interval = self.config.reconnect_interval();
        let tasks: Vec<JoinHandle<()>> = self
            .workers
            .into_iter()
            .map(|worker| {
                tokio::spawn(supervise_worker(
                    worker,
                    self.cancel.clone(),
                    reconnect_interval,
                ))
            })
            .collect();

        tracing::info!(
            bridge = %self.name,
            workers = tasks.len(),
            "Bridge running. Press Ctrl+C to stop."
        );

        shutdown.await;

        tracing::info!(bridge = %self.name, "Received shutdown signal");
        self.cancel.cancel();

        let mut tasks = tasks;
        let stopped = tokio::time::timeout(SHUTDOWN_GRACE, async {
            for task in &mut tasks {
                let _ = task.await;
            }
        })
        .await;
        if stopped.is_err() {
            tracing::warn!("Workers did not stop in time, aborting");
            for task in &tasks {
                task.abort();
            }
        }

        let stats = self.forwarder.stats().snapshot();

        if let Some(ref status_pub) = self.status_publisher {
            let metadata = serde_json::json!({ "forwarded": stats });
            if let Err(e) = status_pub
                .publish_offline(&self.supervisor, Some(metadata))
                .await
            {
                tracing::warn!(error = %e, "Failed to publish offline status");
            }
        }

        self.supervisor.shutdown().await;
        let _ = self.event_pump.await;

        tracing::info!(
            bridge = %self.name,
            delivered = stats.delivered,
            delivered_after_retry = stats.delivered_after_retry,
            dropped = stats.dropped,
            "Goodbye!"
        );

        Ok(())
    }

    fn status_metadata(&self) -> serde_json::Value {
        if let Some(ref metadata) = self.status_metadata {
            return metadata.clone();
        }
        let workers: Vec<&str> = self.workers.iter().map(|w| w.name.as_str()).collect();
        serde_json::json!({
            "workers": workers,
            "reconnect_interval_secs": self.config.reconnect_interval().as_secs_f64(),
        })
    }
}

/// Aborts the worker task when its supervisor is dropped or aborted.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Run a worker, restarting it after a panic until cancelled.
async fn supervise_worker(worker: Worker, cancel: CancellationToken, restart_delay: Duration) {
    let mut restarts: u32 = 0;

    loop {
        let mut running = AbortOnDrop(tokio::spawn((worker.factory)(cancel.child_token())));

        match (&mut running.0).await {
            Ok(()) => {
                tracing::debug!(worker = %worker.name, "Worker finished");
                return;
            }
            Err(e) if e.is_panic() => {
                restarts += 1;
                tracing::error!(
                    worker = %worker.name,
                    restarts,
                    restart_in_secs = restart_delay.as_secs_f64(),
                    "Worker terminated unexpectedly, restarting"
                );
            }
            Err(_) => return,
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(restart_delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forwarder::Payload;
    use crate::testing::{FakeBroker, FakeConnector};
    use crate::{BridgeStatus, BrokerConfig};
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    #[derive(Debug, Deserialize)]
    struct TestConfig {
        broker: BrokerConfig,
        #[serde(default)]
        logging: LoggingConfig,
        status_topic: Option<String>,
    }

    impl BridgeConfig for TestConfig {
        fn broker(&self) -> &BrokerConfig {
            &self.broker
        }

        fn logging(&self) -> &LoggingConfig {
            &self.logging
        }

        fn status_topic(&self) -> Option<&str> {
            self.status_topic.as_deref()
        }
    }

    fn config(status_topic: Option<&str>) -> TestConfig {
        TestConfig {
            broker: BrokerConfig::new("localhost"),
            logging: LoggingConfig::default(),
            status_topic: status_topic.map(str::to_string),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifecycle_with_status() {
        let broker = Arc::new(FakeBroker::default());
        broker.refuse_remaining.store(2, Ordering::SeqCst);
        let mut runner = BridgeRunner::with_connector(
            "test",
            config(Some("bridge/status")),
            Arc::new(FakeConnector(Arc::clone(&broker))),
        );

        let forwarder = runner.forwarder();
        runner.supervise("device", move |cancel| {
            let forwarder = forwarder.clone();
            async move {
                forwarder.publish(&Payload::new("t1", "hello")).await;
                cancel.cancelled().await;
            }
        });

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let run = tokio::spawn(runner.run_until(async {
            let _ = stop_rx.await;
        }));

        tokio::time::sleep(Duration::from_secs(15)).await;
        // Startup waits out two refused attempts before anything is published.
        assert_eq!(broker.connects.load(Ordering::SeqCst), 3);

        stop_tx.send(()).unwrap();
        run.await.unwrap().unwrap();

        let published = broker.published();
        let topics: Vec<&str> = published.iter().map(|(t, _, _)| t.as_str()).collect();
        assert_eq!(topics, vec!["bridge/status", "t1", "bridge/status"]);

        let running: BridgeStatus = serde_json::from_slice(&published[0].1).unwrap();
        assert_eq!(running.status, "running");
        assert_eq!(running.metadata["workers"][0], "device");

        let offline: BridgeStatus = serde_json::from_slice(&published[2].1).unwrap();
        assert_eq!(offline.status, "offline");
        assert_eq!(offline.metadata["forwarded"]["delivered"], 1);

        assert_eq!(broker.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_status_metadata() {
        let broker = Arc::new(FakeBroker::default());
        let runner = BridgeRunner::with_connector(
            "test",
            config(Some("bridge/status")),
            Arc::new(FakeConnector(Arc::clone(&broker))),
        )
        .with_status_metadata(Some(serde_json::json!({ "devices": ["10.0.0.5:23"] })));

        runner
            .run_until(tokio::time::sleep(Duration::from_secs(1)))
            .await
            .unwrap();

        let published = broker.published();
        let running: BridgeStatus = serde_json::from_slice(&published[0].1).unwrap();
        assert_eq!(running.metadata["devices"][0], "10.0.0.5:23");
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_before_connect() {
        let broker = Arc::new(FakeBroker::default());
        broker.refuse_always.store(true, Ordering::SeqCst);
        let mut runner = BridgeRunner::with_connector(
            "test",
            config(None),
            Arc::new(FakeConnector(Arc::clone(&broker))),
        );

        let started = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&started);
        runner.supervise("device", move |_cancel| {
            counter.fetch_add(1, Ordering::SeqCst);
            async {}
        });

        runner
            .run_until(tokio::time::sleep(Duration::from_secs(30)))
            .await
            .unwrap();

        // Workers never start without a broker.
        assert_eq!(started.load(Ordering::SeqCst), 0);
        assert!(broker.connects.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_worker_restarted() {
        let broker = Arc::new(FakeBroker::default());
        let mut runner = BridgeRunner::with_connector(
            "test",
            config(None),
            Arc::new(FakeConnector(Arc::clone(&broker))),
        );

        let starts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&starts);
        runner.supervise("flaky", move |cancel| {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    panic!("unexpected device error");
                }
                cancel.cancelled().await;
            }
        });

        let run = tokio::spawn(runner.run_until(tokio::time::sleep(Duration::from_secs(20))));
        run.await.unwrap().unwrap();

        assert_eq!(starts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_worker_aborted_after_grace() {
        struct DropFlag(Arc<AtomicUsize>);
        impl Drop for DropFlag {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let broker = Arc::new(FakeBroker::default());
        let mut runner = BridgeRunner::with_connector(
            "test",
            config(None),
            Arc::new(FakeConnector(Arc::clone(&broker))),
        );

        let dropped = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&dropped);
        runner.supervise("stuck", move |_cancel| {
            let guard = DropFlag(Arc::clone(&flag));
            async move {
                let _guard = guard;
                std::future::pending::<()>().await;
            }
        });

        let started = tokio::time::Instant::now();
        runner
            .run_until(tokio::time::sleep(Duration::from_secs(1)))
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_secs(1) + SHUTDOWN_GRACE);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_worker_not_restarted() {
        let broker = Arc::new(FakeBroker::default());
        let mut runner = BridgeRunner::with_connector(
            "test",
            config(None),
            Arc::new(FakeConnector(Arc::clone(&broker))),
        );

        let starts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&starts);
        runner.supervise("oneshot", move |_cancel| {
            counter.fetch_add(1, Ordering::SeqCst);
            async {}
        });

        runner
            .run_until(tokio::time::sleep(Duration::from_secs(20)))
            .await
            .unwrap();
        assert_eq!(starts.load(Ordering::SeqCst), 1);
    }
}
