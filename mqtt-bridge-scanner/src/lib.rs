//! MQTT bridge for TCP scanner devices.
//!
//! Each configured scanner is read over a raw TCP connection; every chunk
//! read from a device is published as UTF-8 text to that device's topic on a
//! single shared MQTT connection.
//!
//! # Topics
//!
//! Topics are configured per device, for example:
//!
//! ```text
//! scanner/device1/data
//! ```
//!
//! When `bridge.status_topic` is set, a retained JSON status document is
//! published there (`running` / `offline`, also registered as last will).

pub mod config;
pub mod link;

pub use config::{BridgeSettings, ConfigError, DeviceSpec, ScannerBridgeConfig};
pub use link::{DeviceLink, LinkState};

use scanbridge_framework::BridgeRunner;

/// Register one supervised [`DeviceLink`] per configured device.
///
/// Links start once the broker has been reached for the first time; a link
/// that panics is restarted by the runner after the reconnect interval.
pub fn supervise_devices(runner: &mut BridgeRunner<ScannerBridgeConfig>) {
    let settings = runner.config().bridge.clone();
    let devices = runner.config().devices.clone();

    for spec in devices {
        let forwarder = runner.forwarder();
        let settings = settings.clone();
        let name = spec.id();

        runner.supervise(name, move |cancel| {
            let link = DeviceLink::from_settings(spec.clone(), forwarder.clone(), &settings);
            async move { link.run(cancel).await }
        });
    }
}

/// Metadata published with the "running" status.
pub fn status_metadata(config: &ScannerBridgeConfig) -> serde_json::Value {
    serde_json::json!({
        "devices": config.devices.iter().map(|d| {
            serde_json::json!({ "device": d.id(), "topic": d.topic })
        }).collect::<Vec<_>>(),
        "reconnect_interval_secs": config.bridge.reconnect_interval_secs,
        "client_id": config.broker.client_id,
    })
}
