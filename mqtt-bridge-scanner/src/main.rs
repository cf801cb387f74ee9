//! MQTT bridge for TCP scanner devices.
//!
//! This bridge keeps one TCP connection per scanner and republishes
//! everything it reads to MQTT.

use anyhow::{Context, Result};
use mqtt_bridge_scanner::{ScannerBridgeConfig, status_metadata, supervise_devices};
use scanbridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = BridgeArgs::parse_with_default("scanner.json5");

    // Load configuration
    let config = ScannerBridgeConfig::load(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    // Create the bridge runner
    let mut runner = BridgeRunner::new("scanner", config, Some(&args))
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    tracing::info!(
        config = ?args.config,
        devices = runner.config().devices.len(),
        broker = %runner.supervisor().endpoint(),
        "Loaded configuration"
    );

    // One supervised link per device
    supervise_devices(&mut runner);
    let metadata = status_metadata(runner.config());

    // Run until Ctrl+C (handles shutdown gracefully)
    runner
        .run_with_metadata(Some(metadata))
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))
}
