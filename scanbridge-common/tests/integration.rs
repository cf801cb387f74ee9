//! Integration tests for scanbridge-common library.

use std::time::Duration;

use scanbridge_common::{
    BrokerConfig, LogFormat, LoggingConfig, load_config, mqtt_options, qos, validate_publish_topic,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct FileConfig {
    broker: BrokerConfig,
    #[serde(default)]
    logging: LoggingConfig,
    topics: Vec<String>,
}

fn write_temp(name: &str, content: &str) -> std::path::PathBuf {
    let path = std::env::temp_dir().join(format!("scanbridge-common-{}-{}", std::process::id(), name));
    std::fs::write(&path, content).expect("write temp config");
    path
}

#[test]
fn test_load_config_to_client_options() {
    let path = write_temp(
        "full.json5",
        r#"{
            // Comments and trailing commas are fine in JSON5
            broker: { host: "broker.local", client_id: "ucal_i1", keep_alive_secs: 30, qos: 1, },
            logging: { format: "json" },
            topics: ["scanner/device1/data", "scanner/device2/data"],
        }"#,
    );

    let config: FileConfig = load_config(&path).expect("config loads");
    std::fs::remove_file(&path).ok();

    assert_eq!(config.logging.format, LogFormat::Json);
    for topic in &config.topics {
        validate_publish_topic(topic).expect("valid topic");
    }

    let options = mqtt_options(&config.broker, None).expect("options build");
    assert_eq!(options.client_id(), "ucal_i1");
    assert_eq!(options.keep_alive(), Duration::from_secs(30));
    assert_eq!(qos(config.broker.qos).unwrap(), rumqttc::QoS::AtLeastOnce);
}

#[test]
fn test_load_missing_file() {
    let result: scanbridge_common::Result<FileConfig> =
        load_config("/nonexistent/scanbridge/config.json5");
    let err = result.unwrap_err().to_string();
    assert!(err.contains("Failed to read config file"));
}

#[test]
fn test_load_malformed_file() {
    let path = write_temp("broken.json5", "{ broker: { host: ");
    let result: scanbridge_common::Result<FileConfig> = load_config(&path);
    std::fs::remove_file(&path).ok();

    assert!(result.unwrap_err().to_string().contains("Failed to parse config file"));
}
