use std::time::Duration;

use rumqttc::{LastWill, MqttOptions, QoS};

use crate::config::BrokerConfig;
use crate::error::{Error, Result};

/// Map a numeric QoS level to the client's [`QoS`].
pub fn qos(level: u8) -> Result<QoS> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(Error::Config(format!(
            "Invalid QoS level: {}. Expected 0, 1 or 2",
            other
        ))),
    }
}

/// Build MQTT client options from the broker configuration.
///
/// `last_will` is registered with the broker on every (re)connect and is
/// published by the broker if the connection drops without a DISCONNECT.
pub fn mqtt_options(config: &BrokerConfig, last_will: Option<LastWill>) -> Result<MqttOptions> {
    config.validate()?;

    let mut options = MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    options.set_clean_session(!config.persistent_session);

    if let Some(will) = last_will {
        options.set_last_will(will);
    }

    tracing::debug!(
        broker = %config.address(),
        client_id = %config.client_id,
        persistent_session = config.persistent_session,
        keep_alive_secs = config.keep_alive_secs,
        "Built MQTT client options"
    );

    Ok(options)
}
