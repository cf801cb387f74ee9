//! MQTT topic name helpers.
//!
//! Bridges only ever publish, so every configured topic must be a valid
//! MQTT *topic name* (not a filter): non-empty, no `+`/`#` wildcards, no NUL
//! characters, and at most [`MAX_TOPIC_LEN`] bytes of UTF-8.

use crate::error::{Error, Result};

/// Maximum length of an MQTT topic name in bytes.
pub const MAX_TOPIC_LEN: usize = 65_535;

/// Validate that `topic` can be used as the target of a PUBLISH packet.
///
/// # Example
/// ```
/// use scanbridge_common::topic::validate_publish_topic;
///
/// assert!(validate_publish_topic("scanner/device1/data").is_ok());
/// assert!(validate_publish_topic("scanner/+/data").is_err());
/// ```
pub fn validate_publish_topic(topic: &str) -> Result<()> {
    if topic.is_empty() {
        return Err(Error::Topic("topic cannot be empty".to_string()));
    }

    if topic.len() > MAX_TOPIC_LEN {
        return Err(Error::Topic(format!(
            "topic is {} bytes long (max {})",
            topic.len(),
            MAX_TOPIC_LEN
        )));
    }

    if let Some(c) = topic.chars().find(|c| matches!(c, '+' | '#' | '\0')) {
        return Err(Error::Topic(format!(
            "'{}' contains forbidden character {:?}",
            topic, c
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_topics() {
        assert!(validate_publish_topic("t1").is_ok());
        assert!(validate_publish_topic("scanner/device1/data").is_ok());
        // Empty levels and leading separators are legal topic names.
        assert!(validate_publish_topic("/scanner//data").is_ok());
    }

    #[test]
    fn test_wildcards_rejected() {
        assert!(matches!(
            validate_publish_topic("scanner/+/data"),
            Err(Error::Topic(_))
        ));
        assert!(validate_publish_topic("scanner/#").is_err());
    }

    #[test]
    fn test_empty_and_nul_rejected() {
        assert!(validate_publish_topic("").is_err());
        assert!(validate_publish_topic("scanner\0data").is_err());
    }

    #[test]
    fn test_too_long_rejected() {
        let topic = "a".repeat(MAX_TOPIC_LEN + 1);
        assert!(validate_publish_topic(&topic).is_err());
        let topic = "a".repeat(MAX_TOPIC_LEN);
        assert!(validate_publish_topic(&topic).is_ok());
    }
}
