//! # Collector Module
//!
//! Host-side consumers of the telemetry topic.
//!
//! This module handles:
//! - Decoding inbound messages (undecodable ones are dropped)
//! - Logging every message as sorted, indented JSON
//! - Forwarding measurements to InfluxDB
//! - Listing local serial ports for flashing and debugging boards

pub mod directory;
pub mod influx;
pub mod ports;
pub mod receiver;

pub use directory::DeviceDirectory;
pub use receiver::Receiver;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::Result;

/// Parses an inbound payload as UTF-8 JSON.
///
/// Returns `None` for anything that is not valid UTF-8 or not JSON; such
/// messages are dropped without reaching any handler.
pub fn decode_message(payload: &[u8]) -> Option<Value> {
    let text = match std::str::from_utf8(payload) {
        Ok(text) => text,
        Err(e) => {
            debug!("Dropping non UTF-8 message: {}", e);
            return None;
        }
    };

    match serde_json::from_str(text) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!("Dropping non JSON message: {}", e);
            None
        }
    }
}

/// Renders `value` with sorted keys and four-space indentation.
pub fn pretty_sorted(value: &Value) -> Result<String> {
    // Map is a BTreeMap, so object keys serialize in sorted order
    let mut buffer = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
    value.serialize(&mut serializer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// Consumer of decoded messages
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, topic: &str, message: &Value) -> Result<()>;
}

/// Logs every message
#[derive(Debug, Default)]
pub struct LogHandler;

#[async_trait]
impl MessageHandler for LogHandler {
    async fn handle(&self, topic: &str, message: &Value) -> Result<()> {
        info!("Received message (topic={}): {}", topic, pretty_sorted(message)?);
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_valid_json() {
        let value = decode_message(br#"{"payload": {"bme280": {"temperature": 21.5}}}"#).unwrap();
        assert_eq!(value["payload"]["bme280"]["temperature"], 21.5);
    }

    #[test]
    fn test_decode_drops_garbage() {
        assert!(decode_message(b"not json at all").is_none());
        assert!(decode_message(&[0xff, 0xfe, 0x00]).is_none());
        assert!(decode_message(b"").is_none());
    }

    #[test]
    fn test_pretty_sorted_orders_keys() {
        let value = json!({"metadata": {"b": 1, "a": 2}, "payload": true});

        let text = pretty_sorted(&value).unwrap();

        assert_eq!(
            text,
            "{\n    \"metadata\": {\n        \"a\": 2,\n        \"b\": 1\n    },\n    \"payload\": true\n}"
        );
    }

    #[tokio::test]
    async fn test_log_handler_accepts_any_json() {
        tokio_test::assert_ok!(LogHandler.handle("sensors/picow", &json!([1, 2, 3])).await);
    }
}
