//! # Payload Module
//!
//! Wire format of a published measurement:
//!
//! ```text
//! {"payload":{"bme280":{"temperature":F,"pressure":F,"humidity":F}},
//!  "metadata":{"wifi_mac_address":S,"machine_unique_id":S,
//!              "measurement_time":S,"machine_metrics":{...}}}
//! ```
//!
//! A [`DraftEnvelope`] holds a measurement whose metadata has not been
//! attached yet. It can only become an [`Envelope`] through
//! [`DraftEnvelope::seal`], and only an `Envelope` can be serialized, so a
//! payload without its metadata block cannot reach the broker.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TelemetryError};
use crate::sensor::Measurement;

/// Measurement section of the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub bme280: Measurement,
}

/// Battery voltage and charge estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerMetrics {
    pub current_voltage: f64,
    pub charge_percentage: f64,
}

/// Host health metrics attached to each measurement.
///
/// Which optional fields are present depends on the device mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineMetrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime: Option<u32>,

    // Older firmware sent `python_version`; it is read but never written
    #[serde(
        default,
        alias = "python_version",
        skip_serializing_if = "Option::is_none"
    )]
    pub runtime_version: Option<String>,

    pub cpu_temperature: f64,

    pub mem_free: u64,

    pub flash_free_space_bytes: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power: Option<PowerMetrics>,
}

/// Device context attached to a measurement before it is sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceMetadata {
    pub wifi_mac_address: String,
    pub machine_unique_id: String,
    /// `YYYY-MM-DD HH:MM:SS`
    pub measurement_time: String,
    pub machine_metrics: MachineMetrics,
}

/// Envelope under construction: measurement taken, metadata pending.
#[derive(Debug, Clone, PartialEq)]
pub struct DraftEnvelope {
    payload: Payload,
    metadata: Option<DeviceMetadata>,
}

impl DraftEnvelope {
    pub fn new(measurement: Measurement) -> Self {
        Self {
            payload: Payload {
                bme280: measurement,
            },
            metadata: None,
        }
    }

    /// Attaches (or replaces) the metadata block.
    pub fn attach(&mut self, metadata: DeviceMetadata) {
        self.metadata = Some(metadata);
    }

    pub fn is_enriched(&self) -> bool {
        self.metadata.is_some()
    }

    /// Completes the envelope.
    ///
    /// # Errors
    ///
    /// Returns `IncompleteEnvelope` if no metadata was attached.
    pub fn seal(self) -> Result<Envelope> {
        let metadata = self.metadata.ok_or(TelemetryError::IncompleteEnvelope)?;
        Ok(Envelope {
            payload: self.payload,
            metadata,
        })
    }
}

/// A complete, publishable envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub payload: Payload,
    pub metadata: DeviceMetadata,
}

impl Envelope {
    /// Serializes to compact UTF-8 JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
pub mod fixtures {
    use super::*;
    use crate::sensor::mocks::SAMPLE;

    pub fn continuous_metadata() -> DeviceMetadata {
        DeviceMetadata {
            wifi_mac_address: "28:cd:c1:0a:4b:7e".to_string(),
            machine_unique_id: "e6:61:41:04:03:24:ab:36".to_string(),
            measurement_time: "2024-03-09 12:30:05".to_string(),
            machine_metrics: MachineMetrics {
                uptime: None,
                runtime_version: None,
                cpu_temperature: 24.5,
                mem_free: 150_000,
                flash_free_space_bytes: 800_000,
                frequency: None,
                power: None,
            },
        }
    }

    pub fn sealed() -> Envelope {
        let mut draft = DraftEnvelope::new(SAMPLE);
        draft.attach(continuous_metadata());
        draft.seal().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::sensor::mocks::SAMPLE;
    use serde_json::{json, Value};

    #[test]
    fn test_seal_without_metadata_fails() {
        let draft = DraftEnvelope::new(SAMPLE);
        assert!(!draft.is_enriched());
        assert!(matches!(draft.seal(), Err(TelemetryError::IncompleteEnvelope)));
    }

    #[test]
    fn test_continuous_wire_format() {
        let json: Value = serde_json::from_str(&sealed().to_json().unwrap()).unwrap();

        assert_eq!(
            json,
            json!({
                "payload": {
                    "bme280": {"temperature": 21.37, "pressure": 1013.25, "humidity": 45.5}
                },
                "metadata": {
                    "wifi_mac_address": "28:cd:c1:0a:4b:7e",
                    "machine_unique_id": "e6:61:41:04:03:24:ab:36",
                    "measurement_time": "2024-03-09 12:30:05",
                    "machine_metrics": {
                        "cpu_temperature": 24.5,
                        "mem_free": 150000,
                        "flash_free_space_bytes": 800000
                    }
                }
            })
        );
    }

    #[test]
    fn test_duty_cycled_metrics_are_emitted() {
        let mut envelope = sealed();
        let metrics = &mut envelope.metadata.machine_metrics;
        metrics.uptime = Some(1_234);
        metrics.runtime_version = Some("0.3.0".to_string());
        metrics.frequency = Some(125_000_000);
        metrics.power = Some(PowerMetrics {
            current_voltage: 3.9,
            charge_percentage: 78.5,
        });

        let json: Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();
        let metrics = &json["metadata"]["machine_metrics"];

        assert_eq!(metrics["uptime"], 1234);
        assert_eq!(metrics["runtime_version"], "0.3.0");
        assert!(metrics.get("python_version").is_none());
        assert_eq!(metrics["frequency"], 125000000);
        assert_eq!(metrics["power"]["charge_percentage"], 78.5);
    }

    #[test]
    fn test_decode_accepts_python_version_key() {
        let text = r#"{
            "payload": {"bme280": {"temperature": 20.0, "pressure": 1000.0, "humidity": 40.0}},
            "metadata": {
                "wifi_mac_address": "28:cd:c1:0a:4b:7e",
                "machine_unique_id": "e6:61:41:04:03:24:ab:36",
                "measurement_time": "2024-03-09 12:30:05",
                "machine_metrics": {
                    "python_version": "1.20.0",
                    "cpu_temperature": 22.1,
                    "mem_free": 100,
                    "flash_free_space_bytes": 200
                }
            }
        }"#;

        let envelope: Envelope = serde_json::from_str(text).unwrap();
        assert_eq!(
            envelope.metadata.machine_metrics.runtime_version.as_deref(),
            Some("1.20.0")
        );
    }
}
