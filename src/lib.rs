//! # Sensor Telemetry Library
//!
//! Moves environmental telemetry from sensor boards to a message broker and
//! from there into a time-series store.
//!
//! The agent side brings up Wi-Fi, connects to the broker with
//! retry-with-backoff, enriches every BME280 measurement with device
//! metadata and publishes it, either continuously under a hardware watchdog
//! or once per deep-sleep cycle. The collector side subscribes to the
//! telemetry topic, logs messages and forwards them to InfluxDB.

pub mod agent;
pub mod board;
pub mod broker;
pub mod clock;
pub mod collector;
pub mod config;
pub mod enrich;
pub mod error;
pub mod hal;
pub mod logging;
pub mod metrics;
pub mod network;
pub mod payload;
pub mod pipeline;
pub mod retry;
pub mod sensor;
pub mod timesync;
