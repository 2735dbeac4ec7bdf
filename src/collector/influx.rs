//! InfluxDB forwarding.
//!
//! Measurements are mapped to a line-protocol [`Point`] and written through
//! a [`TimeSeriesSink`]. [`InfluxWriter`] talks to the InfluxDB v2 HTTP API.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt::Write as _;
use tracing::{debug, info};

use super::{DeviceDirectory, MessageHandler};
use crate::config::InfluxConfig;
use crate::error::{Result, TelemetryError};

/// Field value of a point
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
}

/// One time-series sample in line-protocol form
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    measurement: String,
    tags: Vec<(String, String)>,
    fields: Vec<(String, FieldValue)>,
    timestamp_ns: Option<i64>,
}

fn escape(text: &str, special: &[char]) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if special.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

impl Point {
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: Vec::new(),
            fields: Vec::new(),
            timestamp_ns: None,
        }
    }

    #[must_use]
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn field(mut self, key: impl Into<String>, value: FieldValue) -> Self {
        self.fields.push((key.into(), value));
        self
    }

    /// Timestamp with nanosecond precision.
    #[must_use]
    pub fn time(mut self, time: DateTime<Utc>) -> Self {
        self.timestamp_ns = time.timestamp_nanos_opt();
        self
    }

    pub fn field_value(&self, key: &str) -> Option<FieldValue> {
        self.fields
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| *value)
    }

    pub fn tag_value(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    /// Renders the point as one line of InfluxDB line protocol.
    ///
    /// # Errors
    ///
    /// Returns `Sink` if the point has no fields.
    pub fn to_line(&self) -> Result<String> {
        if self.fields.is_empty() {
            return Err(TelemetryError::Sink(format!(
                "Point '{}' has no fields",
                self.measurement
            )));
        }

        let mut line = escape(&self.measurement, &[',', ' ']);
        for (key, value) in &self.tags {
            let _ = write!(
                line,
                ",{}={}",
                escape(key, &[',', '=', ' ']),
                escape(value, &[',', '=', ' '])
            );
        }

        let fields: Vec<String> = self
            .fields
            .iter()
            .map(|(key, value)| {
                let key = escape(key, &[',', '=', ' ']);
                match value {
                    FieldValue::Float(v) => format!("{}={}", key, v),
                    FieldValue::Integer(v) => format!("{}={}i", key, v),
                }
            })
            .collect();
        line.push(' ');
        line.push_str(&fields.join(","));

        if let Some(ns) = self.timestamp_ns {
            let _ = write!(line, " {}", ns);
        }
        Ok(line)
    }
}

/// Destination for time-series points
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TimeSeriesSink: Send + Sync {
    async fn write(&self, point: &Point) -> Result<()>;
}

/// Writes points through the InfluxDB v2 `/api/v2/write` endpoint
pub struct InfluxWriter {
    client: reqwest::Client,
    write_url: String,
    token: String,
    org: String,
    bucket: String,
}

impl InfluxWriter {
    pub fn new(config: &InfluxConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            write_url: format!("{}/api/v2/write", config.url.trim_end_matches('/')),
            token: config.token.clone(),
            org: config.org.clone(),
            bucket: config.bucket.clone(),
        }
    }
}

#[async_trait]
impl TimeSeriesSink for InfluxWriter {
    async fn write(&self, point: &Point) -> Result<()> {
        let line = point.to_line()?;
        debug!("Writing line: {}", line);

        let response = self
            .client
            .post(&self.write_url)
            .query(&[
                ("org", self.org.as_str()),
                ("bucket", self.bucket.as_str()),
                ("precision", "ns"),
            ])
            .header("Authorization", format!("Token {}", self.token))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(line)
            .send()
            .await
            .map_err(|e| TelemetryError::Sink(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TelemetryError::Sink(format!(
                "InfluxDB rejected write ({}): {}",
                status, body
            )));
        }
        Ok(())
    }
}

/// Reads a reading that may be a number or a string with a unit suffix.
fn lenient_float(value: &Value, field: &str, unit: &str) -> Result<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.replace(unit, "").trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| {
        TelemetryError::MalformedPayload(format!("'{}' is not a number: {}", field, value))
    })
}

fn optional_float(metrics: &Value, pointer: &str) -> Option<f64> {
    metrics.pointer(pointer).and_then(Value::as_f64)
}

/// Maps one inbound measurement message to a point.
///
/// # Arguments
///
/// * `message` - Decoded message
/// * `directory` - Device names used for the `host` tag
/// * `measurement` - Point measurement name
/// * `time` - Point timestamp
///
/// # Errors
///
/// Returns `MalformedPayload` if a required reading or the device id is
/// missing, and `UnknownDevice` if the id is not in `directory`.
pub fn telemetry_point(
    message: &Value,
    directory: &DeviceDirectory,
    measurement: &str,
    time: DateTime<Utc>,
) -> Result<Point> {
    let bme280 = message
        .pointer("/payload/bme280")
        .ok_or_else(|| TelemetryError::MalformedPayload("missing payload.bme280".to_string()))?;
    let reading = |field: &str, unit: &str| -> Result<f64> {
        let value = bme280
            .get(field)
            .ok_or_else(|| TelemetryError::MalformedPayload(format!("missing bme280.{}", field)))?;
        lenient_float(value, field, unit)
    };

    let temperature = reading("temperature", "C")?;
    let humidity = reading("humidity", "%")?;
    let pressure = reading("pressure", "hPa")?;

    let machine_unique_id = message
        .pointer("/metadata/machine_unique_id")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            TelemetryError::MalformedPayload("missing metadata.machine_unique_id".to_string())
        })?;
    let host = directory.name_for(machine_unique_id)?;

    info!(
        "Data received from '{}': temp - {:.02} humidity - {:.02}",
        machine_unique_id, temperature, humidity
    );

    let mut point = Point::new(measurement)
        .tag("host", host)
        .field("temperature", FieldValue::Float(temperature))
        .field("humidity", FieldValue::Float(humidity))
        .field("pressure", FieldValue::Float(pressure));

    let metrics = message
        .pointer("/metadata/machine_metrics")
        .unwrap_or(&Value::Null);
    for (name, pointer) in [
        ("current_voltage", "/power/current_voltage"),
        ("charge_percentage", "/power/charge_percentage"),
        ("cpu_temperature", "/cpu_temperature"),
    ] {
        if let Some(value) = optional_float(metrics, pointer) {
            point = point.field(name, FieldValue::Float(value));
        }
    }
    if let Some(mem_free) = metrics.get("mem_free").and_then(Value::as_i64) {
        point = point.field("mem_free", FieldValue::Integer(mem_free));
    }

    Ok(point.time(time))
}

/// Forwards every measurement message to a [`TimeSeriesSink`]
pub struct InfluxForwarder {
    directory: DeviceDirectory,
    sink: Box<dyn TimeSeriesSink>,
    measurement: String,
}

impl InfluxForwarder {
    pub fn new(
        directory: DeviceDirectory,
        sink: Box<dyn TimeSeriesSink>,
        measurement: impl Into<String>,
    ) -> Self {
        Self {
            directory,
            sink,
            measurement: measurement.into(),
        }
    }
}

#[async_trait]
impl MessageHandler for InfluxForwarder {
    async fn handle(&self, _topic: &str, message: &Value) -> Result<()> {
        let point = telemetry_point(message, &self.directory, &self.measurement, Utc::now())?;
        info!("Sending data to Influx...");
        self.sink.write(&point).await
    }
}
