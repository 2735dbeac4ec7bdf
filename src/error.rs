//! # Error Types
//!
//! Custom error types for the telemetry pipeline using `thiserror`.

use thiserror::Error;

/// Coarse classification of a [`TelemetryError`].
///
/// Retry policies use these kinds as an allow-list: an error whose kind is
/// not listed is propagated on its first occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Invalid configuration or retry parameters
    Configuration,
    /// Wireless association or local network failures
    Connectivity,
    /// Message broker connect/publish/subscribe failures
    Broker,
    /// Environmental sensor read failures
    Sensor,
    /// ADC, GPIO, watchdog or power control failures
    Hardware,
    /// Real-time clock synchronization failures
    ClockSync,
    /// Payload construction, decoding or directory lookup failures
    Data,
    /// Plain I/O failures
    Io,
}

/// Main error type for the telemetry pipeline
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Retry policy rejected at construction time
    #[error("Invalid retry policy: {0}")]
    InvalidRetryPolicy(String),

    /// Retry policy configured with zero attempts was asked to run
    #[error("Retry policy allows no attempts")]
    NoAttempts,

    /// Wi-Fi association did not complete within the time budget
    #[error("Can't connect to Wi-Fi '{ssid}' (waited {waited_ms} ms)")]
    WifiTimeout { ssid: String, waited_ms: u32 },

    /// Other network interface errors
    #[error("Network error: {0}")]
    Network(String),

    /// Message broker errors
    #[error("Broker error: {0}")]
    Broker(String),

    /// Environmental sensor errors
    #[error("Sensor error: {0}")]
    Sensor(String),

    /// ADC, GPIO, watchdog and power control errors
    #[error("Hardware error: {0}")]
    Hardware(String),

    /// NTP / RTC errors
    #[error("Clock sync error: {0}")]
    ClockSync(String),

    /// Envelope sealed before metadata was attached
    #[error("Envelope is missing its metadata block")]
    IncompleteEnvelope,

    /// Inbound message lacks required fields or has wrong types
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Device identifier missing from the device directory
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    /// Time-series sink errors
    #[error("Sink error: {0}")]
    Sink(String),

    /// JSON serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TelemetryError {
    /// Returns the classification used by retry allow-lists.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TelemetryError::InvalidRetryPolicy(_)
            | TelemetryError::NoAttempts
            | TelemetryError::Config(_) => ErrorKind::Configuration,
            TelemetryError::WifiTimeout { .. } | TelemetryError::Network(_) => {
                ErrorKind::Connectivity
            }
            TelemetryError::Broker(_) => ErrorKind::Broker,
            TelemetryError::Sensor(_) => ErrorKind::Sensor,
            TelemetryError::Hardware(_) => ErrorKind::Hardware,
            TelemetryError::ClockSync(_) => ErrorKind::ClockSync,
            TelemetryError::IncompleteEnvelope
            | TelemetryError::MalformedPayload(_)
            | TelemetryError::UnknownDevice(_)
            | TelemetryError::Sink(_)
            | TelemetryError::Serialization(_) => ErrorKind::Data,
            TelemetryError::Io(_) => ErrorKind::Io,
        }
    }
}

/// Result type alias for the telemetry pipeline
pub type Result<T> = std::result::Result<T, TelemetryError>;
