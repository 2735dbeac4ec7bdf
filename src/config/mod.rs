//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! [`Config`] configures the sensor agent, [`CollectorConfig`] the host-side
//! collectors. Both fail fast: an out-of-range value is reported when the
//! file is loaded, never while the pipeline runs.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::agent::RetryBudgets;
use crate::broker::BrokerSettings;
use crate::error::{Result, TelemetryError};
use crate::hal::watchdog::RP2040_MAX_WATCHDOG_MS;
use crate::retry::RetryPolicy;

mod collector;

pub use collector::{CollectorConfig, InfluxConfig, SubscriptionConfig};

/// Firmware variant run by the agent
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeviceMode {
    /// Stays awake and publishes on a fixed cadence
    Continuous,
    /// Publishes once per wake-up, then deep-sleeps
    DutyCycled,
}

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub device: DeviceConfig,
    pub wifi: WifiConfig,
    pub mqtt: MqttConfig,

    #[serde(default)]
    pub sensor: SensorConfig,

    #[serde(default)]
    pub cpu_temperature: CpuTemperatureConfig,

    #[serde(default)]
    pub battery: Option<BatteryConfig>,

    #[serde(default)]
    pub watchdog: WatchdogConfig,

    #[serde(default)]
    pub time: TimeConfig,

    #[serde(default)]
    pub power: PowerConfig,

    #[serde(default)]
    pub retry: RetryOverrides,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Device identity and cadence
#[derive(Debug, Deserialize, Clone)]
pub struct DeviceConfig {
    #[serde(default = "default_mode")]
    pub mode: DeviceMode,

    #[serde(default = "default_topic")]
    pub topic: String,

    #[serde(default = "default_measurement_interval_s")]
    pub measurement_interval_s: u64,

    #[serde(default = "default_error_sleep_s")]
    pub error_sleep_s: u64,

    /// LED brightness or GPIO value file used as status indicator
    #[serde(default)]
    pub status_led: Option<String>,

    #[serde(default = "default_machine_id_path")]
    pub machine_id_path: String,
}

/// Wireless network configuration
#[derive(Debug, Deserialize, Clone)]
pub struct WifiConfig {
    #[serde(default = "default_wifi_interface")]
    pub interface: String,

    pub ssid: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_connect_timeout_s")]
    pub connect_timeout_s: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// Message broker configuration
#[derive(Debug, Deserialize, Clone)]
pub struct MqttConfig {
    pub client_id: String,

    pub host: String,

    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_keepalive_s")]
    pub keepalive_s: u64,
}

/// Environmental sensor configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SensorConfig {
    #[serde(default = "default_iio_device")]
    pub iio_device: String,
}

/// Where the CPU temperature comes from
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CpuTemperatureSource {
    /// Linux thermal zone (millidegrees)
    ThermalZone,
    /// Internal sensor behind an ADC channel
    Adc,
}

/// CPU temperature configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CpuTemperatureConfig {
    #[serde(default = "default_cpu_temperature_source")]
    pub source: CpuTemperatureSource,

    #[serde(default = "default_thermal_zone_path")]
    pub path: String,

    #[serde(default = "default_adc_bits")]
    pub adc_bits: u8,
}

/// Battery monitor configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BatteryConfig {
    pub adc_path: String,

    #[serde(default = "default_adc_bits")]
    pub adc_bits: u8,

    /// GPIO held low while the battery ADC is read
    #[serde(default)]
    pub control_pin: Option<String>,

    #[serde(default = "default_empty_voltage")]
    pub empty_voltage: f64,

    #[serde(default = "default_full_voltage")]
    pub full_voltage: f64,
}

/// Hardware watchdog configuration
#[derive(Debug, Deserialize, Clone)]
pub struct WatchdogConfig {
    #[serde(default = "default_watchdog_enabled")]
    pub enabled: bool,

    #[serde(default = "default_watchdog_device")]
    pub device: String,

    #[serde(default = "default_watchdog_timeout_ms")]
    pub timeout_ms: u64,
}

/// Clock synchronization configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TimeConfig {
    #[serde(default = "default_time_sync_enabled")]
    pub sync_enabled: bool,

    #[serde(default = "default_ntp_server")]
    pub ntp_server: String,

    #[serde(default = "default_ntp_timeout_ms")]
    pub timeout_ms: u64,
}

/// Power-down configuration for duty-cycled devices
#[derive(Debug, Deserialize, Clone)]
pub struct PowerConfig {
    /// Delay between shutting the radio down and sleeping
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// GPIO value files driven low before deep sleep
    #[serde(default)]
    pub power_down_pins: Vec<String>,
}

/// Retry parameters for one protected operation
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RetryConfig {
    /// Floor-truncated
    pub attempts: f64,

    #[serde(default = "default_retry_delay_s")]
    pub delay_s: f64,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

/// Per-operation retry overrides; unset entries use the mode defaults
#[derive(Debug, Deserialize, Clone, Default)]
pub struct RetryOverrides {
    #[serde(default)]
    pub wifi: Option<RetryConfig>,

    #[serde(default)]
    pub clock_sync: Option<RetryConfig>,

    #[serde(default)]
    pub broker: Option<RetryConfig>,

    #[serde(default)]
    pub sensor: Option<RetryConfig>,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for daily rolling log files; console only when unset
    #[serde(default)]
    pub directory: Option<String>,

    #[serde(default = "default_log_file_prefix")]
    pub file_prefix: String,
}

// Default value functions
fn default_mode() -> DeviceMode { DeviceMode::Continuous }
fn default_topic() -> String { "sensors/picow/measurements".to_string() }
fn default_measurement_interval_s() -> u64 { 60 }
fn default_error_sleep_s() -> u64 { 30 }
fn default_machine_id_path() -> String { "/etc/machine-id".to_string() }

fn default_wifi_interface() -> String { "wlan0".to_string() }
fn default_connect_timeout_s() -> u64 { 60 }
fn default_poll_interval_ms() -> u64 { 1000 }

fn default_mqtt_port() -> u16 { 1883 }
fn default_keepalive_s() -> u64 { 60 }

fn default_iio_device() -> String { "/sys/bus/iio/devices/iio:device0".to_string() }

fn default_cpu_temperature_source() -> CpuTemperatureSource { CpuTemperatureSource::ThermalZone }
fn default_thermal_zone_path() -> String { "/sys/class/thermal/thermal_zone0/temp".to_string() }
fn default_adc_bits() -> u8 { 12 }

fn default_empty_voltage() -> f64 { 2.8 }
fn default_full_voltage() -> f64 { 4.2 }

fn default_watchdog_enabled() -> bool { true }
fn default_watchdog_device() -> String { "/dev/watchdog".to_string() }
fn default_watchdog_timeout_ms() -> u64 { RP2040_MAX_WATCHDOG_MS }

fn default_time_sync_enabled() -> bool { true }
fn default_ntp_server() -> String { crate::timesync::DEFAULT_SERVER.to_string() }
fn default_ntp_timeout_ms() -> u64 { 5000 }

fn default_settle_delay_ms() -> u64 { 1000 }

fn default_retry_delay_s() -> f64 { 5.0 }
fn default_backoff_factor() -> f64 { 2.0 }

fn default_log_level() -> String { "info".to_string() }
fn default_log_file_prefix() -> String { "sensor-telemetry".to_string() }

impl Default for SensorConfig {
    fn default() -> Self {
        Self { iio_device: default_iio_device() }
    }
}

impl Default for CpuTemperatureConfig {
    fn default() -> Self {
        Self {
            source: default_cpu_temperature_source(),
            path: default_thermal_zone_path(),
            adc_bits: default_adc_bits(),
        }
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: default_watchdog_enabled(),
            device: default_watchdog_device(),
            timeout_ms: default_watchdog_timeout_ms(),
        }
    }
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            sync_enabled: default_time_sync_enabled(),
            ntp_server: default_ntp_server(),
            timeout_ms: default_ntp_timeout_ms(),
        }
    }
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
            power_down_pins: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: None,
            file_prefix: default_log_file_prefix(),
        }
    }
}

fn invalid(message: impl std::fmt::Display) -> TelemetryError {
    TelemetryError::Config(toml::de::Error::custom(message))
}

impl RetryConfig {
    pub fn new(attempts: f64, delay_s: f64, backoff_factor: f64) -> Self {
        Self {
            attempts,
            delay_s,
            backoff_factor,
        }
    }

    /// Builds the validated policy.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRetryPolicy` for out-of-range parameters.
    pub fn to_policy(&self) -> Result<RetryPolicy> {
        if !self.attempts.is_finite() {
            return Err(TelemetryError::InvalidRetryPolicy(
                "the number of attempts must be a finite number".to_string(),
            ));
        }
        RetryPolicy::new(self.attempts.floor() as i64, self.delay_s, self.backoff_factor)
    }
}

impl DeviceMode {
    /// Retry parameters used when `[retry.*]` does not override them.
    ///
    /// | Operation | Continuous | Duty-cycled |
    /// |-----------|------------|-------------|
    /// | wifi | 1 | 3 / 5 s / ×2 |
    /// | clock_sync | 3 / 5 s / ×2 | 3 / 5 s / ×2 |
    /// | broker | 5 / 5 s / ×2 | 2 / 5 s / ×2 |
    /// | sensor | 1 | 2 / 5 s / ×2 |
    pub fn default_retry(self) -> RetryOverrides {
        let single = RetryConfig::new(1.0, default_retry_delay_s(), 1.0);
        let backoff = |attempts: f64| RetryConfig::new(attempts, 5.0, 2.0);

        match self {
            DeviceMode::Continuous => RetryOverrides {
                wifi: Some(single.clone()),
                clock_sync: Some(backoff(3.0)),
                broker: Some(backoff(5.0)),
                sensor: Some(single),
            },
            DeviceMode::DutyCycled => RetryOverrides {
                wifi: Some(backoff(3.0)),
                clock_sync: Some(backoff(3.0)),
                broker: Some(backoff(2.0)),
                sensor: Some(backoff(2.0)),
            },
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use sensor_telemetry::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Retry policies for every protected operation, mode defaults
    /// overlaid with `[retry.*]`.
    pub fn retry_budgets(&self) -> Result<RetryBudgets> {
        let defaults = self.device.mode.default_retry();
        let pick = |over: &Option<RetryConfig>, default: &Option<RetryConfig>| {
            over.as_ref()
                .or(default.as_ref())
                .map_or_else(|| Ok(RetryPolicy::once()), RetryConfig::to_policy)
        };

        Ok(RetryBudgets {
            wifi: pick(&self.retry.wifi, &defaults.wifi)?,
            clock_sync: pick(&self.retry.clock_sync, &defaults.clock_sync)?,
            broker: pick(&self.retry.broker, &defaults.broker)?,
            sensor: pick(&self.retry.sensor, &defaults.sensor)?,
        })
    }

    /// Watchdog timeout, bounded by the RP2040 maximum.
    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_millis(self.watchdog.timeout_ms.min(RP2040_MAX_WATCHDOG_MS))
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    fn validate(&self) -> Result<()> {
        if self.device.topic.is_empty() {
            return Err(invalid("device topic cannot be empty"));
        }

        if self.device.measurement_interval_s == 0 {
            return Err(invalid("measurement_interval_s must be greater than 0"));
        }

        if self.device.error_sleep_s == 0 || self.device.error_sleep_s > 3600 {
            return Err(invalid("error_sleep_s must be between 1 and 3600"));
        }

        if self.wifi.ssid.is_empty() {
            return Err(invalid("wifi ssid cannot be empty"));
        }

        if self.wifi.interface.is_empty() {
            return Err(invalid("wifi interface cannot be empty"));
        }

        if self.wifi.connect_timeout_s == 0 || self.wifi.connect_timeout_s > 600 {
            return Err(invalid("connect_timeout_s must be between 1 and 600"));
        }

        if self.wifi.poll_interval_ms == 0 || self.wifi.poll_interval_ms > 60000 {
            return Err(invalid("poll_interval_ms must be between 1 and 60000"));
        }

        self.mqtt.validate()?;

        if self.cpu_temperature.path.is_empty() {
            return Err(invalid("cpu_temperature path cannot be empty"));
        }

        if !(1..=16).contains(&self.cpu_temperature.adc_bits) {
            return Err(invalid("adc_bits must be between 1 and 16"));
        }

        if let Some(battery) = &self.battery {
            if battery.adc_path.is_empty() {
                return Err(invalid("battery adc_path cannot be empty"));
            }

            if !(1..=16).contains(&battery.adc_bits) {
                return Err(invalid("battery adc_bits must be between 1 and 16"));
            }

            if !(battery.empty_voltage < battery.full_voltage) {
                return Err(invalid("battery empty_voltage must be less than full_voltage"));
            }
        }

        if self.watchdog.enabled {
            if self.watchdog.device.is_empty() {
                return Err(invalid("watchdog device cannot be empty when enabled"));
            }

            if self.watchdog.timeout_ms < 1000 {
                return Err(invalid("watchdog timeout_ms must be at least 1000"));
            }
        }

        if self.time.sync_enabled {
            if self.time.ntp_server.is_empty() {
                return Err(invalid("ntp_server cannot be empty when sync is enabled"));
            }

            if self.time.timeout_ms == 0 || self.time.timeout_ms > 60000 {
                return Err(invalid("time timeout_ms must be between 1 and 60000"));
            }
        }

        if self.power.settle_delay_ms > 60000 {
            return Err(invalid("settle_delay_ms must be at most 60000"));
        }

        // Surface bad retry parameters at startup instead of mid-cycle
        self.retry_budgets()
            .map_err(|e| invalid(format!("retry: {}", e)))?;

        validate_logging(&self.logging)
    }
}

impl MqttConfig {
    /// Session parameters for the broker connector.
    pub fn session_settings(&self) -> BrokerSettings {
        let mut settings = BrokerSettings::new(&self.client_id, &self.host);
        settings.port = self.port;
        settings.keepalive = Duration::from_secs(self.keepalive_s);
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            settings = settings.with_credentials(username, password);
        }
        settings
    }

    fn validate(&self) -> Result<()> {
        if self.client_id.is_empty() {
            return Err(invalid("mqtt client_id cannot be empty"));
        }

        if self.host.is_empty() {
            return Err(invalid("mqtt host cannot be empty"));
        }

        if self.port == 0 {
            return Err(invalid("mqtt port must be greater than 0"));
        }

        if self.keepalive_s < 5 || self.keepalive_s > 65535 {
            return Err(invalid("keepalive_s must be between 5 and 65535"));
        }

        if self.username.is_some() != self.password.is_some() {
            return Err(invalid("mqtt username and password must be set together"));
        }

        Ok(())
    }
}

fn validate_logging(logging: &LoggingConfig) -> Result<()> {
    if !["trace", "debug", "info", "warn", "error"].contains(&logging.level.as_str()) {
        return Err(invalid(
            "log level must be one of: trace, debug, info, warn, error",
        ));
    }

    if logging.directory.is_some() && logging.file_prefix.is_empty() {
        return Err(invalid("log file_prefix cannot be empty when directory is set"));
    }

    Ok(())
}
