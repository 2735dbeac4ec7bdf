//! # Linux Board
//!
//! Wires the agent to a Linux single-board computer: `nmcli` for Wi-Fi,
//! IIO for the BME280, sysfs for ADC and GPIO lines, `/dev/watchdog`,
//! SNTP for the clock and `rumqttc` for the broker.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::agent::{AgentSettings, Platform};
use crate::broker::rumqtt::RumqttConnector;
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, CpuTemperatureSource};
use crate::error::Result;
use crate::hal::adc::SysfsAdc;
use crate::hal::gpio::{OutputPin, SysfsPin};
use crate::hal::watchdog::{DevWatchdog, DisabledWatchdog, Watchdog};
use crate::metrics::battery::BatteryMonitor;
use crate::metrics::identity::read_machine_unique_id;
use crate::metrics::system::LinuxSystemStats;
use crate::metrics::temperature::{CpuTemperature, InternalTemperatureSensor, ThermalZone};
use crate::network::nmcli::NmcliInterface;
use crate::network::WifiSettings;
use crate::sensor::iio::Bme280Iio;
use crate::timesync::{ClockSync, SntpClient};

/// Builds the platform and run-loop settings from a loaded [`Config`].
pub struct LinuxBoard<'a> {
    config: &'a Config,
    clock: Arc<SystemClock>,
}

impl<'a> LinuxBoard<'a> {
    /// # Arguments
    ///
    /// * `config` - Validated agent configuration
    /// * `clock` - RTC shared with the SNTP client
    pub fn new(config: &'a Config, clock: Arc<SystemClock>) -> Self {
        Self { config, clock }
    }

    /// Run-loop parameters.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRetryPolicy` if a retry section is out of range.
    pub fn settings(&self) -> Result<AgentSettings> {
        let config = self.config;

        let mut wifi = WifiSettings::new(&config.wifi.ssid, &config.wifi.password);
        wifi.timeout = Duration::from_secs(config.wifi.connect_timeout_s);
        wifi.poll_interval = Duration::from_millis(config.wifi.poll_interval_ms);

        Ok(AgentSettings {
            wifi,
            broker: config.mqtt.session_settings(),
            topic: config.device.topic.clone(),
            measurement_interval: Duration::from_secs(config.device.measurement_interval_s),
            error_sleep: Duration::from_secs(config.device.error_sleep_s),
            watchdog_timeout: config.watchdog_timeout(),
            settle_delay: Duration::from_millis(config.power.settle_delay_ms),
            retry: config.retry_budgets()?,
        })
    }

    /// Opens every device the agent drives.
    ///
    /// # Errors
    ///
    /// Returns an error if the machine id cannot be read or an ADC channel
    /// cannot be opened.
    pub fn platform(&self) -> Result<Platform<RumqttConnector>> {
        let config = self.config;

        let machine_unique_id = read_machine_unique_id(&config.device.machine_id_path)?;
        info!("Machine unique id: {}", machine_unique_id);

        let clock: Arc<dyn Clock> = self.clock.clone();

        Ok(Platform {
            clock,
            wireless: Box::new(NmcliInterface::new(&config.wifi.interface)),
            connector: RumqttConnector::new(),
            sensor: Arc::new(Bme280Iio::new(&config.sensor.iio_device)),
            cpu_temperature: self.cpu_temperature()?,
            system: Arc::new(LinuxSystemStats::new()),
            machine_unique_id,
            status_led: config
                .device
                .status_led
                .as_ref()
                .map(|path| Box::new(SysfsPin::new(path)) as Box<dyn OutputPin>),
            watchdog: self.watchdog(),
            clock_sync: self.clock_sync(),
            battery: self.battery()?,
            power_down_pins: config
                .power
                .power_down_pins
                .iter()
                .map(|path| Box::new(SysfsPin::new(path)) as Box<dyn OutputPin>)
                .collect(),
        })
    }

    fn cpu_temperature(&self) -> Result<Arc<dyn CpuTemperature>> {
        let source = &self.config.cpu_temperature;
        Ok(match source.source {
            CpuTemperatureSource::ThermalZone => Arc::new(ThermalZone::new(&source.path)),
            CpuTemperatureSource::Adc => Arc::new(InternalTemperatureSensor::new(Box::new(
                SysfsAdc::new(&source.path, source.adc_bits)?,
            ))),
        })
    }

    fn watchdog(&self) -> Box<dyn Watchdog> {
        if self.config.watchdog.enabled {
            Box::new(DevWatchdog::new(&self.config.watchdog.device))
        } else {
            warn!("Hardware watchdog disabled");
            Box::new(DisabledWatchdog)
        }
    }

    fn clock_sync(&self) -> Option<Box<dyn ClockSync>> {
        let time = &self.config.time;
        time.sync_enabled.then(|| {
            Box::new(SntpClient::new(
                &time.ntp_server,
                Duration::from_millis(time.timeout_ms),
                self.clock.clone(),
            )) as Box<dyn ClockSync>
        })
    }

    fn battery(&self) -> Result<Option<BatteryMonitor>> {
        let Some(battery) = &self.config.battery else {
            return Ok(None);
        };

        let adc = SysfsAdc::new(&battery.adc_path, battery.adc_bits)?;
        let mut monitor = BatteryMonitor::new(Box::new(adc))
            .with_thresholds(battery.empty_voltage, battery.full_voltage);
        if let Some(pin) = &battery.control_pin {
            monitor = monitor.with_control_pin(Box::new(SysfsPin::new(pin)));
        }
        Ok(Some(monitor))
    }
}
