//! # Network Module
//!
//! Wi-Fi bring-up with a bounded association wait.
//!
//! The wait is measured on the monotonic tick counter with
//! [`ticks_elapsed`], never on wall-clock time, so an RTC correction or a
//! counter wrap during association cannot shorten or extend it.

pub mod nmcli;

use async_trait::async_trait;
use macaddr::MacAddr6;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, info};

use crate::clock::{ticks_elapsed, Clock};
use crate::error::{Result, TelemetryError};
use crate::hal::gpio::OutputPin;

/// Association budget.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// Interval between association status polls.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Trait for a station-mode wireless interface
#[async_trait]
pub trait WirelessInterface: Send + Sync {
    /// Powers the radio up or down.
    async fn activate(&self, active: bool) -> Result<()>;

    /// Starts association with an access point. Does not wait for it.
    async fn connect(&self, ssid: &str, passphrase: &str) -> Result<()>;

    async fn is_connected(&self) -> Result<bool>;

    /// Address assigned to the interface.
    async fn local_address(&self) -> Result<IpAddr>;

    /// Hardware address of the interface.
    async fn mac_address(&self) -> Result<MacAddr6>;
}

/// Access point credentials and wait parameters
#[derive(Debug, Clone, PartialEq)]
pub struct WifiSettings {
    pub ssid: String,
    pub passphrase: String,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl WifiSettings {
    pub fn new(ssid: impl Into<String>, passphrase: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            passphrase: passphrase.into(),
            timeout: CONNECT_TIMEOUT,
            poll_interval: POLL_INTERVAL,
        }
    }
}

/// Result of a successful bring-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    pub ip: IpAddr,
    pub mac_address: MacAddr6,
}

/// Activates the interface and waits for association.
///
/// # Arguments
///
/// * `iface` - Wireless interface to bring up
/// * `clock` - Tick source and sleeper for the poll loop
/// * `settings` - Credentials and wait parameters
/// * `indicator` - Optional LED toggled on every poll
///
/// # Errors
///
/// Returns `WifiTimeout` once more than `settings.timeout` has elapsed
/// without association. No poll happens after that.
pub async fn bring_up(
    iface: &dyn WirelessInterface,
    clock: &dyn Clock,
    settings: &WifiSettings,
    indicator: Option<&dyn OutputPin>,
) -> Result<NetworkInfo> {
    iface.activate(true).await?;

    info!("Trying connect to WiFi (SSID = {})", settings.ssid);
    iface.connect(&settings.ssid, &settings.passphrase).await?;

    let budget_ms = u32::try_from(settings.timeout.as_millis()).unwrap_or(u32::MAX);
    let start = clock.ticks_ms();

    while !iface.is_connected().await? {
        debug!("Waiting for WiFi connection ...");
        if let Some(led) = indicator {
            led.toggle()?;
        }

        let waited_ms = ticks_elapsed(clock.ticks_ms(), start);
        if waited_ms > budget_ms {
            return Err(TelemetryError::WifiTimeout {
                ssid: settings.ssid.clone(),
                waited_ms,
            });
        }

        clock.sleep(settings.poll_interval).await;
    }

    let ip = iface.local_address().await?;
    let mac_address = iface.mac_address().await?;
    info!("Connected on {} (MAC {})", ip, mac_address.to_string().to_lowercase());

    Ok(NetworkInfo { ip, mac_address })
}

/// Powers the wireless interface down.
pub async fn deactivate(iface: &dyn WirelessInterface) -> Result<()> {
    debug!("Deactivating wireless interface");
    iface.activate(false).await
}
