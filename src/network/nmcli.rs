//! NetworkManager-backed wireless interface.
//!
//! Association and addressing go through `nmcli`; the hardware address is
//! read from `/sys/class/net/<device>/address`.

use async_trait::async_trait;
use macaddr::MacAddr6;
use std::net::IpAddr;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::debug;

use super::WirelessInterface;
use crate::error::{Result, TelemetryError};

/// `GENERAL.STATE` code NetworkManager reports for an activated device.
const NM_DEVICE_STATE_ACTIVATED: u32 = 100;

/// Extracts the address from an `IP4.ADDRESS` value such as `192.168.1.23/24`.
pub fn parse_ip4_address(output: &str) -> Option<IpAddr> {
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .and_then(|line| line.split('/').next())
        .and_then(|addr| addr.parse().ok())
}

/// Extracts the numeric state from a `GENERAL.STATE` value such as
/// `100 (connected)`.
pub fn parse_device_state(output: &str) -> Option<u32> {
    output.split_whitespace().next()?.parse().ok()
}

/// Wireless interface driven through the NetworkManager CLI
#[derive(Debug, Clone)]
pub struct NmcliInterface {
    device: String,
    sysfs_net: PathBuf,
}

impl NmcliInterface {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            sysfs_net: PathBuf::from("/sys/class/net"),
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    async fn nmcli(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("nmcli")
            .args(args)
            .output()
            .await
            .map_err(|e| TelemetryError::Network(format!("Failed to run nmcli: {}", e)))?;

        if !output.status.success() {
            return Err(TelemetryError::Network(format!(
                "nmcli {} failed: {}",
                args.first().copied().unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl WirelessInterface for NmcliInterface {
    async fn activate(&self, active: bool) -> Result<()> {
        let state = if active { "on" } else { "off" };
        debug!("Switching Wi-Fi radio {}", state);
        self.nmcli(&["radio", "wifi", state]).await.map(|_| ())
    }

    async fn connect(&self, ssid: &str, passphrase: &str) -> Result<()> {
        // --wait 0 returns as soon as activation has been requested
        self.nmcli(&[
            "--wait", "0", "device", "wifi", "connect", ssid, "password", passphrase, "ifname",
            &self.device,
        ])
        .await
        .map(|_| ())
    }

    async fn is_connected(&self) -> Result<bool> {
        let output = self
            .nmcli(&["-g", "GENERAL.STATE", "device", "show", &self.device])
            .await?;
        Ok(parse_device_state(&output) == Some(NM_DEVICE_STATE_ACTIVATED))
    }

    async fn local_address(&self) -> Result<IpAddr> {
        let output = self
            .nmcli(&["-g", "IP4.ADDRESS", "device", "show", &self.device])
            .await?;
        parse_ip4_address(&output).ok_or_else(|| {
            TelemetryError::Network(format!("No IPv4 address on {}", self.device))
        })
    }

    async fn mac_address(&self) -> Result<MacAddr6> {
        let path = self.sysfs_net.join(&self.device).join("address");
        let contents = tokio::fs::read_to_string(&path).await.map_err(|e| {
            TelemetryError::Network(format!("Failed to read {}: {}", path.display(), e))
        })?;
        contents.trim().parse().map_err(|e| {
            TelemetryError::Network(format!(
                "Invalid hardware address '{}' in {}: {}",
                contents.trim(),
                path.display(),
                e
            ))
        })
    }
}
