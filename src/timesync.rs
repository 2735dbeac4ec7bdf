//! # Time Synchronization
//!
//! Sets the real-time clock from an SNTP server. The wire exchange is
//! handled by `rsntp`; this module only applies the corrected time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rsntp::AsyncSntpClient;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::clock::SystemClock;
use crate::error::{Result, TelemetryError};

/// Default NTP server.
pub const DEFAULT_SERVER: &str = "pool.ntp.org:123";

/// Trait for synchronizing the real-time clock
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClockSync: Send + Sync {
    /// Queries the time source and sets the RTC. Returns the time applied.
    async fn sync(&self) -> Result<DateTime<Utc>>;
}

/// SNTP client that corrects a [`SystemClock`]
pub struct SntpClient {
    server: String,
    timeout: Duration,
    clock: Arc<SystemClock>,
}

impl SntpClient {
    pub fn new(server: impl Into<String>, timeout: Duration, clock: Arc<SystemClock>) -> Self {
        Self {
            server: server.into(),
            timeout,
            clock,
        }
    }

    async fn query(&self) -> Result<DateTime<Utc>> {
        let client = AsyncSntpClient::new();
        let result = tokio::time::timeout(self.timeout, client.synchronize(self.server.as_str()))
            .await
            .map_err(|_| TelemetryError::ClockSync(format!("No SNTP reply from {}", self.server)))?
            .map_err(|e| TelemetryError::ClockSync(format!("{}: {}", self.server, e)))?;

        result
            .datetime()
            .into_chrono_datetime()
            .map_err(|e| TelemetryError::ClockSync(format!("SNTP time out of range: {}", e)))
    }
}

#[async_trait]
impl ClockSync for SntpClient {
    async fn sync(&self) -> Result<DateTime<Utc>> {
        debug!("Querying SNTP server {}", self.server);
        let now = self.query().await?;
        self.clock.set_time(now);
        info!("Current timestamp is: {}", now.format("%Y-%m-%d %H:%M:%S"));
        Ok(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UdpSocket;

    /// Seconds between the NTP epoch (1900) and the Unix epoch (1970).
    const NTP_UNIX_OFFSET: i64 = 2_208_988_800;

    fn ntp_timestamp(time: DateTime<Utc>) -> [u8; 8] {
        let seconds = (time.timestamp() + NTP_UNIX_OFFSET) as u32;
        let fraction = ((u64::from(time.timestamp_subsec_nanos()) << 32) / 1_000_000_000) as u32;
        let mut stamp = [0u8; 8];
        stamp[..4].copy_from_slice(&seconds.to_be_bytes());
        stamp[4..].copy_from_slice(&fraction.to_be_bytes());
        stamp
    }

    /// Answers one request as a stratum 2 server whose clock reads `now`.
    async fn answer_once(server: UdpSocket, now: DateTime<Utc>) {
        let mut request = [0u8; 48];
        let (_, peer) = server.recv_from(&mut request).await.unwrap();

        let mut reply = [0u8; 48];
        reply[0] = 0x24; // LI 0, VN 4, server
        reply[1] = 2;
        reply[2] = 6;
        reply[3] = 0xec;
        reply[12..16].copy_from_slice(b"GPS\0");
        reply[16..24].copy_from_slice(&ntp_timestamp(now));
        // Originate echoes the client's transmit timestamp
        reply[24..32].copy_from_slice(&request[40..48]);
        reply[32..40].copy_from_slice(&ntp_timestamp(now));
        reply[40..48].copy_from_slice(&ntp_timestamp(now));
        server.send_to(&reply, peer).await.unwrap();
    }

    #[tokio::test]
    async fn test_sync_against_local_server() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let address = server.local_addr().unwrap();
        let target = Utc::now() + chrono::Duration::hours(2);
        let responder = tokio::spawn(answer_once(server, target));

        let clock = Arc::new(SystemClock::new());
        let client = SntpClient::new(address.to_string(), Duration::from_secs(2), clock.clone());

        let applied = client.sync().await.unwrap();
        responder.await.unwrap();

        assert!((applied - target).num_seconds().abs() <= 2);
        let offset = clock.rtc_offset_ms();
        assert!((7_195_000..=7_205_000).contains(&offset), "offset was {}", offset);
    }

    #[tokio::test]
    async fn test_sync_times_out_without_reply() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let address = silent.local_addr().unwrap();
        let clock = Arc::new(SystemClock::new());

        let client = SntpClient::new(address.to_string(), Duration::from_millis(50), clock.clone());

        assert!(matches!(
            client.sync().await,
            Err(TelemetryError::ClockSync(_))
        ));
        assert_eq!(clock.rtc_offset_ms(), 0);
    }

    #[tokio::test]
    async fn test_sync_failure_is_classified_as_clock_sync() {
        let client = SntpClient::new(
            "not a server address",
            Duration::from_secs(1),
            Arc::new(SystemClock::new()),
        );

        let err = client.sync().await.unwrap_err();

        assert_eq!(err.kind(), crate::error::ErrorKind::ClockSync);
    }
}
