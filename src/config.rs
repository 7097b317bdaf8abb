use std::time::Duration;

use anyhow::{anyhow, ensure};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::sink::SinkConfig;

const DEFAULT_CHARACTERISTIC: Uuid = Uuid::from_u128(0x987312e0_2354_11eb_9f10_fbc30a62cf38);

#[inline]
fn default_device_name() -> String {
    "esp32s3".to_string()
}
#[inline]
fn default_characteristic() -> Uuid {
    DEFAULT_CHARACTERISTIC
}
#[inline]
fn default_sink() -> SinkConfig {
    SinkConfig::default()
}
#[inline]
fn default_scan_duration() -> Duration {
    Duration::from_secs(5)
}
#[inline]
fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}
#[inline]
fn default_poll_interval() -> Duration {
    Duration::from_secs(0)
}
#[inline]
fn default_retry_min() -> Duration {
    Duration::from_secs(1)
}
#[inline]
fn default_retry_max() -> Duration {
    Duration::from_secs(60)
}
#[inline]
fn default_retry_backoff() -> u16 {
    6
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub(crate) struct Config {
    // Advertised name of the peripheral to poll
    // optional, default: esp32s3
    #[serde(default = "default_device_name")]
    pub device_name: String,
    // GATT characteristic holding the payload
    // optional, default: 987312e0-2354-11eb-9f10-fbc30a62cf38
    #[serde(default = "default_characteristic")]
    pub characteristic: Uuid,
    // Where decoded samples go
    // optional, default: File with path data.csv
    #[serde(default = "default_sink")]
    pub sink: SinkConfig,
    // Length of each advertisement scan
    // optional, default: 5s
    #[serde(default = "default_scan_duration", with = "humantime_serde")]
    pub scan_duration: Duration,
    // Upper bound on a single connect or read
    // optional, default: 10s
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
    // Pause after a successful read
    // optional, default: 0s
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
    // Smallest delay after a failed cycle
    // optional, default: 1s
    #[serde(default = "default_retry_min", with = "humantime_serde")]
    pub retry_min: Duration,
    // Largest delay after failed cycles
    // optional, default: 60s
    #[serde(default = "default_retry_max", with = "humantime_serde")]
    pub retry_max: Duration,
    // Number of consecutive failures before hitting retry_max
    // The backoff multiplier will be automatically calculated
    // optional, default: 6
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
            characteristic: default_characteristic(),
            sink: default_sink(),
            scan_duration: default_scan_duration(),
            request_timeout: default_request_timeout(),
            poll_interval: default_poll_interval(),
            retry_min: default_retry_min(),
            retry_max: default_retry_max(),
            retry_backoff: default_retry_backoff(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            !self.device_name.is_empty(),
            "device_name must not be empty"
        );
        if self.retry_min > self.retry_max {
            return Err(anyhow!(
                "retry_min ({:?}) is larger than retry_max ({:?})",
                self.retry_min,
                self.retry_max
            ));
        }
        ensure!(self.retry_backoff >= 1, "retry_backoff must be at least 1");
        Ok(())
    }
}
