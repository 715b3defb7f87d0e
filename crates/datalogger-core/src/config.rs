//! Device configuration
//!
//! The configuration is stored in flash as a `postcard` blob and borrowed
//! straight out of it, so string fields are `&str` slices into that buffer.

use alloc::vec::Vec;

use embassy_time::Duration;
use log::error;
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Stored configuration could not be decoded")]
    Decode,
    #[error("Configuration could not be encoded")]
    Encode,
    #[error("Upload URL is not of the form http://host[:port]/path")]
    InvalidUrl,
    #[error("Upload URL scheme is not supported, only plain http is")]
    UnsupportedScheme,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(bound(deserialize = "'de: 'a"))]
pub struct Config<'a> {
    pub internet: InternetConfig<'a>,
    pub upload: UploadConfig<'a>,
    pub sampling: SamplingConfig,
    pub status: StatusConfig,
}

impl<'a> Config<'a> {
    /// Decode a configuration blob, borrowing its strings from `bytes`.
    pub fn from_bytes(bytes: &'a [u8]) -> Result<Self, ConfigError> {
        postcard::from_bytes(bytes).map_err(|e| {
            error!("Failed to decode configuration: {:?}", e);
            ConfigError::Decode
        })
    }

    /// Encode the configuration for storage.
    pub fn to_vec(&self) -> Result<Vec<u8>, ConfigError> {
        postcard::to_allocvec(self).map_err(|e| {
            error!("Failed to encode configuration: {:?}", e);
            ConfigError::Encode
        })
    }
}

impl Default for Config<'_> {
    fn default() -> Self {
        Self {
            internet: InternetConfig::default(),
            upload: UploadConfig::default(),
            sampling: SamplingConfig::default(),
            status: StatusConfig::default(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct InternetConfig<'a> {
    pub ssid: &'a str,
    pub password: &'a str,
}

/// Where and how batches are delivered
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UploadConfig<'a> {
    /// Write endpoint, e.g. `http://monitor.local:8086/write?db=garden`
    pub url: &'a str,
    /// Line-protocol measurement name
    pub measurement: &'a str,
    /// Seconds between upload cycles
    pub interval_secs: u32,
    /// POST attempts per cycle while the endpoint keeps asking to try again
    pub max_attempts: u8,
    /// Delay between those attempts
    pub retry_backoff_ms: u32,
    /// Largest number of samples sent in one request
    pub max_batch_samples: u16,
    /// Status code that acknowledges a batch
    pub success_status: u16,
}

impl UploadConfig<'_> {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.interval_secs))
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(u64::from(self.retry_backoff_ms))
    }
}

impl Default for UploadConfig<'_> {
    fn default() -> Self {
        Self {
            url: "http://localhost:8086/write?db=garden",
            measurement: "environment",
            interval_secs: 100,
            max_attempts: 5,
            retry_backoff_ms: 500,
            max_batch_samples: 256,
            success_status: 204,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingConfig {
    /// Milliseconds between sensor reads
    pub interval_ms: u32,
}

impl SamplingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(u64::from(self.interval_ms))
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        // DHT22 needs two seconds between conversions
        Self { interval_ms: 2000 }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusConfig {
    pub interval_secs: u32,
}

impl StatusConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.interval_secs))
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

/// Host, port and request target of a plain-HTTP upload URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint<'a> {
    pub host: &'a str,
    pub port: u16,
    /// Path including any query string, always starting with `/`
    pub path: &'a str,
}

impl<'a> Endpoint<'a> {
    pub const DEFAULT_PORT: u16 = 80;

    pub fn parse(url: &'a str) -> Result<Self, ConfigError> {
        let rest = match url.strip_prefix("http://") {
            Some(rest) => rest,
            None if url.contains("://") => return Err(ConfigError::UnsupportedScheme),
            None => return Err(ConfigError::InvalidUrl),
        };

        let (authority, path) = match rest.find('/') {
            Some(split) => rest.split_at(split),
            None => (rest, "/"),
        };
        if authority.contains(['?', '#', '@']) {
            return Err(ConfigError::InvalidUrl);
        }

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => (
                host,
                port.parse::<u16>().map_err(|_| ConfigError::InvalidUrl)?,
            ),
            None => (authority, Self::DEFAULT_PORT),
        };
        if host.is_empty() || port == 0 {
            return Err(ConfigError::InvalidUrl);
        }

        Ok(Self { host, port, path })
    }
}
