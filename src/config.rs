//! Runtime configuration for the master and for modules.
//!
//! Both structs deserialize from JSON with every field optional:
//!
//! ```
//! use fieldkit_bus::config::MasterConfig;
//!
//! let config = MasterConfig::from_json(r#"{ "poll_timeout_ms": 500 }"#).unwrap();
//! assert_eq!(config.poll_timeout_ms, 500);
//! assert_eq!(config.retry_interval_ms, 200);
//! assert_eq!(config.blacklist, vec![104]);
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FieldkitError, Result};
use crate::pool::budget::{
    FRAME_FOOTPRINT, MAX_READINGS_PER_CYCLE, READINGS_POOL_SIZE, READING_FOOTPRINT,
    REPLY_POOL_SIZE,
};

/// Default time to wait for a non-RETRY reply.
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 1000;

/// Default pause between RETRY replies.
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 200;

/// Default upper bound on one reading-status drain.
pub const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 10_000;

/// Default upper bound on readings collected by one drain.
pub const DEFAULT_MAX_DRAIN_READINGS: usize = MAX_READINGS_PER_CYCLE;

/// Address of the real-time clock chip sharing the bus.
pub const RTC_ADDRESS: u8 = 104;

/// Highest address a module may use.
pub const MAX_MODULE_ADDRESS: u8 = 127;

fn default_blacklist() -> Vec<u8> {
    vec![RTC_ADDRESS]
}

/// Master-side polling and scan configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    /// Time to wait for a non-RETRY reply before giving up.
    pub poll_timeout_ms: u64,
    /// Pause after each RETRY reply.
    pub retry_interval_ms: u64,
    /// Upper bound on a single reading-status drain.
    pub drain_timeout_ms: u64,
    /// Upper bound on readings collected by a single drain.
    pub max_drain_readings: usize,
    /// Addresses the scan never touches.
    pub blacklist: Vec<u8>,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
            retry_interval_ms: DEFAULT_RETRY_INTERVAL_MS,
            drain_timeout_ms: DEFAULT_DRAIN_TIMEOUT_MS,
            max_drain_readings: DEFAULT_MAX_DRAIN_READINGS,
            blacklist: default_blacklist(),
        }
    }
}

impl MasterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Set the poll timeout.
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the pause between RETRY replies.
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the drain time bound.
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the drain reading bound.
    pub fn max_drain_readings(mut self, limit: usize) -> Self {
        self.max_drain_readings = limit;
        self
    }

    /// Replace the scan blacklist.
    pub fn blacklist(mut self, addresses: impl IntoIterator<Item = u8>) -> Self {
        self.blacklist = addresses.into_iter().collect();
        self
    }

    #[inline]
    pub fn poll_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    #[inline]
    pub fn retry_interval_duration(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    #[inline]
    pub fn drain_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// True if the scan must skip `address`.
    pub fn is_blacklisted(&self, address: u8) -> bool {
        self.blacklist.contains(&address)
    }

    /// Check the configuration for values the poll loops cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.retry_interval_ms == 0 {
            return Err(FieldkitError::Config(
                "retry_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.retry_interval_ms >= self.poll_timeout_ms {
            return Err(FieldkitError::Config(format!(
                "retry_interval_ms ({}) must be less than poll_timeout_ms ({})",
                self.retry_interval_ms, self.poll_timeout_ms
            )));
        }
        if self.max_drain_readings == 0 {
            return Err(FieldkitError::Config(
                "max_drain_readings must be greater than 0".to_string(),
            ));
        }
        if let Some(address) = self
            .blacklist
            .iter()
            .find(|a| **a == 0 || **a > MAX_MODULE_ADDRESS)
        {
            return Err(FieldkitError::Config(format!(
                "blacklisted address {} is outside 1..={}",
                address, MAX_MODULE_ADDRESS
            )));
        }
        Ok(())
    }
}

/// Module-side pool sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleConfig {
    /// Bytes reserved for queued replies and the pending incoming frame.
    pub reply_pool_size: usize,
    /// Bytes reserved for one measurement's readings.
    pub readings_pool_size: usize,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            reply_pool_size: REPLY_POOL_SIZE,
            readings_pool_size: READINGS_POOL_SIZE,
        }
    }
}

impl ModuleConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn reply_pool_size(mut self, size: usize) -> Self {
        self.reply_pool_size = size;
        self
    }

    pub fn readings_pool_size(mut self, size: usize) -> Self {
        self.readings_pool_size = size;
        self
    }

    /// Both pools must hold at least one frame or one reading respectively.
    pub fn validate(&self) -> Result<()> {
        if self.reply_pool_size < FRAME_FOOTPRINT {
            return Err(FieldkitError::Config(format!(
                "reply_pool_size ({}) is smaller than one frame ({})",
                self.reply_pool_size, FRAME_FOOTPRINT
            )));
        }
        if self.readings_pool_size < READING_FOOTPRINT {
            return Err(FieldkitError::Config(format!(
                "readings_pool_size ({}) is smaller than one reading ({})",
                self.readings_pool_size, READING_FOOTPRINT
            )));
        }
        Ok(())
    }
}
