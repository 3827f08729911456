//! Wall-clock source shared by modules and the master.
//!
//! Modules timestamp their readings with it and set it when the master sends
//! its own time in a capabilities query. The master stamps that query.

use std::time::{SystemTime, UNIX_EPOCH};

/// Unix-seconds clock.
pub trait Clock {
    /// Current time in unix seconds.
    fn now(&self) -> u32;

    /// Set the current time in unix seconds.
    fn set(&mut self, unix_seconds: u32);
}

/// Clock that follows the host's system time, shifted by whatever was last `set`.
#[derive(Debug, Clone, Default)]
pub struct SoftClock {
    offset: i64,
}

impl SoftClock {
    pub fn new() -> Self {
        Self::default()
    }

    fn system_seconds() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

impl Clock for SoftClock {
    fn now(&self) -> u32 {
        (Self::system_seconds() + self.offset).clamp(0, u32::MAX as i64) as u32
    }

    fn set(&mut self, unix_seconds: u32) {
        self.offset = unix_seconds as i64 - Self::system_seconds();
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManualClock {
    now: u32,
}

impl ManualClock {
    /// Create a clock stopped at `unix_seconds`.
    pub fn new(unix_seconds: u32) -> Self {
        Self { now: unix_seconds }
    }

    /// Move the clock forward.
    pub fn advance(&mut self, seconds: u32) {
        self.now = self.now.saturating_add(seconds);
    }
}

impl Clock for ManualClock {
    #[inline]
    fn now(&self) -> u32 {
        self.now
    }

    fn set(&mut self, unix_seconds: u32) {
        self.now = unix_seconds;
    }
}
