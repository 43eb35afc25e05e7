//! Network-synchronized time source
//!
//! All "now" references of the scheduler and the timing engine go through a
//! [`NetworkClock`] instead of the local wall clock, so a skewed client clock
//! can be corrected with an offset obtained from a time server.

use chrono::{Local, NaiveDateTime, TimeDelta};
use std::sync::Mutex;

/// Source of the current civil date and time
pub trait NetworkClock: Send + Sync {
    /// Current local date and time, corrected by network synchronization
    fn current_date_time(&self) -> NaiveDateTime;
}

/// Local wall clock plus a network offset
#[derive(Debug, Default)]
pub struct SystemClock {
    offset: Mutex<TimeDelta>,
}

impl SystemClock {
    /// Create a clock without correction
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a clock with an initial correction in milliseconds
    pub fn with_offset_ms(offset_ms: i64) -> Self {
        Self {
            offset: Mutex::new(TimeDelta::milliseconds(offset_ms)),
        }
    }

    /// Replace the correction, e.g. after a new time server exchange
    pub fn set_offset(&self, offset: TimeDelta) {
        *self.offset.lock().expect("mutex poisoned") = offset;
    }

    /// Current correction
    pub fn offset(&self) -> TimeDelta {
        *self.offset.lock().expect("mutex poisoned")
    }
}

impl NetworkClock for SystemClock {
    fn current_date_time(&self) -> NaiveDateTime {
        Local::now().naive_local() + self.offset()
    }
}

/// Clock that only moves when told to
///
/// Used for offline previews and deterministic tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<NaiveDateTime>,
}

impl ManualClock {
    /// Create a clock frozen at `now`
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Jump to `now`
    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock().expect("mutex poisoned") = now;
    }

    /// Move the clock forward
    pub fn advance(&self, delta: TimeDelta) {
        let mut now = self.now.lock().expect("mutex poisoned");
        *now += delta;
    }
}

impl NetworkClock for ManualClock {
    fn current_date_time(&self) -> NaiveDateTime {
        *self.now.lock().expect("mutex poisoned")
    }
}
