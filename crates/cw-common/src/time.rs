//! ---
//! cw_section: "01-core-functionality"
//! cw_subsection: "module"
//! cw_type: "source"
//! cw_scope: "code"
//! cw_description: "Injectable time sources under a fixed UTC offset."
//! cw_version: "v0.1.0"
//! cw_owner: "tbd"
//! ---
use std::fmt::Debug;

use chrono::{Duration, FixedOffset, Utc};
use parking_lot::Mutex;

use crate::record::Timestamp;

/// Supplies the current instant under a fixed, documented UTC offset.
pub trait TimeSource: Send + Sync + Debug {
    fn now(&self) -> Timestamp;
}

/// Wall clock projected into a fixed offset (UTC+8 for the default deployment).
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }
}

impl TimeSource for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now().with_timezone(&self.offset)
    }
}

/// Clock pinned to a settable instant.
#[derive(Debug)]
pub struct FixedClock {
    current: Mutex<Timestamp>,
}

impl FixedClock {
    pub fn new(at: Timestamp) -> Self {
        Self {
            current: Mutex::new(at),
        }
    }

    pub fn set(&self, at: Timestamp) {
        *self.current.lock() = at;
    }
}

impl TimeSource for FixedClock {
    fn now(&self) -> Timestamp {
        *self.current.lock()
    }
}

/// Clock that returns its current instant and then advances by a fixed step.
///
/// A negative step simulates a clock regressing between cycles.
#[derive(Debug)]
pub struct SteppingClock {
    current: Mutex<Timestamp>,
    step: Duration,
}

impl SteppingClock {
    pub fn new(start: Timestamp, step: Duration) -> Self {
        Self {
            current: Mutex::new(start),
            step,
        }
    }
}

impl TimeSource for SteppingClock {
    fn now(&self) -> Timestamp {
        let mut current = self.current.lock();
        let now = *current;
        *current = now + self.step;
        now
    }
}

/// Whole minutes from `from` to `to`; negative when `to` precedes `from`.
pub fn whole_minutes_between(from: Timestamp, to: Timestamp) -> i64 {
    (to - from).num_minutes()
}
