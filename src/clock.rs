//! Logical (Lamport) and physical clocks.

use parking_lot::{Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

/// A Lamport logical clock. `tick` and `observe` are the only writers:
/// every outbound message carries the result of `tick`, every inbound
/// message feeds its clock value through `observe`.
#[derive(Debug, Default)]
pub struct LogicalClock {
    value: Mutex<u64>,
}

impl LogicalClock {
    pub fn new() -> Self {
        LogicalClock {
            value: Mutex::new(0),
        }
    }

    /// Increments and returns the new value. Called before sending.
    pub fn tick(&self) -> u64 {
        let mut v = self.value.lock();
        *v += 1;
        *v
    }

    /// Folds a received clock value in: `max(local, received) + 1`.
    /// Called for every inbound message, including replication events.
    pub fn observe(&self, received: u64) -> u64 {
        let mut v = self.value.lock();
        *v = (*v).max(received) + 1;
        *v
    }

    /// Current value without advancing it. Used only for diagnostics.
    pub fn peek(&self) -> u64 {
        *self.value.lock()
    }
}

/// Wall clock plus a signed offset in fractional seconds, adjustable by a
/// Berkeley-style clock sync round. `now()` always equals `wall() + offset`.
#[derive(Debug, Default)]
pub struct PhysicalClock {
    offset_secs: RwLock<f64>,
}

impl PhysicalClock {
    pub fn new() -> Self {
        PhysicalClock {
            offset_secs: RwLock::new(0.0),
        }
    }

    /// Unadjusted OS wall-clock time, in fractional seconds since the epoch.
    pub fn wall() -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64()
    }

    /// `wall() + offset`, sub-millisecond precision via `f64` seconds.
    pub fn now(&self) -> f64 {
        Self::wall() + *self.offset_secs.read()
    }

    /// Atomically replaces the offset. Readers never observe a torn value.
    pub fn set_offset(&self, offset_secs: f64) {
        *self.offset_secs.write() = offset_secs;
    }

    pub fn offset(&self) -> f64 {
        *self.offset_secs.read()
    }
}
