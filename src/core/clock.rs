//! Source of processing time

use crate::core::temporal::Timestamp;
use std::sync::atomic::{AtomicI64, Ordering};

/// Supplies the processing instant stamped on every mutation
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall-clock UTC time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Manually driven clock for tests and replay.
///
/// With a non-zero step, every read advances the clock, so consecutive
/// mutations always see distinct processing instants.
#[derive(Debug)]
pub struct ManualClock {
    micros: AtomicI64,
    step_micros: i64,
}

impl ManualClock {
    /// Clock frozen at `start` until moved with [`ManualClock::set`] or [`ManualClock::advance_secs`]
    pub fn new(start: Timestamp) -> Self {
        Self {
            micros: AtomicI64::new(start.as_micros()),
            step_micros: 0,
        }
    }

    /// Clock that returns `start`, then `start + step`, and so on
    pub fn stepping(start: Timestamp, step_secs: i64) -> Self {
        Self {
            micros: AtomicI64::new(start.as_micros()),
            step_micros: step_secs.saturating_mul(1_000_000),
        }
    }

    pub fn set(&self, ts: Timestamp) {
        self.micros.store(ts.as_micros(), Ordering::SeqCst);
    }

    pub fn advance_secs(&self, secs: i64) {
        self.micros
            .fetch_add(secs.saturating_mul(1_000_000), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_micros(self.micros.fetch_add(self.step_micros, Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(Timestamp::from_secs(100));
        assert_eq!(clock.now(), Timestamp::from_secs(100));
        assert_eq!(clock.now(), Timestamp::from_secs(100));
        clock.advance_secs(5);
        assert_eq!(clock.now(), Timestamp::from_secs(105));
        clock.set(Timestamp::from_secs(1));
        assert_eq!(clock.now(), Timestamp::from_secs(1));
    }

    #[test]
    fn test_stepping_clock() {
        let clock = ManualClock::stepping(Timestamp::from_secs(10), 2);
        assert_eq!(clock.now(), Timestamp::from_secs(10));
        assert_eq!(clock.now(), Timestamp::from_secs(12));
        assert_eq!(clock.now(), Timestamp::from_secs(14));
    }
}
