//! Timestamps for relation records.
//!
//! `created_at` ordering matters: leaving and re-joining an event must yield
//! a strictly later `created_at`, even when both calls land in the same
//! wall-clock nanosecond. [`MonotonicClock`] guarantees that.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of nanosecond timestamps.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current timestamp in nanoseconds since the Unix epoch.
    fn now(&self) -> u64;
}

/// Wall clock that never returns the same value twice.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: AtomicU64,
}

impl MonotonicClock {
    /// Create a new clock.
    pub fn new() -> Self {
        Self::default()
    }
}

fn wall_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

impl Clock for MonotonicClock {
    fn now(&self) -> u64 {
        let wall = wall_nanos();
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let next = wall.max(last + 1);
            match self
                .last
                .compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(current) => last = current,
            }
        }
    }
}

/// Hand-driven clock for tests. Each reading advances by one.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Create a clock whose first reading is `start + 1`.
    pub fn starting_at(start: u64) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    /// Jump forward by `delta`.
    pub fn advance(&self, delta: u64) {
        self.now.fetch_add(delta, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now.fetch_add(1, Ordering::AcqRel) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_clock_strictly_increases() {
        let clock = MonotonicClock::new();
        let mut previous = clock.now();
        for _ in 0..1000 {
            let next = clock.now();
            assert!(next > previous);
            previous = next;
        }
    }

    #[test]
    fn monotonic_clock_tracks_wall_time() {
        let clock = MonotonicClock::new();
        assert!(clock.now() >= wall_nanos() - 1_000_000_000);
    }

    #[test]
    fn manual_clock_ticks_and_advances() {
        let clock = ManualClock::starting_at(10);
        assert_eq!(clock.now(), 11);
        assert_eq!(clock.now(), 12);
        clock.advance(100);
        assert_eq!(clock.now(), 113);
    }
}
