//! Monotonic clock abstraction
//!
//! The coordinator timestamps everything against a monotonic clock with a
//! millisecond face (u32, wrapping) and a microsecond face (u64), matching
//! the high-precision timer of the target hardware. Abstracting the clock
//! lets the scheduling engines run against a manually advanced clock in
//! tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Source of monotonic timestamps
pub trait Clock: Send + Sync {
    /// Milliseconds since an arbitrary epoch; wraps at u32
    fn now_ms(&self) -> u32;
    /// Microseconds since the same epoch
    fn now_us(&self) -> u64;
}

/// Wall clock backed by `std::time::Instant`
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    /// Creates a clock anchored at construction time
    pub fn new() -> Self {
        MonotonicClock { epoch: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u32 {
        self.epoch.elapsed().as_millis() as u32
    }

    fn now_us(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }
}

/// Manually advanced clock for deterministic tests
pub struct ManualClock {
    now_us: AtomicU64,
}

impl ManualClock {
    /// Creates a clock frozen at the given millisecond timestamp
    pub fn at_ms(ms: u32) -> Self {
        ManualClock {
            now_us: AtomicU64::new(u64::from(ms) * 1000),
        }
    }

    /// Advances the clock by the given number of milliseconds
    pub fn advance_ms(&self, ms: u32) {
        self.now_us.fetch_add(u64::from(ms) * 1000, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u32 {
        (self.now_us.load(Ordering::SeqCst) / 1000) as u32
    }

    fn now_us(&self) -> u64 {
        self.now_us.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_clock_advances() {
        let clock = MonotonicClock::new();
        let a = clock.now_us();
        let b = clock.now_us();
        assert!(b >= a);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::at_ms(1000);
        assert_eq!(clock.now_ms(), 1000);
        assert_eq!(clock.now_us(), 1_000_000);

        clock.advance_ms(250);
        assert_eq!(clock.now_ms(), 1250);
        assert_eq!(clock.now_us(), 1_250_000);
    }
}
