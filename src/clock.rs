//! Uptime source shared by every task.
//!
//! The firmware only ever needs "milliseconds since boot". `MonotonicClock` backs it
//! with `Instant`; `ManualClock` lets recovery timeouts be replayed deterministically.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Instant,
};

pub trait Clock: Send + Sync {
    /// Milliseconds since boot.
    fn now_ms(&self) -> u64;

    /// Uptime truncated to the 32-bit wire timestamp (wraps after ~49 days).
    fn uptime_u32(&self) -> u32 {
        self.now_ms() as u32
    }
}

pub struct MonotonicClock {
    boot: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            boot: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.boot.elapsed().as_millis() as u64
    }
}

/// Clock advanced by hand.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    pub fn advance(&self, ms: u64) -> u64 {
        self.now.fetch_add(ms, Ordering::AcqRel) + ms
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::Release);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(100);
        assert_eq!(clock.advance(50), 150);
        assert_eq!(clock.now_ms(), 150);
        clock.set(10);
        assert_eq!(clock.now_ms(), 10);
    }

    #[test]
    fn wire_timestamp_wraps_like_millis() {
        let clock = ManualClock::new(u32::MAX as u64 + 5);
        assert_eq!(clock.uptime_u32(), 4);
    }
}
