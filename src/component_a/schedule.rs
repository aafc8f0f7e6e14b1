//! schedule.rs
//! Absolute-deadline periodic release, the `vTaskDelayUntil` of this firmware.
//!
//! The next release is always `previous release + period`, never `now + period`,
//! so wake-up jitter does not accumulate into drift. A late release is reported
//! and the schedule catches up on the following calls.

use std::time::{Duration, Instant};

use spin_sleep::{SpinSleeper, SpinStrategy};

/// What one wake-up looked like.
#[derive(Debug, Clone, Copy)]
pub struct Release {
    /// How far past its scheduled release the task woke, if it was late.
    pub late_by: Option<Duration>,
    /// Time since the previous release; `None` on the first one.
    pub interval: Option<Duration>,
}

pub struct PeriodicSchedule {
    period: Duration,
    sleeper: SpinSleeper,
    next_release: Instant,
    last_release: Option<Instant>,
}

impl PeriodicSchedule {
    pub fn new(period: Duration) -> Self {
        Self::starting_at(period, Instant::now() + period)
    }

    pub fn starting_at(period: Duration, first_release: Instant) -> Self {
        Self {
            period,
            sleeper: SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread),
            next_release: first_release,
            last_release: None,
        }
    }

    /// Sleeps until the next scheduled release.
    pub fn wait_next(&mut self) -> Release {
        let now = Instant::now();
        let late_by = if now < self.next_release {
            self.sleeper.sleep(self.next_release - now);
            None
        } else {
            Some(now - self.next_release)
        };

        let at = Instant::now();
        let interval = self.last_release.map(|last| at.duration_since(last));
        self.last_release = Some(at);
        self.next_release += self.period;

        Release { late_by, interval }
    }
}

/// Absolute difference between a measured interval and its target.
pub fn deviation(actual: Duration, target: Duration) -> Duration {
    if actual > target {
        actual - target
    } else {
        target - actual
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deviation_is_symmetric() {
        let target = Duration::from_millis(20);
        assert_eq!(deviation(Duration::from_millis(23), target), Duration::from_millis(3));
        assert_eq!(deviation(Duration::from_millis(17), target), Duration::from_millis(3));
    }

    #[test]
    fn releases_follow_absolute_deadlines() {
        let period = Duration::from_millis(5);
        let start = Instant::now();
        let mut schedule = PeriodicSchedule::starting_at(period, start + period);

        let first = schedule.wait_next();
        assert!(first.interval.is_none());
        for _ in 0..9 {
            schedule.wait_next();
        }

        // Ten releases anchored at `start`: no earlier than 50 ms after it,
        // whatever the per-wake overshoot was.
        assert!(start.elapsed() >= period * 10);
        assert!(schedule.next_release == start + period * 11);
    }

    #[test]
    fn late_release_is_reported() {
        let period = Duration::from_millis(2);
        let mut schedule =
            PeriodicSchedule::starting_at(period, Instant::now() - Duration::from_millis(10));
        let release = schedule.wait_next();
        assert!(release.late_by.unwrap() >= Duration::from_millis(10));
    }
}
