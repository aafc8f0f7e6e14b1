//! hw_watchdog.rs
//! Platform dead-man's switch.
//!
//! Fed from exactly one place: the transmitter, after a delivered frame. If it
//! goes unfed for the timeout the monitor asks the platform for a reboot, which
//! catches a wedged pipeline even while the recovery task is still running.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use log::{error, info};
use parking_lot::Mutex;

use crate::clock::Clock;
use crate::error::{FirmwareError, Result};
use crate::platform::{Platform, RebootReason};

/// Sleep granularity of the monitor, so `disarm` never waits a whole poll period.
const MONITOR_SLICE: Duration = Duration::from_millis(10);

pub trait HardwareWatchdog: Send + Sync {
    fn feed(&self);
}

/// Host rendition of the task watchdog timer.
pub struct TaskWatchdog {
    clock: Arc<dyn Clock>,
    timeout_ms: u64,
    last_feed_ms: AtomicU64,
    feeds: AtomicU64,
    armed: AtomicBool,
    fired: AtomicBool,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl TaskWatchdog {
    pub fn new(clock: Arc<dyn Clock>, timeout: Duration) -> Self {
        let now = clock.now_ms();
        Self {
            clock,
            timeout_ms: timeout.as_millis() as u64,
            last_feed_ms: AtomicU64::new(now),
            feeds: AtomicU64::new(0),
            armed: AtomicBool::new(false),
            fired: AtomicBool::new(false),
            monitor: Mutex::new(None),
        }
    }

    pub fn feed_count(&self) -> u64 {
        self.feeds.load(Ordering::Relaxed)
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    /// True once the timer has run out and a reboot was requested.
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    pub fn arm(&self) {
        self.last_feed_ms.store(self.clock.now_ms(), Ordering::Release);
        self.armed.store(true, Ordering::Release);
    }

    /// One monitor step: reboots through `platform` if the timer ran out.
    pub fn check(&self, platform: &dyn Platform) -> bool {
        if !self.is_armed() {
            return false;
        }
        let starved_for = self
            .clock
            .now_ms()
            .saturating_sub(self.last_feed_ms.load(Ordering::Acquire));
        if starved_for < self.timeout_ms {
            return false;
        }
        // Fire once, then stay quiet until re-armed.
        if self.armed.swap(false, Ordering::AcqRel) {
            self.fired.store(true, Ordering::Release);
            error!("[TaskWdt] not fed for {} ms, requesting reboot", starved_for);
            platform.reboot(RebootReason::TaskWatchdog);
            return true;
        }
        false
    }

    /// Arms the timer and spawns the monitor thread polling every `poll`.
    pub fn start(self: &Arc<Self>, platform: Arc<dyn Platform>, poll: Duration) -> Result<()> {
        self.arm();
        let this = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("task-wdt".into())
            .spawn(move || {
                let slice = MONITOR_SLICE.min(poll);
                let mut waited = Duration::ZERO;
                while this.is_armed() {
                    thread::sleep(slice);
                    waited += slice;
                    if waited < poll {
                        continue;
                    }
                    waited = Duration::ZERO;
                    if this.check(platform.as_ref()) {
                        break;
                    }
                }
            })
            .map_err(|source| FirmwareError::Spawn {
                task: "task watchdog",
                source,
            })?;
        *self.monitor.lock() = Some(handle);
        info!("[TaskWdt] armed, timeout {} ms", self.timeout_ms);
        Ok(())
    }

    /// Stops the monitor without rebooting; used on orderly shutdown.
    pub fn disarm(&self) {
        self.armed.store(false, Ordering::Release);
        let handle = self.monitor.lock().take();
        if let Some(h) = handle {
            let _ = h.join();
        }
    }
}

impl HardwareWatchdog for TaskWatchdog {
    fn feed(&self) {
        self.last_feed_ms.store(self.clock.now_ms(), Ordering::Release);
        self.feeds.fetch_add(1, Ordering::Relaxed);
    }
}
