//! shared_buffer.rs
//! The single snapshot shared by the sampler (writer) and transmitter (reader).
//!
//! Locking discipline:
//! - Every access goes through a timed `try_lock_for`; nobody waits forever.
//! - The guard always covers a whole-snapshot read or write, never a single field.
//! - A timeout abandons the caller's cycle; it is not retried until the next period.

use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use crate::component_a::snapshot::SensorSnapshot;
use crate::error::GuardTimeout;

pub type SnapshotGuard<'a> = MutexGuard<'a, SensorSnapshot>;

pub struct SharedSnapshot {
    inner: Mutex<SensorSnapshot>,
    wait: Duration,
}

impl SharedSnapshot {
    pub fn new(wait: Duration) -> Self {
        Self {
            inner: Mutex::new(SensorSnapshot::default()),
            wait,
        }
    }

    /// Bounded wait configured for this buffer.
    pub fn wait(&self) -> Duration {
        self.wait
    }

    /// Acquires the guard or gives up after the bounded wait.
    pub fn try_acquire(&self) -> Result<SnapshotGuard<'_>, GuardTimeout> {
        self.inner
            .try_lock_for(self.wait)
            .ok_or(GuardTimeout(self.wait))
    }

    /// Mutates the snapshot under the guard.
    pub fn update<F>(&self, f: F) -> Result<(), GuardTimeout>
    where
        F: FnOnce(&mut SensorSnapshot),
    {
        let mut guard = self.try_acquire()?;
        f(&mut guard);
        Ok(())
    }

    /// Copies the whole snapshot out under the guard.
    pub fn read(&self) -> Result<SensorSnapshot, GuardTimeout> {
        self.try_acquire().map(|guard| *guard)
    }
}
