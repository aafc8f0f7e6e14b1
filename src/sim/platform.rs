//! Host platform: remembers reboot requests so the runner can restart the firmware.

use std::sync::atomic::{AtomicU64, Ordering};

use log::warn;
use parking_lot::Mutex;

use crate::platform::{Platform, RebootReason, ResetReason};

#[derive(Debug)]
pub struct SimulatedPlatform {
    reset_reason: Mutex<ResetReason>,
    pending: Mutex<Option<RebootReason>>,
    requests: AtomicU64,
}

impl SimulatedPlatform {
    pub fn new() -> Self {
        Self {
            reset_reason: Mutex::new(ResetReason::PowerOn),
            pending: Mutex::new(None),
            requests: AtomicU64::new(0),
        }
    }

    /// Reported by the next `reset_reason()`; set by the runner before rebooting.
    pub fn set_reset_reason(&self, reason: ResetReason) {
        *self.reset_reason.lock() = reason;
    }

    pub fn reboot_pending(&self) -> bool {
        self.pending.lock().is_some()
    }

    /// Consumes the first reboot request since the last call.
    pub fn take_reboot_request(&self) -> Option<RebootReason> {
        self.pending.lock().take()
    }

    /// Reboot requests received in total, including ones folded into a pending request.
    pub fn reboot_requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

impl Default for SimulatedPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for SimulatedPlatform {
    fn reset_reason(&self) -> ResetReason {
        *self.reset_reason.lock()
    }

    fn reboot(&self, reason: RebootReason) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let mut pending = self.pending.lock();
        if pending.is_none() {
            warn!("[SimPlatform] reboot requested: {:?}", reason);
            *pending = Some(reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_reboot_request_wins() {
        let p = SimulatedPlatform::new();
        assert!(!p.reboot_pending());
        p.reboot(RebootReason::RecoveryEscalation);
        p.reboot(RebootReason::TaskWatchdog);
        assert_eq!(p.reboot_requests(), 2);
        assert_eq!(p.take_reboot_request(), Some(RebootReason::RecoveryEscalation));
        assert_eq!(p.take_reboot_request(), None);
    }
}
