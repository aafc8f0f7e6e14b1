//! health.rs
//! Delivery bookkeeping shared by the transmitter (writer) and the recovery
//! watchdog (reader). All atomics; neither side ever blocks the other.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};

use crate::component_b::recovery::RecoveryTier;

#[derive(Debug)]
pub struct PipelineHealth {
    last_successful_send_ms: AtomicU64,
    consecutive_failures: AtomicU32,
    reinit_requested: AtomicBool,
    tier: AtomicU8,
    /// When the current tier was entered.
    tier_since_ms: AtomicU64,
}

impl PipelineHealth {
    pub fn new(now_ms: u64) -> Self {
        Self {
            last_successful_send_ms: AtomicU64::new(now_ms),
            consecutive_failures: AtomicU32::new(0),
            reinit_requested: AtomicBool::new(false),
            tier: AtomicU8::new(RecoveryTier::None as u8),
            tier_since_ms: AtomicU64::new(now_ms),
        }
    }

    /// A frame was delivered: clears the failure streak, drops a pending reinit
    /// request and ends any outage.
    pub fn record_success(&self, now_ms: u64) {
        self.last_successful_send_ms.store(now_ms, Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Release);
        self.reinit_requested.store(false, Ordering::Release);
        if self.tier.swap(RecoveryTier::None as u8, Ordering::AcqRel) != RecoveryTier::None as u8 {
            self.tier_since_ms.store(now_ms, Ordering::Release);
        }
    }

    /// Returns the failure streak including this one.
    pub fn record_failure(&self) -> u32 {
        self.consecutive_failures.fetch_add(1, Ordering::AcqRel).saturating_add(1)
    }

    pub fn reset_failures(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    pub fn last_successful_send_ms(&self) -> u64 {
        self.last_successful_send_ms.load(Ordering::Acquire)
    }

    pub fn request_reinit(&self) {
        self.reinit_requested.store(true, Ordering::Release);
    }

    pub fn reinit_requested(&self) -> bool {
        self.reinit_requested.load(Ordering::Acquire)
    }

    /// Consumes a pending reinit request.
    pub fn take_reinit_request(&self) -> bool {
        self.reinit_requested.swap(false, Ordering::AcqRel)
    }

    pub fn tier(&self) -> RecoveryTier {
        RecoveryTier::from_u8(self.tier.load(Ordering::Acquire))
    }

    pub fn tier_since_ms(&self) -> u64 {
        self.tier_since_ms.load(Ordering::Acquire)
    }

    /// Moves `from -> to` unless a successful send reset the tier in between.
    pub fn escalate(&self, from: RecoveryTier, to: RecoveryTier, now_ms: u64) -> bool {
        if to <= from {
            return false;
        }
        let swapped = self
            .tier
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if swapped {
            self.tier_since_ms.store(now_ms, Ordering::Release);
        }
        swapped
    }
}
