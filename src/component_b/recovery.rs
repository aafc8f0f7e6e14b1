//! recovery.rs
//! Escalating link recovery, checked once per recovery period.
//!
//! Tiers, cheapest first:
//! 1. advertising stalled -> restart advertising
//! 2. link stalled (or reinit requested) -> tear the stack down and bring it back
//! 3. still disconnected long after a reinit -> reboot the device
//!
//! The tier lives in `PipelineHealth` so the transmitter can reset it on a
//! delivered frame. Within one outage it only ever moves up, and each tier fires
//! at most once. This task never feeds the hardware watchdog.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::component_a::schedule::PeriodicSchedule;
use crate::component_b::{
    link::{DeviceIdentity, WirelessLink},
    supervisor::LinkSupervisor,
};
use crate::pipeline::Pipeline;
use crate::platform::{Platform, RebootReason};
use crate::utils::diagnostics::DiagnosticKind;
use crate::utils::metrics::{TaskKind, lock_metrics};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RecoveryTier {
    None = 0,
    SoftRestartAdvertising = 1,
    StackReinit = 2,
    DeviceReboot = 3,
}

impl RecoveryTier {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => RecoveryTier::SoftRestartAdvertising,
            2 => RecoveryTier::StackReinit,
            3 => RecoveryTier::DeviceReboot,
            _ => RecoveryTier::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryTimeouts {
    pub advertising_stall_ms: u64,
    pub link_stall_ms: u64,
    pub device_stall_ms: u64,
}

impl Default for RecoveryTimeouts {
    fn default() -> Self {
        Self {
            advertising_stall_ms: 3_000,
            link_stall_ms: 10_000,
            device_stall_ms: 30_000,
        }
    }
}

/// What the watchdog saw on one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub now_ms: u64,
    pub connected: bool,
    /// Start of the current "disconnected and not advertising" stretch.
    pub silent_since_ms: Option<u64>,
    pub last_send_ms: u64,
    pub reinit_requested: bool,
    pub tier: RecoveryTier,
    pub tier_since_ms: u64,
}

/// Transition guards of the recovery state machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryPolicy {
    pub timeouts: RecoveryTimeouts,
}

impl RecoveryPolicy {
    pub fn new(timeouts: RecoveryTimeouts) -> Self {
        Self { timeouts }
    }

    /// Next tier to enter, or `RecoveryTier::None` when nothing needs doing.
    pub fn evaluate(&self, obs: &Observation) -> RecoveryTier {
        let t = &self.timeouts;
        let since = |at: u64| obs.now_ms.saturating_sub(at);

        if obs.tier == RecoveryTier::StackReinit
            && !obs.connected
            && since(obs.tier_since_ms) >= t.device_stall_ms
        {
            return RecoveryTier::DeviceReboot;
        }

        if obs.tier < RecoveryTier::StackReinit
            && (obs.reinit_requested || since(obs.last_send_ms) >= t.link_stall_ms)
        {
            return RecoveryTier::StackReinit;
        }

        if obs.tier < RecoveryTier::SoftRestartAdvertising
            && !obs.connected
            && obs
                .silent_since_ms
                .is_some_and(|at| since(at) >= t.advertising_stall_ms)
        {
            return RecoveryTier::SoftRestartAdvertising;
        }

        RecoveryTier::None
    }
}

pub struct RecoveryWatchdog {
    pipeline: Pipeline,
    link: Arc<dyn WirelessLink>,
    supervisor: Arc<LinkSupervisor>,
    platform: Arc<dyn Platform>,
    identity: DeviceIdentity,
    policy: RecoveryPolicy,
    reinit_settle: Duration,
    period: Duration,
    silent_since_ms: Option<u64>,
}

impl RecoveryWatchdog {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pipeline: Pipeline,
        link: Arc<dyn WirelessLink>,
        supervisor: Arc<LinkSupervisor>,
        platform: Arc<dyn Platform>,
        identity: DeviceIdentity,
        policy: RecoveryPolicy,
        reinit_settle: Duration,
        period: Duration,
    ) -> Self {
        Self {
            pipeline,
            link,
            supervisor,
            platform,
            identity,
            policy,
            reinit_settle,
            period,
            silent_since_ms: None,
        }
    }

    fn observe(&mut self) -> Observation {
        let now = self.pipeline.now_ms();
        let connected = self.pipeline.link_state.is_connected();

        if connected || self.link.is_advertising() {
            self.silent_since_ms = None;
        } else if self.silent_since_ms.is_none() {
            self.silent_since_ms = Some(now);
        }

        let health = &self.pipeline.health;
        Observation {
            now_ms: now,
            connected,
            silent_since_ms: self.silent_since_ms,
            last_send_ms: health.last_successful_send_ms(),
            reinit_requested: health.reinit_requested(),
            tier: health.tier(),
            tier_since_ms: health.tier_since_ms(),
        }
    }

    /// One watchdog check. Returns the tier that fired, `None` if none did.
    pub fn check(&mut self) -> RecoveryTier {
        let obs = self.observe();
        let next = self.policy.evaluate(&obs);
        if next == RecoveryTier::None {
            return RecoveryTier::None;
        }

        // Lost the race against a successful send: the outage is already over.
        if !self.pipeline.health.escalate(obs.tier, next, obs.now_ms) {
            debug!("[Recovery] {:?} skipped, tier changed concurrently", next);
            return RecoveryTier::None;
        }

        self.execute(next);
        lock_metrics(&self.pipeline.metrics).record_recovery(next);
        self.pipeline.diag(DiagnosticKind::Recovery { tier: next });
        next
    }

    fn execute(&mut self, tier: RecoveryTier) {
        match tier {
            RecoveryTier::None => {}
            RecoveryTier::SoftRestartAdvertising => {
                warn!("[Recovery] advertising stalled, restarting advertising");
                if !self.link.start_advertising() {
                    warn!("[Recovery] advertising restart refused by the stack");
                }
            }
            RecoveryTier::StackReinit => {
                let requested = self.pipeline.health.take_reinit_request();
                warn!(
                    "[Recovery] link stalled ({}), reinitializing wireless stack",
                    if requested { "requested by transmitter" } else { "send timeout" }
                );
                self.link.deinit();
                // Forget the old stack's events before the new one can raise any.
                self.supervisor.reset();
                if !self.reinit_settle.is_zero() {
                    thread::sleep(self.reinit_settle);
                }
                let ok = self.link.init(&self.identity);
                self.pipeline.health.reset_failures();
                self.silent_since_ms = None;
                if ok {
                    info!("[Recovery] stack reinit complete, advertising as '{}'", self.identity.name);
                } else {
                    error!("[Recovery] stack reinit failed for '{}'", self.identity.name);
                }
            }
            RecoveryTier::DeviceReboot => {
                error!("[Recovery] still disconnected after stack reinit, rebooting device");
                self.platform.reboot(RebootReason::RecoveryEscalation);
            }
        }
    }

    /// Periodic loop until `stop` is raised.
    pub fn run(mut self, stop: &AtomicBool) {
        info!("[Recovery] started, period {:?}", self.period);
        let mut schedule = PeriodicSchedule::new(self.period);
        while !stop.load(Ordering::Acquire) {
            let release = schedule.wait_next();
            if stop.load(Ordering::Acquire) {
                break;
            }
            if release.late_by.is_some() {
                lock_metrics(&self.pipeline.metrics).record_deadline_miss(TaskKind::Recovery);
            }
            self.check();
        }
        info!("[Recovery] stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(now_ms: u64) -> Observation {
        Observation {
            now_ms,
            connected: false,
            silent_since_ms: None,
            last_send_ms: 0,
            reinit_requested: false,
            tier: RecoveryTier::None,
            tier_since_ms: 0,
        }
    }

    #[test]
    fn tier_values_round_trip_through_u8() {
        for tier in [
            RecoveryTier::None,
            RecoveryTier::SoftRestartAdvertising,
            RecoveryTier::StackReinit,
            RecoveryTier::DeviceReboot,
        ] {
            assert_eq!(RecoveryTier::from_u8(tier as u8), tier);
        }
    }

    #[test]
    fn silent_link_gets_soft_restart_first() {
        let policy = RecoveryPolicy::default();
        let mut o = obs(4_000);
        o.silent_since_ms = Some(1_500);
        assert_eq!(policy.evaluate(&o), RecoveryTier::None);
        o.silent_since_ms = Some(1_000);
        assert_eq!(policy.evaluate(&o), RecoveryTier::SoftRestartAdvertising);

        o.connected = true;
        assert_eq!(policy.evaluate(&o), RecoveryTier::None);
    }

    #[test]
    fn link_stall_or_request_reinits_the_stack() {
        let policy = RecoveryPolicy::default();
        let mut o = obs(10_000);
        o.connected = true;
        o.tier = RecoveryTier::SoftRestartAdvertising;
        assert_eq!(policy.evaluate(&o), RecoveryTier::StackReinit);

        let mut o = obs(500);
        o.connected = true;
        o.reinit_requested = true;
        assert_eq!(policy.evaluate(&o), RecoveryTier::StackReinit);
    }

    #[test]
    fn reboot_needs_a_prior_reinit_and_a_long_disconnect() {
        let policy = RecoveryPolicy::default();
        let mut o = obs(100_000);
        o.tier = RecoveryTier::StackReinit;
        o.tier_since_ms = 80_000;
        assert_eq!(policy.evaluate(&o), RecoveryTier::None);

        o.tier_since_ms = 70_000;
        assert_eq!(policy.evaluate(&o), RecoveryTier::DeviceReboot);

        o.connected = true;
        assert_eq!(policy.evaluate(&o), RecoveryTier::None);
    }

    #[test]
    fn fired_tiers_are_not_repeated() {
        let policy = RecoveryPolicy::default();
        let mut o = obs(1_000_000);
        o.silent_since_ms = Some(0);
        o.reinit_requested = true;
        o.tier = RecoveryTier::DeviceReboot;
        assert_eq!(policy.evaluate(&o), RecoveryTier::None);
    }
}
