//! supervisor.rs
//! Applies queued link events to the tracker and drives advertising.
//!
//! After a disconnect, advertising resumes once the grace delay has elapsed. The
//! delay is a deadline checked on each poll, so the polling task never sleeps for it.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use crossbeam::channel::Receiver;
use log::{info, warn};
use parking_lot::Mutex;

use crate::component_b::link::{LinkEvent, WirelessLink};
use crate::pipeline::Pipeline;
use crate::utils::diagnostics::DiagnosticKind;

const NO_RESUME: u64 = u64::MAX;

pub struct LinkSupervisor {
    events: Receiver<LinkEvent>,
    link: Arc<dyn WirelessLink>,
    pipeline: Pipeline,
    grace_ms: u64,
    resume_at_ms: AtomicU64,
    /// Serializes `poll` against `reset`, which run on different tasks.
    apply_lock: Mutex<()>,
}

impl LinkSupervisor {
    pub fn new(
        events: Receiver<LinkEvent>,
        link: Arc<dyn WirelessLink>,
        pipeline: Pipeline,
        grace_ms: u64,
    ) -> Self {
        Self {
            events,
            link,
            pipeline,
            grace_ms,
            resume_at_ms: AtomicU64::new(NO_RESUME),
            apply_lock: Mutex::new(()),
        }
    }

    /// Drains pending events, then restarts advertising if a grace delay ran out.
    /// Returns the number of events applied.
    pub fn poll(&self) -> usize {
        let _applying = self.apply_lock.lock();
        let mut applied = 0;
        for event in self.events.try_iter() {
            self.apply(event);
            applied += 1;
        }
        self.resume_advertising_if_due();
        applied
    }

    fn apply(&self, event: LinkEvent) {
        let state = &self.pipeline.link_state;
        match event {
            LinkEvent::Connected => {
                state.set_connected();
                self.resume_at_ms.store(NO_RESUME, Ordering::Release);
                self.link.stop_advertising();
            }
            LinkEvent::Disconnected => {
                let now = self.pipeline.now_ms();
                state.set_disconnected(now);
                self.resume_at_ms
                    .store(now.saturating_add(self.grace_ms), Ordering::Release);
            }
            LinkEvent::Subscribed => {
                let n = state.add_subscriber();
                info!("[Link] client subscribed to notifications ({} active)", n);
            }
            LinkEvent::Unsubscribed => match state.remove_subscriber() {
                Some(n) => info!("[Link] client unsubscribed from notifications ({} active)", n),
                None => self.pipeline.diag(DiagnosticKind::SubscriberUnderflow),
            },
        }
    }

    fn resume_advertising_if_due(&self) {
        let due = self.resume_at_ms.load(Ordering::Acquire);
        if due == NO_RESUME || self.pipeline.now_ms() < due {
            return;
        }
        if self
            .resume_at_ms
            .compare_exchange(due, NO_RESUME, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        if self.pipeline.link_state.is_connected() {
            return;
        }
        if self.link.start_advertising() {
            info!("[Link] advertising restarted after disconnect");
        } else {
            warn!("[Link] failed to restart advertising after disconnect");
        }
    }

    /// True while a post-disconnect advertising restart is still scheduled.
    pub fn resume_pending(&self) -> bool {
        self.resume_at_ms.load(Ordering::Acquire) != NO_RESUME
    }

    /// Forgets queued events and pending deadlines; the tracker goes back to boot state.
    pub fn reset(&self) {
        let _applying = self.apply_lock.lock();
        let stale = self.events.try_iter().count();
        if stale > 0 {
            info!("[Link] discarded {} stale events", stale);
        }
        self.resume_at_ms.store(NO_RESUME, Ordering::Release);
        self.pipeline.link_state.reset(self.pipeline.now_ms());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::component_b::link::{DeviceIdentity, link_events};
    use std::{sync::atomic::AtomicBool, time::Duration};

    #[derive(Default)]
    struct AdvertisingOnly {
        advertising: AtomicBool,
        starts: AtomicU64,
    }

    impl WirelessLink for AdvertisingOnly {
        fn init(&self, _: &DeviceIdentity) -> bool {
            true
        }
        fn deinit(&self) {}
        fn is_connected(&self) -> bool {
            false
        }
        fn subscriber_count(&self) -> u32 {
            0
        }
        fn send(&self, _: &[u8]) -> bool {
            false
        }
        fn start_advertising(&self) -> bool {
            self.starts.fetch_add(1, Ordering::Relaxed);
            self.advertising.store(true, Ordering::Relaxed);
            true
        }
        fn stop_advertising(&self) {
            self.advertising.store(false, Ordering::Relaxed);
        }
        fn is_advertising(&self) -> bool {
            self.advertising.load(Ordering::Relaxed)
        }
    }

    fn setup() -> (
        Arc<ManualClock>,
        Arc<AdvertisingOnly>,
        crate::component_b::link::LinkEventSender,
        LinkSupervisor,
    ) {
        let clock = Arc::new(ManualClock::new(0));
        let pipeline = Pipeline::new(clock.clone(), Duration::from_millis(5), 64);
        let link = Arc::new(AdvertisingOnly::default());
        let (tx, rx) = link_events(8);
        let sup = LinkSupervisor::new(rx, link.clone(), pipeline, 100);
        (clock, link, tx, sup)
    }

    #[test]
    fn connect_halts_advertising() {
        let (_clock, link, tx, sup) = setup();
        link.start_advertising();
        tx.on_connect();
        tx.on_subscribe(1);
        assert_eq!(sup.poll(), 2);
        assert!(!link.is_advertising());
        assert!(sup.pipeline.link_state.can_transmit());
    }

    #[test]
    fn advertising_resumes_only_after_grace_delay() {
        let (clock, link, tx, sup) = setup();
        tx.on_connect();
        tx.on_subscribe(1);
        sup.poll();

        clock.set(1_000);
        tx.on_disconnect();
        sup.poll();
        assert_eq!(sup.pipeline.link_state.subscribers(), 0);
        assert!(sup.resume_pending());
        assert!(!link.is_advertising());

        clock.set(1_099);
        sup.poll();
        assert!(!link.is_advertising());

        clock.set(1_100);
        sup.poll();
        assert!(link.is_advertising());
        assert!(!sup.resume_pending());

        sup.poll();
        assert_eq!(link.starts.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn reconnect_within_grace_cancels_the_restart() {
        let (clock, link, tx, sup) = setup();
        tx.on_disconnect();
        tx.on_connect();
        sup.poll();
        clock.advance(500);
        sup.poll();
        assert_eq!(link.starts.load(Ordering::Relaxed), 0);
        assert!(sup.pipeline.link_state.is_connected());
    }

    #[test]
    fn underflow_is_recorded_as_diagnostic() {
        let (_clock, _link, tx, sup) = setup();
        tx.on_subscribe(0);
        sup.poll();
        let drained = sup.pipeline.diagnostics.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].kind, DiagnosticKind::SubscriberUnderflow);
        assert_eq!(sup.pipeline.link_state.subscribers(), 0);
    }

    #[test]
    fn reset_discards_stale_events() {
        let (clock, _link, tx, sup) = setup();
        tx.on_connect();
        tx.on_subscribe(1);
        clock.set(42);
        sup.reset();
        assert_eq!(sup.poll(), 0);
        assert!(!sup.pipeline.link_state.is_connected());
        assert_eq!(sup.pipeline.link_state.disconnected_since(), Some(42));
    }
}
