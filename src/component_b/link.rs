//! link.rs
//! Wireless link collaborator, link callbacks and the lock-free link state.
//!
//! Stack callbacks run in the stack's own context. They only publish a `LinkEvent`
//! on a bounded channel; the supervisor applies events to the tracker from task
//! context. Tasks read the tracker through atomics and never take the snapshot
//! guard to do so.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
};

use crossbeam::channel::{Receiver, Sender, TrySendError, bounded};
use log::{debug, info, warn};

/// What the link advertises itself as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub name: String,
    pub service_uuid: String,
    pub characteristic_uuid: String,
    pub mtu: u16,
    /// Advertising interval bounds in 0.625 ms units.
    pub adv_interval_min: u16,
    pub adv_interval_max: u16,
}

impl DeviceIdentity {
    /// Largest notification payload one ATT packet can carry.
    pub fn max_payload(&self) -> usize {
        (self.mtu as usize).saturating_sub(3)
    }
}

/// Connection, advertising and notify primitives of the wireless stack.
pub trait WirelessLink: Send + Sync {
    /// Brings the stack up with the given identity and starts advertising.
    fn init(&self, identity: &DeviceIdentity) -> bool;
    fn deinit(&self);
    fn is_connected(&self) -> bool;
    fn subscriber_count(&self) -> u32;
    /// Sends one notification; `false` when the stack refused it.
    fn send(&self, payload: &[u8]) -> bool;
    fn start_advertising(&self) -> bool;
    fn stop_advertising(&self);
    fn is_advertising(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Connected,
    Disconnected,
    Subscribed,
    Unsubscribed,
}

impl LinkEvent {
    /// CCCD write value: any non-zero value enables notifications or indications.
    pub fn from_subscribe_value(value: u16) -> Self {
        if value != 0 {
            LinkEvent::Subscribed
        } else {
            LinkEvent::Unsubscribed
        }
    }
}

/// Callback side of the link event channel. Never blocks.
#[derive(Clone)]
pub struct LinkEventSender {
    tx: Sender<LinkEvent>,
    dropped: Arc<AtomicU64>,
}

impl LinkEventSender {
    pub fn on_connect(&self) {
        self.publish(LinkEvent::Connected);
    }

    pub fn on_disconnect(&self) {
        self.publish(LinkEvent::Disconnected);
    }

    pub fn on_subscribe(&self, value: u16) {
        self.publish(LinkEvent::from_subscribe_value(value));
    }

    pub fn publish(&self, event: LinkEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(ev)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("[Link] event queue full, dropped {:?}", ev);
            }
            Err(TrySendError::Disconnected(ev)) => {
                debug!("[Link] no supervisor listening, {:?} ignored", ev);
            }
        }
    }

    /// Events lost to a full queue since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Creates the bounded channel between stack callbacks and the supervisor.
pub fn link_events(capacity: usize) -> (LinkEventSender, Receiver<LinkEvent>) {
    let (tx, rx) = bounded(capacity.max(1));
    (
        LinkEventSender {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        rx,
    )
}

/// Connection and subscription state, readable from any task without locking.
#[derive(Debug)]
pub struct LinkStateTracker {
    connected: AtomicBool,
    subscribers: AtomicU32,
    disconnected_since_ms: AtomicU64,
}

impl LinkStateTracker {
    pub fn new(now_ms: u64) -> Self {
        Self {
            connected: AtomicBool::new(false),
            subscribers: AtomicU32::new(0),
            disconnected_since_ms: AtomicU64::new(now_ms),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn subscribers(&self) -> u32 {
        self.subscribers.load(Ordering::Acquire)
    }

    /// Streaming is allowed only with a connected central that has subscribed.
    pub fn can_transmit(&self) -> bool {
        self.is_connected() && self.subscribers() > 0
    }

    /// Start of the current disconnected period, `None` while connected.
    pub fn disconnected_since(&self) -> Option<u64> {
        if self.is_connected() {
            None
        } else {
            Some(self.disconnected_since_ms.load(Ordering::Acquire))
        }
    }

    pub fn set_connected(&self) {
        self.connected.store(true, Ordering::Release);
        info!("[Link] central connected");
    }

    /// Marks the link down. One connection at a time, so every subscriber left with it.
    pub fn set_disconnected(&self, now_ms: u64) {
        self.disconnected_since_ms.store(now_ms, Ordering::Release);
        self.connected.store(false, Ordering::Release);
        self.subscribers.store(0, Ordering::Release);
        info!("[Link] central disconnected");
    }

    pub fn add_subscriber(&self) -> u32 {
        let n = self.subscribers.fetch_add(1, Ordering::AcqRel).saturating_add(1);
        debug!("[Link] {} active subscribers", n);
        n
    }

    /// Decrements the subscriber count, clamped at zero.
    /// Returns `None` when there was nobody to remove.
    pub fn remove_subscriber(&self) -> Option<u32> {
        match self
            .subscribers
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        {
            Ok(prev) => {
                debug!("[Link] {} active subscribers", prev - 1);
                Some(prev - 1)
            }
            Err(_) => {
                warn!("[Link] unsubscribe with no active subscriber, count stays at 0");
                None
            }
        }
    }

    /// Back to the boot state, used after a stack reinit.
    pub fn reset(&self, now_ms: u64) {
        self.connected.store(false, Ordering::Release);
        self.subscribers.store(0, Ordering::Release);
        self.disconnected_since_ms.store(now_ms, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn subscribe_value_maps_to_event() {
        assert_eq!(LinkEvent::from_subscribe_value(1), LinkEvent::Subscribed);
        assert_eq!(LinkEvent::from_subscribe_value(2), LinkEvent::Subscribed);
        assert_eq!(LinkEvent::from_subscribe_value(0), LinkEvent::Unsubscribed);
    }

    #[test]
    fn full_channel_drops_instead_of_blocking() {
        let (tx, rx) = link_events(2);
        tx.on_connect();
        tx.on_subscribe(1);
        tx.on_subscribe(0);
        assert_eq!(tx.dropped(), 1);
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![
            LinkEvent::Connected,
            LinkEvent::Subscribed
        ]);
    }

    #[test]
    fn gating_needs_connection_and_subscriber() {
        let t = LinkStateTracker::new(0);
        assert!(!t.can_transmit());
        t.add_subscriber();
        assert!(!t.can_transmit());
        t.set_connected();
        assert!(t.can_transmit());
        assert_eq!(t.disconnected_since(), None);

        t.set_disconnected(500);
        assert!(!t.can_transmit());
        assert_eq!(t.subscribers(), 0);
        assert_eq!(t.disconnected_since(), Some(500));
    }

    #[test]
    fn unsubscribe_at_zero_is_clamped() {
        let t = LinkStateTracker::new(0);
        assert_eq!(t.remove_subscriber(), None);
        assert_eq!(t.subscribers(), 0);
        t.add_subscriber();
        assert_eq!(t.remove_subscriber(), Some(0));
    }

    #[test]
    fn subscriber_count_tracks_a_clamped_model_under_random_events() {
        let mut rng = rand::rng();
        let t = LinkStateTracker::new(0);
        let mut model: u32 = 0;
        for _ in 0..10_000 {
            if rng.random_bool(0.45) {
                t.add_subscriber();
                model += 1;
            } else {
                t.remove_subscriber();
                model = model.saturating_sub(1);
            }
            assert_eq!(t.subscribers(), model);
        }
    }
}
