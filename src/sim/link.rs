//! In-process BLE stack and a scripted central that receives the notifications.
//!
//! `SimulatedLink` behaves like the peripheral's stack: it advertises, accepts a
//! connection, reports CCCD writes through the link callbacks and refuses notifies
//! when nobody listens. Fault knobs make sends fail or keep advertising down.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use log::{debug, info, warn};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::component_a::snapshot::{FrameFormat, decode_frame};
use crate::component_b::link::{DeviceIdentity, LinkEventSender, WirelessLink};

const FRAME_QUEUE: usize = 1_024;

#[derive(Debug, Default)]
struct StackState {
    initialized: bool,
    advertising: bool,
    connected: bool,
    subscribers: u32,
    identity: Option<DeviceIdentity>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LinkStats {
    pub inits: u64,
    pub deinits: u64,
    pub advertising_starts: u64,
    pub frames_sent: u64,
    pub sends_refused: u64,
}

pub struct SimulatedLink {
    events: LinkEventSender,
    state: Mutex<StackState>,
    frames_tx: Sender<Vec<u8>>,
    frames_rx: Receiver<Vec<u8>>,
    fail_sends: AtomicBool,
    advertising_blocked: AtomicBool,
    failure_rate: Mutex<(f64, StdRng)>,
    inits: AtomicU64,
    deinits: AtomicU64,
    advertising_starts: AtomicU64,
    frames_sent: AtomicU64,
    sends_refused: AtomicU64,
}

impl SimulatedLink {
    pub fn new(events: LinkEventSender) -> Self {
        let (frames_tx, frames_rx) = bounded(FRAME_QUEUE);
        Self {
            events,
            state: Mutex::new(StackState::default()),
            frames_tx,
            frames_rx,
            fail_sends: AtomicBool::new(false),
            advertising_blocked: AtomicBool::new(false),
            failure_rate: Mutex::new((0.0, StdRng::seed_from_u64(0x1A50))),
            inits: AtomicU64::new(0),
            deinits: AtomicU64::new(0),
            advertising_starts: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            sends_refused: AtomicU64::new(0),
        }
    }

    /// Every notify fails while set.
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::Release);
    }

    /// Probability that a single notify fails.
    pub fn set_send_failure_rate(&self, rate: f64) {
        self.failure_rate.lock().0 = rate.clamp(0.0, 1.0);
    }

    /// While set, the stack refuses to advertise.
    pub fn set_advertising_blocked(&self, blocked: bool) {
        self.advertising_blocked.store(blocked, Ordering::Release);
        if blocked {
            self.state.lock().advertising = false;
        }
    }

    /// Notifications delivered to the central, oldest first.
    pub fn frames(&self) -> Receiver<Vec<u8>> {
        self.frames_rx.clone()
    }

    pub fn identity(&self) -> Option<DeviceIdentity> {
        self.state.lock().identity.clone()
    }

    pub fn stats(&self) -> LinkStats {
        LinkStats {
            inits: self.inits.load(Ordering::Relaxed),
            deinits: self.deinits.load(Ordering::Relaxed),
            advertising_starts: self.advertising_starts.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            sends_refused: self.sends_refused.load(Ordering::Relaxed),
        }
    }

    // ========================================================================
    // Central side
    // ========================================================================

    /// A central connects; only possible while advertising.
    pub fn connect_central(&self) -> bool {
        {
            let mut s = self.state.lock();
            if !s.initialized || !s.advertising || s.connected {
                return false;
            }
            s.connected = true;
            s.advertising = false;
        }
        self.events.on_connect();
        true
    }

    /// The central writes the CCCD to enable notifications.
    pub fn subscribe(&self) -> bool {
        {
            let mut s = self.state.lock();
            if !s.connected {
                return false;
            }
            s.subscribers += 1;
        }
        self.events.on_subscribe(1);
        true
    }

    /// CCCD write disabling notifications. Reported even if nothing was enabled,
    /// as a real central may do.
    pub fn unsubscribe(&self) {
        {
            let mut s = self.state.lock();
            s.subscribers = s.subscribers.saturating_sub(1);
        }
        self.events.on_subscribe(0);
    }

    /// Connection lost (out of range, central closed it).
    pub fn drop_connection(&self) -> bool {
        {
            let mut s = self.state.lock();
            if !s.connected {
                return false;
            }
            s.connected = false;
            s.subscribers = 0;
        }
        self.events.on_disconnect();
        true
    }

    fn send_fails(&self) -> bool {
        if self.fail_sends.load(Ordering::Acquire) {
            return true;
        }
        let mut guard = self.failure_rate.lock();
        let (rate, rng) = &mut *guard;
        *rate > 0.0 && rng.random_bool(*rate)
    }
}

impl WirelessLink for SimulatedLink {
    fn init(&self, identity: &DeviceIdentity) -> bool {
        self.inits.fetch_add(1, Ordering::Relaxed);
        let mut s = self.state.lock();
        s.initialized = true;
        s.connected = false;
        s.subscribers = 0;
        s.identity = Some(identity.clone());
        s.advertising = !self.advertising_blocked.load(Ordering::Acquire);
        if s.advertising {
            self.advertising_starts.fetch_add(1, Ordering::Relaxed);
        }
        info!(
            "[SimLink] init as '{}' (mtu {}), advertising={}",
            identity.name, identity.mtu, s.advertising
        );
        true
    }

    fn deinit(&self) {
        self.deinits.fetch_add(1, Ordering::Relaxed);
        *self.state.lock() = StackState::default();
        info!("[SimLink] deinit");
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    fn subscriber_count(&self) -> u32 {
        self.state.lock().subscribers
    }

    fn send(&self, payload: &[u8]) -> bool {
        {
            let s = self.state.lock();
            let fits = s
                .identity
                .as_ref()
                .is_some_and(|id| payload.len() <= id.max_payload());
            if !s.connected || s.subscribers == 0 || !fits {
                self.sends_refused.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        }
        if self.send_fails() {
            self.sends_refused.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        match self.frames_tx.try_send(payload.to_vec()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => debug!("[SimLink] central not draining, frame lost"),
            Err(TrySendError::Disconnected(_)) => {}
        }
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        true
    }

    fn start_advertising(&self) -> bool {
        if self.advertising_blocked.load(Ordering::Acquire) {
            return false;
        }
        let mut s = self.state.lock();
        if !s.initialized {
            return false;
        }
        if !s.advertising {
            s.advertising = true;
            self.advertising_starts.fetch_add(1, Ordering::Relaxed);
        }
        true
    }

    fn stop_advertising(&self) {
        self.state.lock().advertising = false;
    }

    fn is_advertising(&self) -> bool {
        self.state.lock().advertising
    }
}

/// What the central saw over a session.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CentralReport {
    pub frames: u64,
    pub decode_errors: u64,
    /// Timestamped frames whose timestamp went backwards.
    pub out_of_order: u64,
    pub connects: u64,
    pub drops: u64,
}

/// Scripted remote peer: connects whenever the insole advertises, subscribes,
/// optionally drops the link every `drop_every`, and decodes every notification.
pub struct SimulatedCentral {
    link: Arc<SimulatedLink>,
    format: FrameFormat,
    drop_every: Option<Duration>,
    reconnect_delay: Duration,
}

impl SimulatedCentral {
    pub fn new(link: Arc<SimulatedLink>, format: FrameFormat) -> Self {
        Self {
            link,
            format,
            drop_every: None,
            reconnect_delay: Duration::from_millis(200),
        }
    }

    pub fn drop_every(mut self, interval: Duration) -> Self {
        self.drop_every = Some(interval);
        self
    }

    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn spawn(self, running: Arc<AtomicBool>) -> std::io::Result<JoinHandle<CentralReport>> {
        thread::Builder::new()
            .name("sim-central".into())
            .spawn(move || self.run(&running))
    }

    fn run(self, running: &AtomicBool) -> CentralReport {
        let frames = self.link.frames();
        let mut report = CentralReport::default();
        let mut last_ts: Option<u32> = None;
        let mut connected_at: Option<Instant> = None;
        let mut wait_until = Instant::now();

        while running.load(Ordering::Acquire) {
            let now = Instant::now();

            if connected_at.is_none() && now >= wait_until && self.link.connect_central() {
                report.connects += 1;
                self.link.subscribe();
                connected_at = Some(now);
                last_ts = None;
            }

            if let (Some(since), Some(every)) = (connected_at, self.drop_every) {
                if now.duration_since(since) >= every {
                    self.link.drop_connection();
                    report.drops += 1;
                    connected_at = None;
                    wait_until = now + self.reconnect_delay;
                }
            }
            if connected_at.is_some() && !self.link.is_connected() {
                // Stack reinit tore the connection down under us.
                connected_at = None;
                wait_until = now + self.reconnect_delay;
            }

            match frames.recv_timeout(Duration::from_millis(5)) {
                Ok(bytes) => self.consume(&bytes, &mut report, &mut last_ts),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        for bytes in frames.try_iter() {
            self.consume(&bytes, &mut report, &mut last_ts);
        }
        info!(
            "[SimCentral] {} frames, {} decode errors, {} connects",
            report.frames, report.decode_errors, report.connects
        );
        report
    }

    fn consume(&self, bytes: &[u8], report: &mut CentralReport, last_ts: &mut Option<u32>) {
        match decode_frame(bytes, self.format) {
            Ok(snap) => {
                report.frames += 1;
                if self.format == FrameFormat::Timestamped {
                    if last_ts.is_some_and(|prev| snap.timestamp < prev) {
                        report.out_of_order += 1;
                    }
                    *last_ts = Some(snap.timestamp);
                }
            }
            Err(e) => {
                report.decode_errors += 1;
                warn!("[SimCentral] {}", e);
            }
        }
    }
}
