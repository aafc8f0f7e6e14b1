//! transmitter.rs
//! Periodic consumer: frames the current snapshot and notifies it over the link.
//! - gated on `connected && subscribers > 0`; a gated-out cycle is not a failure
//! - the guard covers stamp + encode only, `send` runs after it is released
//! - a delivered frame is the only thing that feeds the hardware watchdog
//! - more than `failure_threshold` failures in a row request a stack reinit
//! - the deviation check runs on the interval between delivered frames; a
//!   gated-out stretch restarts it

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use log::{debug, info, warn};

use crate::component_a::{
    schedule::{PeriodicSchedule, deviation},
    snapshot::{Frame, FrameFormat, encode_frame},
};
use crate::component_b::{
    hw_watchdog::HardwareWatchdog, link::WirelessLink, supervisor::LinkSupervisor,
};
use crate::pipeline::Pipeline;
use crate::utils::diagnostics::DiagnosticKind;
use crate::utils::metrics::{TaskKind, lock_metrics, push_capped_u64};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmitOutcome {
    /// Not connected or nobody subscribed.
    NotStreaming,
    /// Guard not acquired in time; nothing sent, nothing counted.
    GuardTimeout,
    Sent,
    SendFailed { consecutive: u32 },
    /// Failure streak crossed the threshold; reinit handed to the recovery task.
    ReinitRequested,
}

pub struct Transmitter {
    pipeline: Pipeline,
    link: Arc<dyn WirelessLink>,
    supervisor: Arc<LinkSupervisor>,
    watchdog: Arc<dyn HardwareWatchdog>,
    format: FrameFormat,
    failure_threshold: u32,
    period: Duration,
    tolerance: Duration,
    last_sent: Option<Instant>,
}

impl Transmitter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pipeline: Pipeline,
        link: Arc<dyn WirelessLink>,
        supervisor: Arc<LinkSupervisor>,
        watchdog: Arc<dyn HardwareWatchdog>,
        format: FrameFormat,
        failure_threshold: u32,
        period: Duration,
        tolerance: Duration,
    ) -> Self {
        Self {
            pipeline,
            link,
            supervisor,
            watchdog,
            format,
            failure_threshold,
            period,
            tolerance,
            last_sent: None,
        }
    }

    /// Stamps and encodes the snapshot under the guard. The guard is dropped on return.
    fn frame_snapshot(&self) -> Option<Frame> {
        let mut snap = self.pipeline.snapshot.try_acquire().ok()?;
        snap.timestamp = self.pipeline.clock.uptime_u32();
        Some(encode_frame(&snap, self.format))
    }

    pub fn run_cycle(&mut self) -> TransmitOutcome {
        self.supervisor.poll();

        if !self.pipeline.link_state.can_transmit() {
            self.last_sent = None;
            lock_metrics(&self.pipeline.metrics).idle_cycles += 1;
            return TransmitOutcome::NotStreaming;
        }

        let Some(frame) = self.frame_snapshot() else {
            warn!(
                "[Transmitter] snapshot guard busy for {:?}, nothing sent this cycle",
                self.pipeline.snapshot.wait()
            );
            lock_metrics(&self.pipeline.metrics).record_guard_timeout(TaskKind::Transmitter);
            self.pipeline.diag(DiagnosticKind::GuardTimeout {
                task: TaskKind::Transmitter,
            });
            return TransmitOutcome::GuardTimeout;
        };

        if self.link.send(frame.as_bytes()) {
            self.pipeline.health.record_success(self.pipeline.now_ms());
            self.watchdog.feed();
            {
                let mut m = lock_metrics(&self.pipeline.metrics);
                m.frames_sent += 1;
                m.watchdog_feeds += 1;
            }
            self.check_send_interval(Instant::now());
            return TransmitOutcome::Sent;
        }

        let consecutive = self.pipeline.health.record_failure();
        lock_metrics(&self.pipeline.metrics).send_failures += 1;
        self.pipeline.diag(DiagnosticKind::SendFailed { consecutive });

        if consecutive > self.failure_threshold {
            warn!(
                "[Transmitter] {} consecutive send failures, requesting link reinit",
                consecutive
            );
            self.pipeline.health.request_reinit();
            self.pipeline.health.reset_failures();
            lock_metrics(&self.pipeline.metrics).reinit_requests += 1;
            self.pipeline.diag(DiagnosticKind::ReinitRequested);
            TransmitOutcome::ReinitRequested
        } else {
            debug!("[Transmitter] notify failed ({} in a row)", consecutive);
            TransmitOutcome::SendFailed { consecutive }
        }
    }

    fn check_send_interval(&mut self, sent_at: Instant) {
        let Some(prev) = self.last_sent.replace(sent_at) else {
            return;
        };
        let interval = sent_at.duration_since(prev);
        let dev = deviation(interval, self.period);

        let mut m = lock_metrics(&self.pipeline.metrics);
        push_capped_u64(&mut m.transmit_interval_us, interval.as_micros() as u64);
        if dev <= self.tolerance {
            return;
        }
        m.timing_deviations += 1;
        drop(m);
        warn!(
            "[Transmitter] send interval {:?} deviates {:?} from {:?}",
            interval, dev, self.period
        );
        self.pipeline.diag(DiagnosticKind::TimingDeviation {
            task: TaskKind::Transmitter,
            deviation_us: dev.as_micros() as u64,
        });
    }

    /// Periodic loop until `stop` is raised.
    pub fn run(mut self, stop: &AtomicBool) {
        info!(
            "[Transmitter] started, period {:?}, {:?} framing ({} B)",
            self.period,
            self.format,
            self.format.len()
        );
        let mut schedule = PeriodicSchedule::new(self.period);
        while !stop.load(Ordering::Acquire) {
            let release = schedule.wait_next();
            if stop.load(Ordering::Acquire) {
                break;
            }

            if release.late_by.is_some() {
                lock_metrics(&self.pipeline.metrics).record_deadline_miss(TaskKind::Transmitter);
            }

            self.run_cycle();
        }
        info!("[Transmitter] stopped");
    }
}
