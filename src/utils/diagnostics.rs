//! diagnostics.rs
//! Non-blocking diagnostic event log for the periodic tasks.
//!
//! Tasks must never block on logging, so events go through a bounded lock-free
//! queue (`ArrayQueue`) and a background consumer drains them into CSV.
//! - Producer: `record()` pushes or, when the queue is full, counts a drop.
//! - Consumer: batches up to 256 events per poll, flushes every 8 batches.

use std::{
    fs::File,
    io::BufWriter,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam_queue::ArrayQueue;
use csv::Writer;
use log::{debug, error};
use parking_lot::Mutex;
use serde::Serialize;

use crate::component_b::recovery::RecoveryTier;
use crate::error::{FirmwareError, Result};
use crate::utils::metrics::TaskKind;

const CONSUMER_POLL_MS: u64 = 5;
const FLUSH_BATCHES: usize = 8;
const DRAIN_BATCH: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    GuardTimeout { task: TaskKind },
    TimingDeviation { task: TaskKind, deviation_us: u64 },
    SensorFault { sensor: &'static str },
    SendFailed { consecutive: u32 },
    ReinitRequested,
    Recovery { tier: RecoveryTier },
    SubscriberUnderflow,
}

impl DiagnosticKind {
    fn label(&self) -> String {
        match self {
            DiagnosticKind::GuardTimeout { task } => format!("guard_timeout@{}", task.name()),
            DiagnosticKind::TimingDeviation { task, deviation_us } => {
                format!("timing:{}us@{}", deviation_us, task.name())
            }
            DiagnosticKind::SensorFault { sensor } => format!("sensor_fault:{}", sensor),
            DiagnosticKind::SendFailed { consecutive } => format!("send_failed:{}", consecutive),
            DiagnosticKind::ReinitRequested => "reinit_requested".to_string(),
            DiagnosticKind::Recovery { tier } => format!("recovery:{:?}", tier),
            DiagnosticKind::SubscriberUnderflow => "subscriber_underflow".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiagnosticRecord {
    pub seq: u64,
    pub uptime_ms: u64,
    pub ts: Instant,
    pub kind: DiagnosticKind,
}

#[derive(Debug, Serialize)]
struct CsvRow {
    seq: u64,
    uptime_ms: u64,
    age_us: u64,
    event: String,
}

impl From<&DiagnosticRecord> for CsvRow {
    fn from(raw: &DiagnosticRecord) -> Self {
        CsvRow {
            seq: raw.seq,
            uptime_ms: raw.uptime_ms,
            age_us: raw.ts.elapsed().as_micros() as u64,
            event: raw.kind.label(),
        }
    }
}

pub struct Diagnostics {
    queue: ArrayQueue<DiagnosticRecord>,
    dropped: AtomicU64,
    seq_counter: AtomicU64,
    consumer_running: AtomicBool,
    consumer_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Diagnostics {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            dropped: AtomicU64::new(0),
            seq_counter: AtomicU64::new(1),
            consumer_running: AtomicBool::new(false),
            consumer_handle: Mutex::new(None),
        }
    }

    /// Non-blocking; a full queue drops the event and counts it.
    pub fn record(&self, uptime_ms: u64, kind: DiagnosticKind) {
        let seq = self.seq_counter.fetch_add(1, Ordering::Relaxed);
        let raw = DiagnosticRecord {
            seq,
            uptime_ms,
            ts: Instant::now(),
            kind,
        };
        if self.queue.push(raw).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Takes everything queued so far. Used when no consumer thread is running.
    pub fn drain(&self) -> Vec<DiagnosticRecord> {
        let mut out = Vec::with_capacity(self.queue.len());
        while let Some(raw) = self.queue.pop() {
            out.push(raw);
        }
        out
    }

    /// Spawns the background consumer writing to `output_csv`.
    pub fn start_consumer(self: &Arc<Self>, output_csv: PathBuf) -> Result<()> {
        let mut handle = self.consumer_handle.lock();
        if handle.is_some() {
            return Err(FirmwareError::Diagnostics("consumer already running".into()));
        }

        let file = File::create(&output_csv)?;
        let mut wtr = Writer::from_writer(BufWriter::new(file));

        self.consumer_running.store(true, Ordering::SeqCst);
        let this = Arc::clone(self);

        let spawned = thread::Builder::new()
            .name("diagnostics".into())
            .spawn(move || {
                let mut flush_counter = 0usize;

                while this.consumer_running.load(Ordering::SeqCst) {
                    let mut any = false;
                    for _ in 0..DRAIN_BATCH {
                        match this.queue.pop() {
                            Some(raw) => {
                                any = true;
                                if let Err(e) = wtr.serialize(CsvRow::from(&raw)) {
                                    error!("[Diagnostics] write failed: {}", e);
                                }
                            }
                            None => break,
                        }
                    }
                    if any {
                        flush_counter += 1;
                        if flush_counter >= FLUSH_BATCHES {
                            wtr.flush().ok();
                            flush_counter = 0;
                        }
                    } else {
                        thread::sleep(Duration::from_millis(CONSUMER_POLL_MS));
                    }
                }

                // Final drain
                while let Some(raw) = this.queue.pop() {
                    wtr.serialize(CsvRow::from(&raw)).ok();
                }
                wtr.flush().ok();
                debug!(
                    "[Diagnostics] consumer exiting. dropped={}",
                    this.dropped.load(Ordering::Relaxed)
                );
            })
            .map_err(|source| FirmwareError::Spawn {
                task: "diagnostics",
                source,
            })?;

        *handle = Some(spawned);
        Ok(())
    }

    pub fn stop_consumer(&self) {
        self.consumer_running.store(false, Ordering::SeqCst);
        let handle = self.consumer_handle.lock().take();
        if let Some(h) = handle {
            let _ = h.join();
        }
    }
}
