//! Pipeline metrics for run summaries.
//!
//! Updated by every task once per cycle; bounded to the most recent 1000 points
//! per history so a long session does not grow without limit.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
};

use crate::component_b::recovery::RecoveryTier;

/// Task identifier for per-task attribution of misses and timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Sampler,
    Transmitter,
    Recovery,
}

impl TaskKind {
    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::Sampler => "sampler",
            TaskKind::Transmitter => "transmitter",
            TaskKind::Recovery => "recovery",
        }
    }
}

#[derive(Default, Clone, Debug)]
pub struct Metrics {
    /// Sampler release-to-release jitter (µs)
    pub sample_jitter_us: VecDeque<u64>,
    /// Sampler cycle execution time (µs)
    pub sample_exec_us: VecDeque<u64>,
    /// Interval between consecutive transmitter releases (µs)
    pub transmit_interval_us: VecDeque<u64>,

    pub samples: u64,
    pub cleared_cycles: u64,
    pub sensor_faults: u64,

    pub frames_sent: u64,
    pub send_failures: u64,
    pub idle_cycles: u64,
    pub reinit_requests: u64,
    pub watchdog_feeds: u64,

    pub guard_timeout_sampler: u64,
    pub guard_timeout_transmitter: u64,

    /// Late releases per task
    pub miss_sampler: u64,
    pub miss_transmitter: u64,
    pub miss_recovery: u64,
    pub deadline_miss: u64,

    pub timing_deviations: u64,

    pub advertising_restarts: u64,
    pub stack_reinits: u64,
    pub reboots: u64,
}

impl Metrics {
    pub fn record_deadline_miss(&mut self, task: TaskKind) {
        match task {
            TaskKind::Sampler => self.miss_sampler += 1,
            TaskKind::Transmitter => self.miss_transmitter += 1,
            TaskKind::Recovery => self.miss_recovery += 1,
        }
        self.deadline_miss += 1;
    }

    pub fn record_guard_timeout(&mut self, task: TaskKind) {
        match task {
            TaskKind::Sampler => self.guard_timeout_sampler += 1,
            TaskKind::Transmitter => self.guard_timeout_transmitter += 1,
            TaskKind::Recovery => {}
        }
    }

    pub fn record_recovery(&mut self, tier: RecoveryTier) {
        match tier {
            RecoveryTier::None => {}
            RecoveryTier::SoftRestartAdvertising => self.advertising_restarts += 1,
            RecoveryTier::StackReinit => self.stack_reinits += 1,
            RecoveryTier::DeviceReboot => self.reboots += 1,
        }
    }
}

pub type SharedMetrics = Arc<Mutex<Metrics>>;

pub fn new_shared_metrics() -> SharedMetrics {
    Arc::new(Mutex::new(Metrics::default()))
}

/// Locks the metrics, recovering the data if a task panicked while holding it.
pub fn lock_metrics(metrics: &SharedMetrics) -> MutexGuard<'_, Metrics> {
    match metrics.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub const MAX_POINTS: usize = 1_000;

/// Appends u64 value to metrics buffer; removes oldest if at capacity.
#[inline]
pub fn push_capped_u64(buf: &mut VecDeque<u64>, val: u64) {
    if buf.len() >= MAX_POINTS {
        buf.pop_front();
    }
    buf.push_back(val);
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub count: usize,
}

/// Computes min, max, mean for u64 buffer (cast to f64).
pub fn calculate_stats_u64(data: &VecDeque<u64>) -> Option<Stats> {
    if data.is_empty() {
        return None;
    }

    let count = data.len();
    let min = data.iter().map(|&x| x as f64).fold(f64::INFINITY, f64::min);
    let max = data.iter().map(|&x| x as f64).fold(f64::NEG_INFINITY, f64::max);
    let mean = data.iter().map(|&x| x as f64).sum::<f64>() / count as f64;

    Some(Stats { min, max, mean, count })
}
