//! CSV export of a run summary: one row per firmware run.
//!
//! Appends to a persistent file so consecutive runs (clean, faulty link, legacy
//! framing) can be compared side by side. The header is written with the first row.

use std::{
    collections::VecDeque,
    fs::{OpenOptions, create_dir_all},
    path::Path,
};

use log::info;
use serde::Serialize;

use crate::error::Result;
use crate::utils::metrics::{SharedMetrics, calculate_stats_u64, lock_metrics};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RunSummary {
    pub run: String,
    pub frames_sent: u64,
    pub send_failures: u64,
    pub samples: u64,
    pub cleared_cycles: u64,
    pub sensor_faults: u64,
    pub guard_timeouts: u64,
    pub deadline_miss: u64,
    pub timing_deviations: u64,
    pub advertising_restarts: u64,
    pub stack_reinits: u64,
    pub reboots: u64,
    pub max_sample_jitter_us: u64,
    pub avg_sample_exec_us: f64,
    pub avg_transmit_interval_us: f64,
}

/// Folds the shared metrics into one summary row.
pub fn summarize(metrics: &SharedMetrics, run: &str) -> RunSummary {
    let m = lock_metrics(metrics);
    let mean = |buf: &VecDeque<u64>| calculate_stats_u64(buf).map(|s| s.mean).unwrap_or(0.0);

    RunSummary {
        run: run.to_string(),
        frames_sent: m.frames_sent,
        send_failures: m.send_failures,
        samples: m.samples,
        cleared_cycles: m.cleared_cycles,
        sensor_faults: m.sensor_faults,
        guard_timeouts: m.guard_timeout_sampler + m.guard_timeout_transmitter,
        deadline_miss: m.deadline_miss,
        timing_deviations: m.timing_deviations,
        advertising_restarts: m.advertising_restarts,
        stack_reinits: m.stack_reinits,
        reboots: m.reboots,
        max_sample_jitter_us: m.sample_jitter_us.iter().copied().max().unwrap_or(0),
        avg_sample_exec_us: mean(&m.sample_exec_us),
        avg_transmit_interval_us: mean(&m.transmit_interval_us),
    }
}

/// Appends `summary` to `csv_path`, creating parent directories and the header as needed.
pub fn export_summary_csv(summary: &RunSummary, csv_path: &Path) -> Result<()> {
    if let Some(parent) = csv_path.parent() {
        create_dir_all(parent)?;
    }
    let file_exists = csv_path.exists();

    let file = OpenOptions::new().create(true).append(true).open(csv_path)?;
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(!file_exists)
        .from_writer(file);
    wtr.serialize(summary)?;
    wtr.flush()?;

    info!("Summary exported to: {}", csv_path.display());
    Ok(())
}
