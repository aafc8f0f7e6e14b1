//! sampler.rs
//! Periodic producer: reads the sensors and publishes them into the shared snapshot.
//!
//! Per cycle:
//! - nobody subscribed: clear the snapshot so nothing stale is ever streamed
//! - otherwise: read every sensor outside the guard, then write the whole
//!   snapshot in one short critical section
//! - guard not acquired in time: skip this cycle, warn, wait for the next period
//! - execution time over `period + tolerance`: warn, keep going

use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant},
};

use log::{Level, debug, info, log_enabled, warn};

use crate::component_a::{
    schedule::{PeriodicSchedule, deviation},
    sensor::{DummySource, SensorSuite},
    snapshot::SensorReadings,
};
use crate::error::SensorError;
use crate::pipeline::Pipeline;
use crate::utils::diagnostics::DiagnosticKind;
use crate::utils::metrics::{TaskKind, lock_metrics, push_capped_u64};

/// Where readings come from: real sensors, or synthetic data on a test device.
pub enum SampleSource {
    Sensors(SensorSuite),
    Dummy(DummySource),
}

impl SampleSource {
    fn acquire(&mut self, now_ms: u64) -> (SensorReadings, Vec<SensorError>) {
        match self {
            SampleSource::Sensors(suite) => {
                let outcome = suite.sample(now_ms);
                (outcome.readings, outcome.faults)
            }
            SampleSource::Dummy(dummy) => (dummy.next_readings(), Vec::new()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingOutcome {
    /// Snapshot refreshed; `faults` sensors kept their previous value.
    Sampled { faults: usize },
    /// No subscriber, snapshot zeroed.
    Cleared,
    /// Guard not acquired in time, cycle skipped.
    GuardTimeout,
}

pub struct Sampler {
    pipeline: Pipeline,
    source: SampleSource,
    period: Duration,
    tolerance: Duration,
    print_interval_ms: u64,
    last_print_ms: Option<u64>,
}

impl Sampler {
    pub fn new(
        pipeline: Pipeline,
        source: SampleSource,
        period: Duration,
        tolerance: Duration,
        print_interval_ms: u64,
    ) -> Self {
        Self {
            pipeline,
            source,
            period,
            tolerance,
            print_interval_ms,
            last_print_ms: None,
        }
    }

    pub fn run_cycle(&mut self) -> SamplingOutcome {
        let started = Instant::now();
        let now = self.pipeline.now_ms();
        let snapshot = &self.pipeline.snapshot;

        let outcome = if self.pipeline.link_state.subscribers() == 0 {
            match snapshot.update(|s| s.clear()) {
                Ok(()) => SamplingOutcome::Cleared,
                Err(_) => SamplingOutcome::GuardTimeout,
            }
        } else {
            let (readings, faults) = self.source.acquire(now);
            for fault in &faults {
                self.pipeline.diag(DiagnosticKind::SensorFault {
                    sensor: fault.sensor(),
                });
            }
            match snapshot.update(|s| s.apply(&readings)) {
                Ok(()) => SamplingOutcome::Sampled {
                    faults: faults.len(),
                },
                Err(_) => SamplingOutcome::GuardTimeout,
            }
        };

        if outcome == SamplingOutcome::GuardTimeout {
            warn!(
                "[Sampler] snapshot guard busy for {:?}, cycle skipped",
                snapshot.wait()
            );
            self.pipeline.diag(DiagnosticKind::GuardTimeout {
                task: TaskKind::Sampler,
            });
        }

        let exec = started.elapsed();
        let overran = exec > self.period + self.tolerance;
        if overran {
            warn!(
                "[Sampler] cycle took {:?}, budget {:?} + {:?}",
                exec, self.period, self.tolerance
            );
            self.pipeline.diag(DiagnosticKind::TimingDeviation {
                task: TaskKind::Sampler,
                deviation_us: (exec - self.period).as_micros() as u64,
            });
        }

        {
            let mut m = lock_metrics(&self.pipeline.metrics);
            push_capped_u64(&mut m.sample_exec_us, exec.as_micros() as u64);
            match outcome {
                SamplingOutcome::Sampled { faults } => {
                    m.samples += 1;
                    m.sensor_faults += faults as u64;
                }
                SamplingOutcome::Cleared => m.cleared_cycles += 1,
                SamplingOutcome::GuardTimeout => m.record_guard_timeout(TaskKind::Sampler),
            }
            if overran {
                m.timing_deviations += 1;
            }
        }

        self.maybe_print(now);
        outcome
    }

    fn maybe_print(&mut self, now_ms: u64) {
        let due = self
            .last_print_ms
            .is_none_or(|last| now_ms.saturating_sub(last) >= self.print_interval_ms);
        if !due || !log_enabled!(Level::Debug) {
            return;
        }
        self.last_print_ms = Some(now_ms);
        if let Ok(snap) = self.pipeline.snapshot.read() {
            debug!("[Sampler] {}", snap);
        }
    }

    /// Periodic loop until `stop` is raised.
    pub fn run(mut self, stop: &AtomicBool) {
        info!("[Sampler] started, period {:?}", self.period);
        let mut schedule = PeriodicSchedule::new(self.period);
        while !stop.load(Ordering::Acquire) {
            let release = schedule.wait_next();
            if stop.load(Ordering::Acquire) {
                break;
            }
            {
                let mut m = lock_metrics(&self.pipeline.metrics);
                if release.late_by.is_some() {
                    m.record_deadline_miss(TaskKind::Sampler);
                }
                if let Some(interval) = release.interval {
                    push_capped_u64(
                        &mut m.sample_jitter_us,
                        deviation(interval, self.period).as_micros() as u64,
                    );
                }
            }
            self.run_cycle();
        }
        info!("[Sampler] stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::component_a::{
        sensor::{Accelerometer, BatteryGauge, PressureArray},
        snapshot::PRESSURE_CHANNELS,
    };
    use std::sync::Arc;

    fn pipeline() -> Pipeline {
        Pipeline::new(Arc::new(ManualClock::new(0)), Duration::from_millis(5), 64)
    }

    fn sampler(p: &Pipeline) -> Sampler {
        Sampler::new(
            p.clone(),
            SampleSource::Dummy(DummySource::new()),
            Duration::from_millis(20),
            Duration::from_millis(5),
            1_000,
        )
    }

    #[test]
    fn no_subscriber_clears_snapshot() {
        let p = pipeline();
        p.link_state.set_connected();
        p.link_state.add_subscriber();
        let mut s = sampler(&p);
        assert_eq!(s.run_cycle(), SamplingOutcome::Sampled { faults: 0 });
        assert!(!p.snapshot.read().unwrap().is_cleared());

        p.link_state.remove_subscriber();
        assert_eq!(s.run_cycle(), SamplingOutcome::Cleared);
        assert!(p.snapshot.read().unwrap().is_cleared());
        assert_eq!(lock_metrics(&p.metrics).cleared_cycles, 1);
    }

    #[test]
    fn busy_guard_skips_the_cycle() {
        let p = pipeline();
        p.link_state.add_subscriber();
        let mut s = sampler(&p);

        let held = p.snapshot.try_acquire().unwrap();
        let outcome = std::thread::scope(|scope| scope.spawn(|| s.run_cycle()).join().unwrap());
        drop(held);

        assert_eq!(outcome, SamplingOutcome::GuardTimeout);
        assert!(p.snapshot.read().unwrap().is_cleared());
        assert_eq!(lock_metrics(&p.metrics).guard_timeout_sampler, 1);
        assert!(
            p.diagnostics
                .drain()
                .iter()
                .any(|d| d.kind == DiagnosticKind::GuardTimeout { task: TaskKind::Sampler })
        );

        assert_eq!(s.run_cycle(), SamplingOutcome::Sampled { faults: 0 });
    }

    struct SlowAccelerometer(Duration);

    impl Accelerometer for SlowAccelerometer {
        fn read(&mut self) -> Result<[i16; 3], SensorError> {
            std::thread::sleep(self.0);
            Ok([1, 2, 98])
        }
    }

    struct FlatPressure;

    impl PressureArray for FlatPressure {
        fn read(&mut self) -> Result<[u16; PRESSURE_CHANNELS], SensorError> {
            Ok([512; PRESSURE_CHANNELS])
        }
    }

    struct FullBattery;

    impl BatteryGauge for FullBattery {
        fn read(&mut self) -> Result<u8, SensorError> {
            Ok(250)
        }
    }

    #[test]
    fn slow_cycle_is_reported_as_timing_deviation() {
        let p = pipeline();
        p.link_state.set_connected();
        p.link_state.add_subscriber();
        let suite = SensorSuite::new(
            Box::new(SlowAccelerometer(Duration::from_millis(8))),
            Box::new(FlatPressure),
            Box::new(FullBattery),
            300_000,
        );
        let mut s = Sampler::new(
            p.clone(),
            SampleSource::Sensors(suite),
            Duration::from_millis(2),
            Duration::from_millis(1),
            1_000,
        );

        assert_eq!(s.run_cycle(), SamplingOutcome::Sampled { faults: 0 });
        assert_eq!(lock_metrics(&p.metrics).timing_deviations, 1);
        let deviations: Vec<_> = p
            .diagnostics
            .drain()
            .into_iter()
            .filter_map(|d| match d.kind {
                DiagnosticKind::TimingDeviation { task, deviation_us } => Some((task, deviation_us)),
                _ => None,
            })
            .collect();
        assert_eq!(deviations.len(), 1);
        assert_eq!(deviations[0].0, TaskKind::Sampler);
        assert!(deviations[0].1 >= 6_000);
    }
}
