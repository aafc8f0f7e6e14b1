//! firmware.rs
//! Boot sequence and task lifetime.
//!
//! Boot order: reset reason, sensors, wireless stack, task watchdog, then the
//! three periodic tasks at fixed priorities (sampler > transmitter > recovery).
//! Failing to raise a thread's priority is logged; the task still runs.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam::channel::Receiver;
use log::{error, info, warn};
use thread_priority::{ThreadBuilderExt, ThreadPriority, ThreadPriorityValue};

use crate::clock::Clock;
use crate::component_a::{
    sampler::{SampleSource, Sampler},
    sensor::{DummySource, SensorSuite},
    transmitter::Transmitter,
};
use crate::component_b::{
    hw_watchdog::TaskWatchdog,
    link::{DeviceIdentity, LinkEvent, WirelessLink},
    recovery::{RecoveryPolicy, RecoveryWatchdog},
    supervisor::LinkSupervisor,
};
use crate::config::FirmwareConfig;
use crate::error::{FirmwareError, Result};
use crate::pipeline::Pipeline;
use crate::platform::Platform;

const TRANSMITTER_PRIORITY: u8 = 80;
const RECOVERY_PRIORITY: u8 = 50;

/// Everything the firmware core talks to but does not own.
pub struct Collaborators {
    pub link: Arc<dyn WirelessLink>,
    pub link_events: Receiver<LinkEvent>,
    /// Required unless the configuration runs in test-device mode.
    pub sensors: Option<SensorSuite>,
    pub platform: Arc<dyn Platform>,
    pub clock: Arc<dyn Clock>,
}

pub struct Firmware {
    pipeline: Pipeline,
    supervisor: Arc<LinkSupervisor>,
    task_watchdog: Arc<TaskWatchdog>,
    link: Arc<dyn WirelessLink>,
    identity: DeviceIdentity,
    stop: Arc<AtomicBool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

fn task_priority(level: u8) -> ThreadPriority {
    ThreadPriorityValue::try_from(level)
        .map(ThreadPriority::Crossplatform)
        .unwrap_or(ThreadPriority::Min)
}

fn pin_current_thread(task: &str, core: usize) {
    let core_ids = core_affinity::get_core_ids().unwrap_or_default();
    match core_ids.get(core) {
        Some(core_id) if core_affinity::set_for_current(*core_id) => {
            info!("[Firmware] {} pinned to core {}", task, core);
        }
        Some(_) => error!("[Firmware] failed to pin {} to core {}", task, core),
        None => error!("[Firmware] core {} not found among available cores", core),
    }
}

fn spawn_task<F>(
    name: &'static str,
    priority: ThreadPriority,
    pin_core: Option<usize>,
    stop: Arc<AtomicBool>,
    body: F,
) -> Result<JoinHandle<()>>
where
    F: FnOnce(&AtomicBool) + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn_with_priority(priority, move |prio| {
            if let Err(e) = prio {
                warn!("[Firmware] {} runs at default priority ({:?})", name, e);
            }
            if let Some(core) = pin_core {
                pin_current_thread(name, core);
            }
            body(&stop);
        })
        .map_err(|source| FirmwareError::Spawn { task: name, source })
}

impl Firmware {
    pub fn boot(config: &FirmwareConfig, c: Collaborators) -> Result<Self> {
        config.validate()?;
        info!(
            "[Firmware] booting '{}', reset reason: {}",
            config.side.device_name(),
            c.platform.reset_reason()
        );

        let pipeline = Pipeline::new(
            c.clock.clone(),
            config.guard_timeout(),
            config.diagnostics_capacity,
        );

        let source = if config.test_device {
            warn!("[Firmware] test device mode, streaming dummy data");
            SampleSource::Dummy(DummySource::new())
        } else {
            let mut suite = c.sensors.ok_or_else(|| {
                FirmwareError::config("no sensor suite supplied and test_device is off")
            })?;
            suite.init()?;
            SampleSource::Sensors(suite)
        };

        let supervisor = Arc::new(LinkSupervisor::new(
            c.link_events,
            c.link.clone(),
            pipeline.clone(),
            config.disconnect_grace_ms,
        ));
        // Events queued before this boot describe a connection that no longer exists.
        supervisor.reset();

        let identity = config.identity();
        if !c.link.init(&identity) {
            error!("[Firmware] wireless stack init failed");
            return Err(FirmwareError::LinkInit(identity.name));
        }

        let task_watchdog = Arc::new(TaskWatchdog::new(
            c.clock.clone(),
            Duration::from_millis(config.hw_watchdog_timeout_ms),
        ));
        task_watchdog.start(
            c.platform.clone(),
            Duration::from_millis(config.hw_watchdog_poll_ms),
        )?;

        let mut firmware = Self {
            pipeline: pipeline.clone(),
            supervisor: supervisor.clone(),
            task_watchdog: task_watchdog.clone(),
            link: c.link.clone(),
            identity: identity.clone(),
            stop: Arc::new(AtomicBool::new(false)),
            tasks: Vec::with_capacity(3),
        };

        let sampler = Sampler::new(
            pipeline.clone(),
            source,
            config.sample_period(),
            config.tolerance(),
            config.print_interval_ms,
        );
        let transmitter = Transmitter::new(
            pipeline.clone(),
            c.link.clone(),
            supervisor.clone(),
            task_watchdog,
            config.frame_format,
            config.failure_threshold,
            config.transmit_period(),
            config.tolerance(),
        );
        let recovery = RecoveryWatchdog::new(
            pipeline,
            c.link,
            supervisor,
            c.platform,
            identity,
            RecoveryPolicy::new(config.recovery),
            Duration::from_millis(config.reinit_settle_ms),
            Duration::from_millis(config.recovery_period_ms),
        );

        if let Err(e) = firmware.spawn_tasks(config.pin_core, sampler, transmitter, recovery) {
            firmware.stop_tasks();
            return Err(e);
        }

        info!(
            "[Firmware] setup complete, {:?} framing, sampling every {} ms",
            config.frame_format, config.sample_period_ms
        );
        Ok(firmware)
    }

    fn spawn_tasks(
        &mut self,
        pin_core: Option<usize>,
        sampler: Sampler,
        transmitter: Transmitter,
        recovery: RecoveryWatchdog,
    ) -> Result<()> {
        let stop = self.stop.clone();
        let handle = spawn_task("sampler", ThreadPriority::Max, pin_core, stop.clone(), move |s| {
            sampler.run(s)
        })?;
        self.tasks.push(("sampler", handle));

        let handle = spawn_task(
            "transmitter",
            task_priority(TRANSMITTER_PRIORITY),
            pin_core,
            stop.clone(),
            move |s| transmitter.run(s),
        )?;
        self.tasks.push(("transmitter", handle));

        let handle = spawn_task(
            "recovery",
            task_priority(RECOVERY_PRIORITY),
            pin_core,
            stop.clone(),
            move |s| recovery.run(s),
        )?;
        self.tasks.push(("recovery", handle));
        Ok(())
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn supervisor(&self) -> &Arc<LinkSupervisor> {
        &self.supervisor
    }

    pub fn task_watchdog(&self) -> &Arc<TaskWatchdog> {
        &self.task_watchdog
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    fn stop_tasks(&mut self) {
        self.stop.store(true, Ordering::Release);
        for (name, handle) in self.tasks.drain(..) {
            if handle.join().is_err() {
                error!("[Firmware] {} task panicked", name);
            }
        }
        self.task_watchdog.disarm();
    }

    /// Stops the tasks, disarms the task watchdog and releases the stack.
    pub fn shutdown(mut self) {
        info!("[Firmware] shutting down");
        self.stop_tasks();
        self.link.deinit();
        info!("[Firmware] all tasks joined");
    }
}
