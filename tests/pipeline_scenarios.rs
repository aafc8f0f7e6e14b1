//! End-to-end behaviour of the sampler/transmitter pair over the simulated link.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use insole_stream::{
    clock::{Clock, ManualClock, MonotonicClock},
    component_a::{
        sampler::{SampleSource, Sampler, SamplingOutcome},
        sensor::DummySource,
        snapshot::{FrameFormat, TIMESTAMPED_FRAME_LEN, decode_frame},
        transmitter::{TransmitOutcome, Transmitter},
    },
    component_b::{
        hw_watchdog::HardwareWatchdog,
        link::{DeviceIdentity, WirelessLink, link_events},
        supervisor::LinkSupervisor,
    },
    config::FirmwareConfig,
    error::FirmwareError,
    firmware::{Collaborators, Firmware},
    pipeline::Pipeline,
    sim::{link::SimulatedCentral, link::SimulatedLink, platform::SimulatedPlatform},
    utils::{diagnostics::DiagnosticKind, metrics::TaskKind},
};

#[derive(Default)]
struct CountingWatchdog {
    feeds: AtomicU64,
}

impl HardwareWatchdog for CountingWatchdog {
    fn feed(&self) {
        self.feeds.fetch_add(1, Ordering::Relaxed);
    }
}

impl CountingWatchdog {
    fn feeds(&self) -> u64 {
        self.feeds.load(Ordering::Relaxed)
    }
}

struct Rig {
    clock: Arc<ManualClock>,
    pipeline: Pipeline,
    link: Arc<SimulatedLink>,
    supervisor: Arc<LinkSupervisor>,
    watchdog: Arc<CountingWatchdog>,
    sampler: Sampler,
    transmitter: Transmitter,
}

fn rig(failure_threshold: u32) -> Rig {
    let clock = Arc::new(ManualClock::new(0));
    let (tx, rx) = link_events(32);
    let link = Arc::new(SimulatedLink::new(tx));
    let pipeline = Pipeline::new(clock.clone(), Duration::from_millis(5), 1_024);
    let supervisor = Arc::new(LinkSupervisor::new(rx, link.clone(), pipeline.clone(), 100));
    let watchdog = Arc::new(CountingWatchdog::default());

    assert!(link.init(&FirmwareConfig::default().identity()));

    let sampler = Sampler::new(
        pipeline.clone(),
        SampleSource::Dummy(DummySource::new()),
        Duration::from_millis(20),
        Duration::from_millis(5),
        1_000,
    );
    let transmitter = Transmitter::new(
        pipeline.clone(),
        link.clone(),
        supervisor.clone(),
        watchdog.clone(),
        FrameFormat::Timestamped,
        failure_threshold,
        Duration::from_millis(20),
        Duration::from_millis(5),
    );
    Rig {
        clock,
        pipeline,
        link,
        supervisor,
        watchdog,
        sampler,
        transmitter,
    }
}

fn stream(rig: &Rig) {
    assert!(rig.link.connect_central());
    assert!(rig.link.subscribe());
    assert_eq!(rig.supervisor.poll(), 2);
}

#[test]
fn nothing_is_sent_until_a_client_subscribes() {
    let mut rig = rig(10);
    assert_eq!(rig.transmitter.run_cycle(), TransmitOutcome::NotStreaming);

    assert!(rig.link.connect_central());
    assert_eq!(rig.transmitter.run_cycle(), TransmitOutcome::NotStreaming);
    assert!(rig.pipeline.link_state.is_connected());

    assert!(rig.link.subscribe());
    // The sampler only sees the subscription once the link events are applied.
    assert_eq!(rig.sampler.run_cycle(), SamplingOutcome::Cleared);
    assert_eq!(rig.supervisor.poll(), 1);
    assert_eq!(rig.sampler.run_cycle(), SamplingOutcome::Sampled { faults: 0 });
    rig.clock.set(1_234);
    assert_eq!(rig.transmitter.run_cycle(), TransmitOutcome::Sent);

    let bytes = rig.link.frames().try_recv().unwrap();
    assert_eq!(bytes.len(), TIMESTAMPED_FRAME_LEN);
    let decoded = decode_frame(&bytes, FrameFormat::Timestamped).unwrap();
    assert_eq!(decoded.timestamp, 1_234);
    assert_eq!(rig.watchdog.feeds(), 1);
}

#[test]
fn snapshot_is_cleared_while_nobody_listens() {
    let mut rig = rig(10);
    stream(&rig);
    assert_eq!(rig.sampler.run_cycle(), SamplingOutcome::Sampled { faults: 0 });
    assert!(!rig.pipeline.snapshot.read().unwrap().is_cleared());

    rig.link.unsubscribe();
    assert_eq!(rig.transmitter.run_cycle(), TransmitOutcome::NotStreaming);
    assert_eq!(rig.pipeline.link_state.subscribers(), 0);
    assert_eq!(rig.sampler.run_cycle(), SamplingOutcome::Cleared);
    assert!(rig.pipeline.snapshot.read().unwrap().is_cleared());
}

#[test]
fn watchdog_is_fed_only_by_delivered_frames() {
    let mut rig = rig(10);
    stream(&rig);
    rig.link.set_fail_sends(true);

    for n in 1..=10 {
        assert_eq!(
            rig.transmitter.run_cycle(),
            TransmitOutcome::SendFailed { consecutive: n }
        );
    }
    assert_eq!(rig.watchdog.feeds(), 0);
    assert!(!rig.pipeline.health.reinit_requested());

    assert_eq!(rig.transmitter.run_cycle(), TransmitOutcome::ReinitRequested);
    assert!(rig.pipeline.health.reinit_requested());
    assert_eq!(rig.pipeline.health.consecutive_failures(), 0);

    rig.link.set_fail_sends(false);
    rig.clock.advance(20);
    assert_eq!(rig.transmitter.run_cycle(), TransmitOutcome::Sent);
    assert_eq!(rig.watchdog.feeds(), 1);
    assert!(!rig.pipeline.health.reinit_requested());
    assert_eq!(rig.pipeline.health.last_successful_send_ms(), 20);
}

#[test]
fn busy_guard_skips_the_cycle_without_counting_a_failure() {
    let mut rig = rig(10);
    stream(&rig);

    {
        let _held = rig.pipeline.snapshot.try_acquire().unwrap();
        assert_eq!(rig.transmitter.run_cycle(), TransmitOutcome::GuardTimeout);
    }
    assert_eq!(rig.pipeline.health.consecutive_failures(), 0);
    assert!(rig.link.frames().try_recv().is_err());
    assert_eq!(rig.watchdog.feeds(), 0);

    assert_eq!(rig.transmitter.run_cycle(), TransmitOutcome::Sent);
    assert_eq!(rig.watchdog.feeds(), 1);
}

#[test]
fn boot_without_sensors_is_rejected_outside_test_mode() {
    let (tx, rx) = link_events(8);
    let collaborators = Collaborators {
        link: Arc::new(SimulatedLink::new(tx)),
        link_events: rx,
        sensors: None,
        platform: Arc::new(SimulatedPlatform::new()),
        clock: Arc::new(MonotonicClock::new()),
    };
    let err = Firmware::boot(&FirmwareConfig::default(), collaborators)
        .err()
        .unwrap();
    assert!(matches!(err, FirmwareError::Config(_)));
}

#[test]
fn late_send_is_reported_as_timing_deviation() {
    let mut rig = rig(10);
    stream(&rig);

    assert_eq!(rig.transmitter.run_cycle(), TransmitOutcome::Sent);
    thread::sleep(Duration::from_millis(40));
    assert_eq!(rig.transmitter.run_cycle(), TransmitOutcome::Sent);

    // Gated-out cycles restart the interval, so the first frame after a
    // resubscribe is not compared against the last one before it.
    rig.link.unsubscribe();
    assert_eq!(rig.transmitter.run_cycle(), TransmitOutcome::NotStreaming);
    thread::sleep(Duration::from_millis(40));
    assert!(rig.link.subscribe());
    assert_eq!(rig.transmitter.run_cycle(), TransmitOutcome::Sent);

    let m = rig.pipeline.metrics.lock().unwrap();
    assert_eq!(m.timing_deviations, 1);
    assert_eq!(m.transmit_interval_us.len(), 1);
    assert!(m.transmit_interval_us[0] >= 40_000);
    drop(m);

    let deviations: Vec<_> = rig
        .pipeline
        .diagnostics
        .drain()
        .into_iter()
        .filter_map(|d| match d.kind {
            DiagnosticKind::TimingDeviation { task, deviation_us } => Some((task, deviation_us)),
            _ => None,
        })
        .collect();
    assert_eq!(deviations.len(), 1);
    assert_eq!(deviations[0].0, TaskKind::Transmitter);
    assert!(deviations[0].1 >= 20_000);
}

/// Stack that never comes up.
struct DeadStack;

impl WirelessLink for DeadStack {
    fn init(&self, _identity: &DeviceIdentity) -> bool {
        false
    }
    fn deinit(&self) {}
    fn is_connected(&self) -> bool {
        false
    }
    fn subscriber_count(&self) -> u32 {
        0
    }
    fn send(&self, _payload: &[u8]) -> bool {
        false
    }
    fn start_advertising(&self) -> bool {
        false
    }
    fn stop_advertising(&self) {}
    fn is_advertising(&self) -> bool {
        false
    }
}

#[test]
fn boot_aborts_when_the_wireless_stack_fails_to_init() {
    let config = FirmwareConfig {
        test_device: true,
        ..FirmwareConfig::default()
    };
    let (_tx, rx) = link_events(8);
    let platform = Arc::new(SimulatedPlatform::new());
    let collaborators = Collaborators {
        link: Arc::new(DeadStack),
        link_events: rx,
        sensors: None,
        platform: platform.clone(),
        clock: Arc::new(MonotonicClock::new()),
    };

    let err = Firmware::boot(&config, collaborators).err().unwrap();
    match err {
        FirmwareError::LinkInit(name) => assert_eq!(name, config.side.device_name()),
        other => panic!("unexpected boot error: {}", other),
    }
    assert!(!platform.reboot_pending());
}

#[test]
fn booted_firmware_streams_to_a_central() {
    let config = FirmwareConfig {
        test_device: true,
        ..FirmwareConfig::default()
    };
    let (tx, rx) = link_events(config.link_event_capacity);
    let link = Arc::new(SimulatedLink::new(tx));
    let platform = Arc::new(SimulatedPlatform::new());
    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());

    let firmware = Firmware::boot(
        &config,
        Collaborators {
            link: link.clone(),
            link_events: rx,
            sensors: None,
            platform: platform.clone(),
            clock,
        },
    )
    .unwrap();
    assert_eq!(firmware.identity().name, config.side.device_name());

    let running = Arc::new(AtomicBool::new(true));
    let central = SimulatedCentral::new(link.clone(), config.frame_format)
        .spawn(running.clone())
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while firmware.task_watchdog().feed_count() < 10 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20));
    }
    let feeds = firmware.task_watchdog().feed_count();
    let pipeline = firmware.pipeline().clone();
    firmware.shutdown();

    running.store(false, Ordering::Release);
    let report = central.join().unwrap();

    assert!(feeds >= 10, "only {} frames delivered", feeds);
    assert!(report.frames > 0);
    assert_eq!(report.decode_errors, 0);
    assert!(!platform.reboot_pending());
    assert!(pipeline.metrics.lock().unwrap().frames_sent >= feeds);
}
