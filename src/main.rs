//! # Insole Firmware Host Runner
//! Runs the firmware core against simulated sensors, a simulated BLE stack and a
//! scripted central, so the real-time pipeline and its recovery path can be
//! watched end to end without hardware.
//!
//! ## Modes
//! - **Clean run:** central connects, subscribes and receives 43-byte frames.
//! - **Faulty link:** send failures, connection drops and blocked advertising are
//!   injected on a timeline; the recovery watchdog escalates up to a reboot.
//! - **Legacy framing:** clean run with the 39-byte frame.
//!
//! An optional JSON config path may be given as the first argument.
//!
//! ## Outputs
//! - `data/logs/diagnostics_<mode>_boot<N>.csv`: diagnostic events per boot.
//! - `data/logs/run_summary.csv`: one summary row per boot.

use std::{
    io::{Write, stdin, stdout},
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use log::{error, info, warn};

use insole_stream::{
    clock::MonotonicClock,
    component_a::snapshot::FrameFormat,
    component_b::link::{LinkEvent, link_events},
    config::FirmwareConfig,
    firmware::{Collaborators, Firmware},
    platform::ResetReason,
    sim::{
        link::{CentralReport, SimulatedCentral, SimulatedLink},
        platform::SimulatedPlatform,
        sensors::sim_sensor_suite,
    },
    utils::metrics_export::{export_summary_csv, summarize},
};

const CLEAN_RUN_SECS: u64 = 10;
const FAULTY_RUN_SECS: u64 = 30;
const LOG_DIR: &str = "data/logs";
const SUPERVISE_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunMode {
    Clean,
    FaultyLink,
    Legacy,
}

impl RunMode {
    fn tag(self) -> &'static str {
        match self {
            RunMode::Clean => "clean",
            RunMode::FaultyLink => "faulty_link",
            RunMode::Legacy => "legacy",
        }
    }

    fn duration(self) -> Duration {
        match self {
            RunMode::FaultyLink => Duration::from_secs(FAULTY_RUN_SECS),
            _ => Duration::from_secs(CLEAN_RUN_SECS),
        }
    }

    fn configure(self, base: &FirmwareConfig) -> FirmwareConfig {
        let mut cfg = base.clone();
        match self {
            RunMode::Clean => {}
            RunMode::Legacy => cfg.frame_format = FrameFormat::Legacy,
            RunMode::FaultyLink => {
                // Compressed timeouts so every tier shows up within one session.
                cfg.recovery.advertising_stall_ms = 1_000;
                cfg.recovery.link_stall_ms = 3_000;
                cfg.recovery.device_stall_ms = 6_000;
            }
        }
        cfg
    }
}

fn main() {
    env_logger::init();
    info!("=== INSOLE FIRMWARE HOST RUNNER START ===");

    let base = load_config();

    loop {
        let choice = prompt_menu();
        let mode = match choice.as_str() {
            "1" | "" => RunMode::Clean,
            "2" => RunMode::FaultyLink,
            "3" => RunMode::Legacy,
            "4" => {
                println!("Exiting. Goodbye!");
                info!("=== INSOLE FIRMWARE HOST RUNNER FINISHED ===");
                return;
            }
            other => {
                println!("Unrecognized option '{}', please try again.", other);
                continue;
            }
        };

        run_session(mode, &mode.configure(&base));
        println!("\n Session completed. Returning to menu...\n");
        thread::sleep(Duration::from_millis(500));
    }
}

fn load_config() -> FirmwareConfig {
    let Some(path) = std::env::args().nth(1) else {
        return FirmwareConfig::default();
    };
    match FirmwareConfig::from_file(Path::new(&path)) {
        Ok(cfg) => {
            info!("Loaded configuration from {}", path);
            cfg
        }
        Err(e) => {
            error!("Ignoring configuration {}: {}", path, e);
            FirmwareConfig::default()
        }
    }
}

fn prompt_menu() -> String {
    println!("\n┌─────────────────────────────────────────────┐");
    println!("│     SELECT FIRMWARE SESSION                 │");
    println!("├─────────────────────────────────────────────┤");
    println!("│  1) Clean run ({:>2} s)                       │", CLEAN_RUN_SECS);
    println!("│  2) Faulty link with recovery ({:>2} s)       │", FAULTY_RUN_SECS);
    println!("│  3) Legacy 39-byte framing ({:>2} s)          │", CLEAN_RUN_SECS);
    println!("│  4) Exit                                    │");
    println!("└─────────────────────────────────────────────┘");
    print!("Select [1/2/3/4] (default: 1): ");
    let _ = stdout().flush();

    let mut input = String::new();
    let _ = stdin().read_line(&mut input);
    input.trim().to_string()
}

fn boot_firmware(
    cfg: &FirmwareConfig,
    link: &Arc<SimulatedLink>,
    events: &crossbeam::channel::Receiver<LinkEvent>,
    platform: &Arc<SimulatedPlatform>,
    fault_rate: f64,
    boot: u32,
) -> Option<Firmware> {
    let collaborators = Collaborators {
        link: link.clone(),
        link_events: events.clone(),
        sensors: Some(sim_sensor_suite(boot as u64, fault_rate, cfg.battery_read_period_ms)),
        platform: platform.clone(),
        clock: Arc::new(MonotonicClock::new()),
    };
    match Firmware::boot(cfg, collaborators) {
        Ok(fw) => Some(fw),
        Err(e) => {
            error!("[Runner] boot failed: {}", e);
            None
        }
    }
}

fn diagnostics_path(mode: RunMode, boot: u32) -> PathBuf {
    Path::new(LOG_DIR).join(format!("diagnostics_{}_boot{}.csv", mode.tag(), boot))
}

fn finish_boot(fw: Firmware, mode: RunMode, boot: u32) {
    let pipeline = fw.pipeline().clone();
    fw.shutdown();
    pipeline.diagnostics.stop_consumer();
    if pipeline.diagnostics.dropped() > 0 {
        warn!(
            "[Runner] {} diagnostic events dropped",
            pipeline.diagnostics.dropped()
        );
    }

    let summary = summarize(&pipeline.metrics, &format!("{}#{}", mode.tag(), boot));
    println!(
        "  boot {}: {} frames sent, {} send failures, {} guard timeouts, recoveries {}/{}/{}",
        boot,
        summary.frames_sent,
        summary.send_failures,
        summary.guard_timeouts,
        summary.advertising_restarts,
        summary.stack_reinits,
        summary.reboots
    );
    if let Err(e) = export_summary_csv(&summary, &Path::new(LOG_DIR).join("run_summary.csv")) {
        error!("[Runner] summary export failed: {}", e);
    }
}

/// Scripted link faults for the faulty-link session, keyed on session time.
fn spawn_fault_injector(
    link: Arc<SimulatedLink>,
    running: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let start = Instant::now();
        let mut step = 0;
        while running.load(Ordering::Acquire) {
            let t = start.elapsed().as_secs();
            match (step, t) {
                (0, 2..) => {
                    info!("[Faults] 20% notify failures");
                    link.set_send_failure_rate(0.2);
                    step += 1;
                }
                (1, 5..) => {
                    info!("[Faults] every notify fails");
                    link.set_fail_sends(true);
                    step += 1;
                }
                (2, 7..) => {
                    info!("[Faults] link healthy again");
                    link.set_fail_sends(false);
                    link.set_send_failure_rate(0.0);
                    step += 1;
                }
                (3, 10..) => {
                    info!("[Faults] connection lost, advertising blocked");
                    link.set_advertising_blocked(true);
                    link.drop_connection();
                    step += 1;
                }
                (4, 24..) => {
                    info!("[Faults] advertising unblocked");
                    link.set_advertising_blocked(false);
                    step += 1;
                }
                _ => {}
            }
            thread::sleep(Duration::from_millis(50));
        }
    })
}

fn run_session(mode: RunMode, cfg: &FirmwareConfig) {
    info!("[Runner] session '{}' starting", mode.tag());
    if let Err(e) = std::fs::create_dir_all(LOG_DIR) {
        error!("Failed to create log directory {}: {}", LOG_DIR, e);
        return;
    }

    let (event_tx, events) = link_events(cfg.link_event_capacity);
    let link = Arc::new(SimulatedLink::new(event_tx));
    let platform = Arc::new(SimulatedPlatform::new());
    let fault_rate = if mode == RunMode::FaultyLink { 0.05 } else { 0.01 };

    let running = Arc::new(AtomicBool::new(true));
    let mut central = SimulatedCentral::new(link.clone(), cfg.frame_format);
    if mode == RunMode::FaultyLink {
        // The central also walks away on its own now and then.
        central = central
            .drop_every(Duration::from_secs(4))
            .reconnect_delay(Duration::from_millis(300));
    }
    let central = match central.spawn(running.clone()) {
        Ok(handle) => handle,
        Err(e) => {
            error!("[Runner] failed to start simulated central: {}", e);
            return;
        }
    };
    let injector = (mode == RunMode::FaultyLink)
        .then(|| spawn_fault_injector(link.clone(), running.clone()));

    let deadline = Instant::now() + mode.duration();
    let mut boot = 1u32;
    let mut firmware = boot_firmware(cfg, &link, &events, &platform, fault_rate, boot);

    while let Some(fw) = firmware.take() {
        if let Err(e) = fw
            .pipeline()
            .diagnostics
            .start_consumer(diagnostics_path(mode, boot))
        {
            error!("[Runner] diagnostics consumer not started: {}", e);
        }

        let mut reboot = None;
        while Instant::now() < deadline {
            thread::sleep(SUPERVISE_POLL);
            if let Some(reason) = platform.take_reboot_request() {
                reboot = Some(reason);
                break;
            }
        }

        finish_boot(fw, mode, boot);

        if let Some(reason) = reboot {
            warn!("[Runner] rebooting ({:?})", reason);
            platform.set_reset_reason(ResetReason::from(reason));
            boot += 1;
            firmware = boot_firmware(cfg, &link, &events, &platform, fault_rate, boot);
        }
    }

    running.store(false, Ordering::Release);
    if let Some(handle) = injector {
        let _ = handle.join();
    }
    match central.join() {
        Ok(report) => print_central_report(&report),
        Err(_) => error!("[Runner] simulated central panicked"),
    }

    let stats = link.stats();
    info!(
        "[Runner] session '{}' done: {} boots, stack inits {}, advertising starts {}",
        mode.tag(),
        boot,
        stats.inits,
        stats.advertising_starts
    );
}

fn print_central_report(report: &CentralReport) {
    println!(
        "  central: {} frames decoded, {} decode errors, {} out of order, {} connects, {} drops",
        report.frames, report.decode_errors, report.out_of_order, report.connects, report.drops
    );
}
