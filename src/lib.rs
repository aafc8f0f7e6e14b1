//! # insole_stream
//! Firmware core of a smart insole: samples acceleration, foot pressure and battery
//! level at a fixed rate and streams a packed snapshot over BLE notifications.
//!
//! ## Key Architecture
//! - **Sampler:** periodic producer, fills the shared snapshot (20 ms).
//! - **Transmitter:** periodic consumer, frames the snapshot and notifies it (20 ms).
//! - **Recovery watchdog:** escalates advertising restart → stack reinit → reboot (1 s).
//! - **Task watchdog:** platform dead-man's switch, fed only after a delivered frame.
//!
//! ## Concurrency
//! - One snapshot behind a timed mutex (`try_lock_for`), never waited on forever.
//! - Link state in atomics, link callbacks delivered over a bounded channel.
//! - Diagnostics pushed to a lock-free queue, drained to CSV by a consumer thread.

pub mod clock;
pub mod component_a;
pub mod component_b;
pub mod config;
pub mod error;
pub mod firmware;
pub mod pipeline;
pub mod platform;
pub mod sim;
pub mod utils;
