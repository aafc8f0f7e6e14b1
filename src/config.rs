//! Firmware configuration.
//!
//! Defaults are the device's built-in constants; a JSON file may override any
//! subset of fields. Everything is validated once at boot.

use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::component_a::snapshot::FrameFormat;
use crate::component_b::{link::DeviceIdentity, recovery::RecoveryTimeouts};
use crate::error::{FirmwareError, Result};

/// BLE advertising interval limits, in 0.625 ms units.
const ADV_INTERVAL_LIMITS: (u16, u16) = (0x20, 0x4000);

/// Which foot this unit is worn on; selects name and GATT UUIDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    #[default]
    Left,
    Right,
}

impl Side {
    pub fn device_name(self) -> &'static str {
        match self {
            Side::Left => "Insole Left",
            Side::Right => "Insole Right",
        }
    }

    pub fn service_uuid(self) -> &'static str {
        match self {
            Side::Left => "e59f97e5-31c5-4d8c-bd07-27b9c0284d31",
            Side::Right => "4276d6a5-3c2e-494a-bee2-0357f0c8e7f1",
        }
    }

    pub fn characteristic_uuid(self) -> &'static str {
        match self {
            Side::Left => "10480c36-db9c-476a-8ecf-129aa85243b8",
            Side::Right => "af4ce09f-721e-459b-9ba5-b1a743073afa",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirmwareConfig {
    pub side: Side,
    /// Stream synthetic data instead of reading sensors.
    pub test_device: bool,

    pub sample_period_ms: u64,
    pub transmit_period_ms: u64,
    pub timing_tolerance_ms: u64,
    pub guard_timeout_ms: u64,
    pub print_interval_ms: u64,
    pub battery_read_period_ms: u64,

    pub frame_format: FrameFormat,
    pub mtu: u16,
    pub adv_interval_min: u16,
    pub adv_interval_max: u16,
    pub link_event_capacity: usize,
    pub disconnect_grace_ms: u64,

    pub failure_threshold: u32,
    pub recovery_period_ms: u64,
    pub recovery: RecoveryTimeouts,
    pub reinit_settle_ms: u64,

    pub hw_watchdog_timeout_ms: u64,
    pub hw_watchdog_poll_ms: u64,

    pub diagnostics_capacity: usize,
    /// Pin every task to this core; `None` leaves placement to the OS.
    pub pin_core: Option<usize>,
}

impl Default for FirmwareConfig {
    fn default() -> Self {
        Self {
            side: Side::Left,
            test_device: false,
            sample_period_ms: 20,
            transmit_period_ms: 20,
            timing_tolerance_ms: 5,
            guard_timeout_ms: 5,
            print_interval_ms: 1_000,
            battery_read_period_ms: 5 * 60 * 1_000,
            frame_format: FrameFormat::Timestamped,
            mtu: 50,
            adv_interval_min: 0x50,
            adv_interval_max: 0x100,
            link_event_capacity: 32,
            disconnect_grace_ms: 100,
            failure_threshold: 10,
            recovery_period_ms: 1_000,
            recovery: RecoveryTimeouts::default(),
            reinit_settle_ms: 100,
            hw_watchdog_timeout_ms: 60_000,
            hw_watchdog_poll_ms: 3_000,
            diagnostics_capacity: 8_192,
            pin_core: None,
        }
    }
}

impl FirmwareConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("sample_period_ms", self.sample_period_ms),
            ("transmit_period_ms", self.transmit_period_ms),
            ("guard_timeout_ms", self.guard_timeout_ms),
            ("recovery_period_ms", self.recovery_period_ms),
            ("hw_watchdog_timeout_ms", self.hw_watchdog_timeout_ms),
            ("hw_watchdog_poll_ms", self.hw_watchdog_poll_ms),
        ] {
            if value == 0 {
                return Err(FirmwareError::config(format!("{} must be non-zero", name)));
            }
        }

        if self.guard_timeout_ms >= self.sample_period_ms.min(self.transmit_period_ms) {
            return Err(FirmwareError::config(format!(
                "guard_timeout_ms ({}) must be shorter than both task periods",
                self.guard_timeout_ms
            )));
        }

        let payload = self.identity().max_payload();
        if self.frame_format.len() > payload {
            return Err(FirmwareError::config(format!(
                "{:?} frame ({} B) does not fit one notification at MTU {} ({} B)",
                self.frame_format,
                self.frame_format.len(),
                self.mtu,
                payload
            )));
        }

        let (lo, hi) = ADV_INTERVAL_LIMITS;
        if self.adv_interval_min < lo
            || self.adv_interval_max > hi
            || self.adv_interval_min > self.adv_interval_max
        {
            return Err(FirmwareError::config(format!(
                "advertising interval {:#x}..{:#x} outside {:#x}..{:#x} or inverted",
                self.adv_interval_min, self.adv_interval_max, lo, hi
            )));
        }

        if self.failure_threshold == 0 {
            return Err(FirmwareError::config("failure_threshold must be at least 1"));
        }
        if self.link_event_capacity == 0 || self.diagnostics_capacity == 0 {
            return Err(FirmwareError::config("queue capacities must be non-zero"));
        }

        let r = &self.recovery;
        if r.advertising_stall_ms == 0 || r.advertising_stall_ms >= r.link_stall_ms {
            return Err(FirmwareError::config(
                "advertising_stall_ms must be non-zero and shorter than link_stall_ms",
            ));
        }
        if r.device_stall_ms == 0 {
            return Err(FirmwareError::config("device_stall_ms must be non-zero"));
        }
        if self.hw_watchdog_timeout_ms <= self.transmit_period_ms {
            return Err(FirmwareError::config(
                "hw_watchdog_timeout_ms must exceed the transmit period",
            ));
        }
        Ok(())
    }

    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity {
            name: self.side.device_name().to_string(),
            service_uuid: self.side.service_uuid().to_string(),
            characteristic_uuid: self.side.characteristic_uuid().to_string(),
            mtu: self.mtu,
            adv_interval_min: self.adv_interval_min,
            adv_interval_max: self.adv_interval_max,
        }
    }

    pub fn sample_period(&self) -> Duration {
        Duration::from_millis(self.sample_period_ms)
    }

    pub fn transmit_period(&self) -> Duration {
        Duration::from_millis(self.transmit_period_ms)
    }

    pub fn tolerance(&self) -> Duration {
        Duration::from_millis(self.timing_tolerance_ms)
    }

    pub fn guard_timeout(&self) -> Duration {
        Duration::from_millis(self.guard_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = FirmwareConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.identity().max_payload(), 47);
        assert_eq!(cfg.identity().name, "Insole Left");
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = FirmwareConfig::from_json_str(
            r#"{ "side": "right", "frame_format": "legacy", "recovery": { "advertising_stall_ms": 1000, "link_stall_ms": 4000, "device_stall_ms": 8000 } }"#,
        )
        .unwrap();
        assert_eq!(cfg.side, Side::Right);
        assert_eq!(cfg.frame_format, FrameFormat::Legacy);
        assert_eq!(cfg.recovery.link_stall_ms, 4_000);
        assert_eq!(cfg.sample_period_ms, 20);
        assert_eq!(cfg.identity().service_uuid, "4276d6a5-3c2e-494a-bee2-0357f0c8e7f1");
    }

    #[test]
    fn frame_must_fit_one_notification() {
        let cfg = FirmwareConfig {
            mtu: 42,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(FirmwareError::Config(_))));

        let legacy = FirmwareConfig {
            mtu: 42,
            frame_format: FrameFormat::Legacy,
            ..Default::default()
        };
        legacy.validate().unwrap();
    }

    #[test]
    fn rejects_inconsistent_timing() {
        let cfg = FirmwareConfig {
            guard_timeout_ms: 20,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = FirmwareConfig {
            adv_interval_min: 0x200,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            FirmwareConfig::from_json_str("{ side: left }"),
            Err(FirmwareError::ConfigParse(_))
        ));
    }
}
