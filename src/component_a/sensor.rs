//! sensor.rs
//! Sensor collaborators and the suite the sampler reads them through.
//!
//! - Drivers only promise `read() -> Result<value>`; the I2C details live elsewhere.
//! - A failed read never blanks a field: the suite keeps the last good value.
//! - The battery gauge is slow-moving and only re-read every few minutes.

use log::{debug, error, info, warn};

use crate::component_a::snapshot::{PRESSURE_CHANNELS, SensorReadings};
use crate::error::{FirmwareError, SensorError};

/// Four ADCs with four single-ended channels each.
pub const PRESSURE_ADCS: usize = 4;
pub const CHANNELS_PER_ADC: usize = PRESSURE_CHANNELS / PRESSURE_ADCS;

/// Fixed-point factor applied to m/s² before narrowing to `i16`.
pub const ACCEL_SCALE: f32 = 10.0;

/// Full-scale voltage of the battery mapping.
pub const BATTERY_FULL_SCALE_V: f32 = 6.0;

pub trait Accelerometer: Send {
    fn init(&mut self) -> Result<(), SensorError> {
        Ok(())
    }

    /// Fixed-point acceleration, see [`accel_to_fixed`].
    fn read(&mut self) -> Result<[i16; 3], SensorError>;
}

pub trait PressureArray: Send {
    fn init(&mut self) -> Result<(), SensorError> {
        Ok(())
    }

    /// Raw ADC counts, one per channel.
    fn read(&mut self) -> Result<[u16; PRESSURE_CHANNELS], SensorError>;
}

pub trait BatteryGauge: Send {
    fn init(&mut self) -> Result<(), SensorError> {
        Ok(())
    }

    /// Battery level scaled to 0..=255, see [`scale_battery_voltage`].
    fn read(&mut self) -> Result<u8, SensorError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatteryStatus {
    Ok,
    OverVoltage,
    UnderVoltage,
}

/// Maps a cell voltage onto the one-byte battery field.
///
/// `(0, 6) V` maps linearly onto `10..=250`; at or above 6 V saturates to 255 and
/// at or below 0 V reports 5, both flagged.
pub fn scale_battery_voltage(volts: f32) -> (u8, BatteryStatus) {
    if volts >= BATTERY_FULL_SCALE_V {
        (255, BatteryStatus::OverVoltage)
    } else if volts <= 0.0 {
        (5, BatteryStatus::UnderVoltage)
    } else {
        let ratio = volts / BATTERY_FULL_SCALE_V;
        ((ratio * 240.0 + 10.0) as u8, BatteryStatus::Ok)
    }
}

/// m/s² to the wire's fixed-point `i16`, saturating.
pub fn accel_to_fixed(mps2: f32) -> i16 {
    (mps2 * ACCEL_SCALE).clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Validates signed single-ended ADC counts; any negative count fails the whole read.
pub fn pressure_from_raw(raw: &[i16; PRESSURE_CHANNELS]) -> Result<[u16; PRESSURE_CHANNELS], SensorError> {
    let mut out = [0u16; PRESSURE_CHANNELS];
    for (i, &count) in raw.iter().enumerate() {
        if count < 0 {
            return Err(SensorError::read(
                "pressure",
                format!(
                    "negative count {} on dev={} ch={}",
                    count,
                    i / CHANNELS_PER_ADC,
                    i % CHANNELS_PER_ADC
                ),
            ));
        }
        out[i] = count as u16;
    }
    Ok(out)
}

/// Result of one pass over the sensors.
#[derive(Debug, Clone, Default)]
pub struct SampleOutcome {
    pub readings: SensorReadings,
    pub faults: Vec<SensorError>,
}

pub struct SensorSuite {
    accel: Box<dyn Accelerometer>,
    pressure: Box<dyn PressureArray>,
    battery: Box<dyn BatteryGauge>,
    last: SensorReadings,
    battery_period_ms: u64,
    last_battery_read_ms: Option<u64>,
}

impl SensorSuite {
    pub fn new(
        accel: Box<dyn Accelerometer>,
        pressure: Box<dyn PressureArray>,
        battery: Box<dyn BatteryGauge>,
        battery_period_ms: u64,
    ) -> Self {
        Self {
            accel,
            pressure,
            battery,
            last: SensorReadings::default(),
            battery_period_ms,
            last_battery_read_ms: None,
        }
    }

    /// Brings the sensors up. Battery and accelerometer failures are tolerated;
    /// without the pressure array there is nothing worth streaming.
    pub fn init(&mut self) -> Result<(), FirmwareError> {
        match self.battery.init() {
            Ok(()) => info!("[Sensors] battery gauge init OK"),
            Err(e) => error!("[Sensors] {}, continuing anyway", e),
        }

        match self.pressure.init() {
            Ok(()) => info!("[Sensors] pressure array init OK"),
            Err(e) => {
                error!("[Sensors] {}, aborting boot", e);
                return Err(e.into());
            }
        }

        match self.accel.init() {
            Ok(()) => info!("[Sensors] accelerometer init OK"),
            Err(e) => error!("[Sensors] {}, continuing anyway", e),
        }
        Ok(())
    }

    /// Last values that were read successfully.
    pub fn last_readings(&self) -> SensorReadings {
        self.last
    }

    /// Reads every sensor; failed fields keep their previous value.
    pub fn sample(&mut self, now_ms: u64) -> SampleOutcome {
        let mut faults = Vec::new();

        let battery_due = match self.last_battery_read_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.battery_period_ms,
        };
        if battery_due {
            self.last_battery_read_ms = Some(now_ms);
            match self.battery.read() {
                Ok(level) => {
                    self.last.battery = level;
                    debug!("[Sensors] battery level {}", level);
                }
                Err(e) => {
                    warn!("[Sensors] {}", e);
                    faults.push(e);
                }
            }
        }

        match self.accel.read() {
            Ok(accel) => self.last.accel = accel,
            Err(e) => {
                warn!("[Sensors] {}", e);
                faults.push(e);
            }
        }

        match self.pressure.read() {
            Ok(pressure) => self.last.pressure = pressure,
            Err(e) => {
                warn!("[Sensors] {}", e);
                faults.push(e);
            }
        }

        SampleOutcome {
            readings: self.last,
            faults,
        }
    }
}

/// Synthetic readings for link bring-up on a device without sensors.
#[derive(Debug, Default)]
pub struct DummySource {
    counter: u16,
}

impl DummySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_readings(&mut self) -> SensorReadings {
        self.counter = self.counter.wrapping_add(1);
        let c = self.counter;

        let mut pressure = [0u16; PRESSURE_CHANNELS];
        for (i, p) in pressure.iter_mut().enumerate() {
            *p = c.wrapping_add(i as u16 * 64) & 0x0FFF;
        }

        SensorReadings {
            battery: 200,
            accel: [(c % 100) as i16, -((c % 100) as i16), 98],
            pressure,
        }
    }
}
