//! Noisy stand-ins for the accelerometer, the four pressure ADCs and the fuel gauge.

use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::component_a::{
    sensor::{
        Accelerometer, BatteryGauge, PressureArray, SensorSuite, accel_to_fixed,
        pressure_from_raw, scale_battery_voltage,
    },
    snapshot::PRESSURE_CHANNELS,
};
use crate::error::SensorError;

const GRAVITY: f32 = 9.81;
/// Full-scale single-ended count of a 16-bit ADC.
const ADC_FULL_SCALE: i16 = i16::MAX;

pub struct SimAccelerometer {
    rng: StdRng,
    fault_rate: f64,
}

impl SimAccelerometer {
    pub fn new(seed: u64, fault_rate: f64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            fault_rate,
        }
    }
}

impl Accelerometer for SimAccelerometer {
    fn read(&mut self) -> Result<[i16; 3], SensorError> {
        if self.rng.random_bool(self.fault_rate) {
            return Err(SensorError::read("accel", "I2C NACK"));
        }
        let x = self.rng.random_range(-0.5..0.5);
        let y = self.rng.random_range(-0.5..0.5);
        let z = GRAVITY + self.rng.random_range(-0.3..0.3);
        Ok([accel_to_fixed(x), accel_to_fixed(y), accel_to_fixed(z)])
    }
}

/// Sixteen load cells with a slow heel-to-toe roll so the stream is not flat.
pub struct SimPressureArray {
    rng: StdRng,
    fault_rate: f64,
    step: u32,
}

impl SimPressureArray {
    pub fn new(seed: u64, fault_rate: f64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            fault_rate,
            step: 0,
        }
    }
}

impl PressureArray for SimPressureArray {
    fn read(&mut self) -> Result<[u16; PRESSURE_CHANNELS], SensorError> {
        self.step = self.step.wrapping_add(1);
        let loaded = (self.step / 5) as usize % PRESSURE_CHANNELS;

        let mut raw = [0i16; PRESSURE_CHANNELS];
        for (i, count) in raw.iter_mut().enumerate() {
            let base: i16 = if i == loaded { 12_000 } else { 800 };
            *count = (base + self.rng.random_range(0..400)).min(ADC_FULL_SCALE);
        }
        if self.rng.random_bool(self.fault_rate) {
            // A floating input reads slightly negative.
            raw[self.rng.random_range(0..PRESSURE_CHANNELS)] = -3;
        }
        pressure_from_raw(&raw)
    }
}

/// Cell slowly draining from `start_volts`.
pub struct SimBatteryGauge {
    volts: f32,
    drain_per_read: f32,
}

impl SimBatteryGauge {
    pub fn new(start_volts: f32, drain_per_read: f32) -> Self {
        Self {
            volts: start_volts,
            drain_per_read,
        }
    }
}

impl BatteryGauge for SimBatteryGauge {
    fn read(&mut self) -> Result<u8, SensorError> {
        let volts = self.volts;
        self.volts -= self.drain_per_read;
        if volts < 0.0 {
            return Err(SensorError::read("battery", format!("negative cell voltage {:.2} V", volts)));
        }
        Ok(scale_battery_voltage(volts).0)
    }
}

/// Sensor suite wired to the simulated parts.
pub fn sim_sensor_suite(seed: u64, fault_rate: f64, battery_period_ms: u64) -> SensorSuite {
    SensorSuite::new(
        Box::new(SimAccelerometer::new(seed, fault_rate)),
        Box::new(SimPressureArray::new(seed.wrapping_add(1), fault_rate)),
        Box::new(SimBatteryGauge::new(4.1, 0.001)),
        battery_period_ms,
    )
}
