//! snapshot.rs
//! The sensor snapshot and its notification framing.
//!
//! Wire layout, all multi-byte fields little-endian, no padding:
//! - Timestamped (43 B): `[timestamp:4][battery:1][ax:2][ay:2][az:2][pressure:16x2]`
//! - Legacy      (39 B): `[battery:1][ax:2][ay:2][az:2][pressure:16x2]`
//!
//! Encoder and decoder always take the same configured `FrameFormat`; a frame of
//! the other length is rejected instead of being reinterpreted.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::FirmwareError;

pub const PRESSURE_CHANNELS: usize = 16;

pub const LEGACY_FRAME_LEN: usize = 1 + 3 * 2 + PRESSURE_CHANNELS * 2;
pub const TIMESTAMPED_FRAME_LEN: usize = 4 + LEGACY_FRAME_LEN;
pub const MAX_FRAME_LEN: usize = TIMESTAMPED_FRAME_LEN;

/// Latest packaged readings. `timestamp` is stamped at transmission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SensorSnapshot {
    pub timestamp: u32,
    pub battery: u8,
    pub accel_x: i16,
    pub accel_y: i16,
    pub accel_z: i16,
    pub pressure: [u16; PRESSURE_CHANNELS],
}

/// One acquisition, without the transmission timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SensorReadings {
    pub battery: u8,
    pub accel: [i16; 3],
    pub pressure: [u16; PRESSURE_CHANNELS],
}

impl SensorSnapshot {
    /// Zero state used while nobody is subscribed.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_cleared(&self) -> bool {
        *self == Self::default()
    }

    /// Overwrites every sensor field in one go; the timestamp is left alone.
    pub fn apply(&mut self, readings: &SensorReadings) {
        self.battery = readings.battery;
        self.accel_x = readings.accel[0];
        self.accel_y = readings.accel[1];
        self.accel_z = readings.accel[2];
        self.pressure = readings.pressure;
    }

    pub fn accel(&self) -> [i16; 3] {
        [self.accel_x, self.accel_y, self.accel_z]
    }
}

impl fmt::Display for SensorSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Batt: {} | Accel({}, {}, {}) | Press[",
            self.battery, self.accel_x, self.accel_y, self.accel_z
        )?;
        for (i, p) in self.pressure.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", p)?;
        }
        f.write_str("]")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameFormat {
    /// 43-byte frame led by the transmission timestamp.
    #[default]
    Timestamped,
    /// 39-byte frame without timestamp, as older receivers expect.
    Legacy,
}

impl FrameFormat {
    pub const fn len(self) -> usize {
        match self {
            FrameFormat::Timestamped => TIMESTAMPED_FRAME_LEN,
            FrameFormat::Legacy => LEGACY_FRAME_LEN,
        }
    }

    const fn body_offset(self) -> usize {
        match self {
            FrameFormat::Timestamped => 4,
            FrameFormat::Legacy => 0,
        }
    }
}

/// Encoded notification payload. Fixed storage, no allocation on the send path.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    buf: [u8; MAX_FRAME_LEN],
    len: usize,
}

impl Frame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("len", &self.len)
            .field("bytes", &self.as_bytes())
            .finish()
    }
}

pub fn encode_frame(snapshot: &SensorSnapshot, format: FrameFormat) -> Frame {
    let mut buf = [0u8; MAX_FRAME_LEN];
    if format == FrameFormat::Timestamped {
        buf[0..4].copy_from_slice(&snapshot.timestamp.to_le_bytes());
    }

    let body = &mut buf[format.body_offset()..format.len()];
    body[0] = snapshot.battery;
    body[1..3].copy_from_slice(&snapshot.accel_x.to_le_bytes());
    body[3..5].copy_from_slice(&snapshot.accel_y.to_le_bytes());
    body[5..7].copy_from_slice(&snapshot.accel_z.to_le_bytes());
    for (i, p) in snapshot.pressure.iter().enumerate() {
        let at = 7 + i * 2;
        body[at..at + 2].copy_from_slice(&p.to_le_bytes());
    }

    Frame {
        buf,
        len: format.len(),
    }
}

/// Companion-side parser. Legacy frames decode with `timestamp = 0`.
pub fn decode_frame(bytes: &[u8], format: FrameFormat) -> Result<SensorSnapshot, FirmwareError> {
    if bytes.len() != format.len() {
        return Err(FirmwareError::FrameLength {
            format,
            expected: format.len(),
            actual: bytes.len(),
        });
    }

    let timestamp = match format {
        FrameFormat::Timestamped => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        FrameFormat::Legacy => 0,
    };

    let body = &bytes[format.body_offset()..];
    let i16_at = |at: usize| i16::from_le_bytes([body[at], body[at + 1]]);

    let mut pressure = [0u16; PRESSURE_CHANNELS];
    for (i, p) in pressure.iter_mut().enumerate() {
        let at = 7 + i * 2;
        *p = u16::from_le_bytes([body[at], body[at + 1]]);
    }

    Ok(SensorSnapshot {
        timestamp,
        battery: body[0],
        accel_x: i16_at(1),
        accel_y: i16_at(3),
        accel_z: i16_at(5),
        pressure,
    })
}
