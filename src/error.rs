//! Error types for the firmware core.
//!
//! Task bodies never propagate errors: sensor faults, guard timeouts and send
//! failures are handled where they happen. These types cover the fallible edges
//! (configuration, boot, codec, exports).

use std::time::Duration;

use crate::component_a::snapshot::FrameFormat;

/// Failure reported by a sensor collaborator.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SensorError {
    #[error("{sensor} init failed: {reason}")]
    Init {
        sensor: &'static str,
        reason: String,
    },

    #[error("{sensor} read failed: {reason}")]
    Read {
        sensor: &'static str,
        reason: String,
    },
}

impl SensorError {
    pub fn init(sensor: &'static str, reason: impl Into<String>) -> Self {
        Self::Init {
            sensor,
            reason: reason.into(),
        }
    }

    pub fn read(sensor: &'static str, reason: impl Into<String>) -> Self {
        Self::Read {
            sensor,
            reason: reason.into(),
        }
    }

    pub fn sensor(&self) -> &'static str {
        match self {
            Self::Init { sensor, .. } | Self::Read { sensor, .. } => sensor,
        }
    }
}

/// The snapshot guard was not acquired within the bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("snapshot guard not acquired within {0:?}")]
pub struct GuardTimeout(pub Duration);

/// Root error type for boot, configuration and codec operations.
#[derive(Debug, thiserror::Error)]
pub enum FirmwareError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("frame of {actual} bytes does not match the {expected}-byte {format:?} framing")]
    FrameLength {
        format: FrameFormat,
        expected: usize,
        actual: usize,
    },

    #[error(transparent)]
    Sensor(#[from] SensorError),

    #[error("wireless link init failed for '{0}'")]
    LinkInit(String),

    #[error("failed to spawn {task} task: {source}")]
    Spawn {
        task: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("diagnostics consumer: {0}")]
    Diagnostics(String),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FirmwareError {
    pub fn config(context: impl Into<String>) -> Self {
        Self::Config(context.into())
    }
}

pub type Result<T> = std::result::Result<T, FirmwareError>;
