//! Platform collaborator: reset reason and reboot.

use std::fmt;

/// Why the device came up, as reported by the platform at boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetReason {
    PowerOn,
    Software,
    TaskWatchdog,
    Panic,
    Unknown,
}

impl fmt::Display for ResetReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResetReason::PowerOn => "power-on",
            ResetReason::Software => "software reset",
            ResetReason::TaskWatchdog => "task watchdog",
            ResetReason::Panic => "panic",
            ResetReason::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Who asked for the reboot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebootReason {
    /// Last tier of the recovery watchdog.
    RecoveryEscalation,
    /// Task watchdog was not fed in time.
    TaskWatchdog,
}

impl From<RebootReason> for ResetReason {
    fn from(reason: RebootReason) -> Self {
        match reason {
            RebootReason::RecoveryEscalation => ResetReason::Software,
            RebootReason::TaskWatchdog => ResetReason::TaskWatchdog,
        }
    }
}

pub trait Platform: Send + Sync {
    fn reset_reason(&self) -> ResetReason;

    /// Requests a full device reboot. On hardware this does not return.
    fn reboot(&self, reason: RebootReason);
}
