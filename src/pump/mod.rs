//! Per-pump protection and state engine.
//!
//! One [`PumpControl`] per physical pump, created from the board wiring
//! table at boot and owned by the controller for the process lifetime.

mod engine;

pub use engine::{Evaluation, PumpControl};

use serde::{Deserialize, Serialize};

use crate::error::ElectricalFault;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PumpState {
    Stopped,
    Running,
    /// Latched until an explicit reset (or the optional auto-reset).
    Fault,
}

impl PumpState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "STOPPED",
            Self::Running => "RUNNING",
            Self::Fault => "FAULT",
        }
    }
}

impl core::fmt::Display for PumpState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a pump is latched.  `None` whenever the pump is not in [`PumpState::Fault`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FaultKind {
    None,
    Overcurrent,
    DryRun,
    SensorFault,
}

impl FaultKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Overcurrent => "OVERCURRENT",
            Self::DryRun => "DRY_RUN",
            Self::SensorFault => "SENSOR_FAULT",
        }
    }
}

impl core::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed start shows up as a dry run: the motor never drew current.
impl From<ElectricalFault> for FaultKind {
    fn from(e: ElectricalFault) -> Self {
        match e {
            ElectricalFault::Overcurrent => Self::Overcurrent,
            ElectricalFault::DryRun | ElectricalFault::StartTimeout => Self::DryRun,
        }
    }
}
