//! Outbound application events and the telemetry snapshot.
//!
//! The controller emits [`AppEvent`]s through the
//! [`EventSink`](super::ports::EventSink) port as things happen.
//! [`Telemetry`] is the periodic snapshot published on the broker and
//! served to the gateway as the status query.

use serde::{Deserialize, Serialize};

use super::commands::ControlMode;
use crate::pump::{FaultKind, PumpState};
use crate::transport::Transport;

#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    /// Controller built and settings loaded.
    Started { hardware_type: &'static str, pumps: u8 },

    StateChanged { pump: u8, from: PumpState, to: PumpState },

    FaultLatched { pump: u8, kind: FaultKind, current_a: f32 },

    FaultCleared { pump: u8, kind: FaultKind },

    ContactorChanged { pump: u8, on: bool },

    /// Schedule permission changed while a schedule was active.
    ScheduleEdge { permitted: bool },

    /// The power meter went offline (false) or recovered (true).
    SensorOnline(bool),

    ModeChanged(ControlMode),
}

/// 0.1 V.
pub fn round_voltage(v: f32) -> f32 {
    (v * 10.0).round() / 10.0
}

/// 0.01 A.
pub fn round_current(a: f32) -> f32 {
    (a * 100.0).round() / 100.0
}

/// Per-pump block, present only on multi-pump boards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PumpTelemetry {
    pub id: u8,
    pub state: PumpState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<FaultKind>,
    pub cmd: bool,
    /// Monitored current, 0.01 A.
    pub current: f32,
    pub contactor_confirmed: bool,
}

/// Point-in-time status snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    #[serde(rename = "Va")]
    pub va: f32,
    #[serde(rename = "Vb")]
    pub vb: f32,
    #[serde(rename = "Vc")]
    pub vc: f32,
    #[serde(rename = "Ia")]
    pub ia: f32,
    #[serde(rename = "Ib")]
    pub ib: f32,
    #[serde(rename = "Ic")]
    pub ic: f32,
    /// Worst state across pumps: any Fault, else any Running, else Stopped.
    pub state: PumpState,
    /// First latched fault, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<FaultKind>,
    /// Start intent on any pump.
    pub cmd: bool,
    pub sensor: bool,
    pub contactor_confirmed: bool,
    pub mode: ControlMode,
    #[serde(default)]
    pub network: Option<Transport>,
    pub di: u8,
    #[serde(rename = "do")]
    pub outputs: u8,
    pub hardware_type: String,
    pub firmware_version: String,
    /// Seconds since boot.
    pub uptime: u64,
    /// Local `HH:MM:SS`, absent until the clock is synchronised.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pumps: Option<Vec<PumpTelemetry>>,
}

impl Telemetry {
    pub fn set_voltages(&mut self, v: &[f32; 3]) {
        self.va = round_voltage(v[0]);
        self.vb = round_voltage(v[1]);
        self.vc = round_voltage(v[2]);
    }

    pub fn set_currents(&mut self, i: &[f32; 3]) {
        self.ia = round_current(i[0]);
        self.ib = round_current(i[1]);
        self.ic = round_current(i[2]);
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
