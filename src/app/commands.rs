//! Inbound commands to the pump controller.
//!
//! Every command source (panel buttons, serial console, broker, gateway)
//! is reduced to a [`Command`] plus an [`Origin`], then handed to the one
//! [`CommandHandler`](super::ports::CommandHandler) implementation.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::config::ScheduleUpdate;

/// Which pump(s) a command addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpTarget {
    All,
    /// 1-based pump number.
    One(u8),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start(PumpTarget),
    Stop(PumpTarget),
    Reset(PumpTarget),
    /// Publish telemetry now.
    Status,
    SetProtection { pump: PumpTarget, overcurrent: Option<bool>, dryrun: Option<bool> },
    SetThresholds { pump: PumpTarget, max_current: Option<f32>, dry_current: Option<f32> },
    SetDelays { pump: PumpTarget, overcurrent_s: Option<u32>, dryrun_s: Option<u32> },
    SetSchedule(ScheduleUpdate),
    SetTou { enabled: bool },
    GetSettings,
    UpdateFirmware { url: Option<String> },
    /// Latch a SensorFault to exercise the alarm path.
    TestFault(PumpTarget),
    /// Manual drive of a spare output, channel 0-based.
    SetOutput { channel: u8, on: bool },
    WifiReset,
    FactoryReset,
    Reboot,
    Help,
}

/// Local or remote control, from the panel selector switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMode {
    Remote,
    Local,
}

impl ControlMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Remote => "REMOTE",
            Self::Local => "LOCAL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Local panel push button.
    Button,
    /// Serial console; maintenance access, not mode-gated.
    Console,
    Broker,
    /// Web/cloud gateway query surface.
    Gateway,
}

impl Origin {
    /// Start arbitration.  Stop is never gated.
    pub fn may_start(self, mode: ControlMode) -> bool {
        match self {
            Self::Button => mode == ControlMode::Local,
            Self::Broker | Self::Gateway => mode == ControlMode::Remote,
            Self::Console => true,
        }
    }
}

/// Restart-class actions the main loop performs after replying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemAction {
    Reboot,
    /// Forget wireless credentials, then restart.
    WifiReset,
    /// Erase all settings and credentials, then restart.
    FactoryReset,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Accepted,
    Ignored(&'static str),
    /// Text or JSON to return to the caller.
    Reply(String),
    System(SystemAction),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Empty,
    Unknown(String),
    Malformed,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty command"),
            Self::Unknown(v) => write!(f, "unknown command '{v}'"),
            Self::Malformed => write!(f, "malformed command envelope"),
        }
    }
}

pub const CONSOLE_HELP: &str = "\
Commands:
  STATUS                 print status
  START[n] / STOP[n]     start / stop pump n (all if omitted)
  STARTALL / STOPALL     start / stop every pump
  FAULT_RESET[n] / CLEAR clear latched fault
  RESETALL               clear every latched fault
  TEST_FAULT[n]          latch a sensor fault
  DOxON / DOxOFF         drive spare output x (1-8)
  WIFI_RESET             forget WiFi credentials and restart
  FACTORY_RESET          erase all settings and restart
  REBOOT                 restart
  HELP                   this text";

// ── Shared verbs ──────────────────────────────────────────────

fn verb(name: &str, pump: PumpTarget) -> Option<Command> {
    Some(match name {
        "START" => Command::Start(pump),
        "STOP" => Command::Stop(pump),
        "RESET" => Command::Reset(pump),
        "START_ALL" => Command::Start(PumpTarget::All),
        "STOP_ALL" => Command::Stop(PumpTarget::All),
        "RESET_ALL" => Command::Reset(PumpTarget::All),
        "STATUS" => Command::Status,
        "GET_SETTINGS" => Command::GetSettings,
        "UPDATE_FIRMWARE" => Command::UpdateFirmware { url: None },
        "WIFI_RESET" => Command::WifiReset,
        "FACTORY_RESET" => Command::FactoryReset,
        "REBOOT" => Command::Reboot,
        _ => return None,
    })
}

// ── Broker wire format ────────────────────────────────────────

/// `{"command": "...", ...}`.  Unknown keys are ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Envelope {
    command: String,
    pump: Option<u8>,
    url: Option<String>,
    max_current: Option<f32>,
    dry_current: Option<f32>,
    overcurrent_enabled: Option<bool>,
    dryrun_enabled: Option<bool>,
    overcurrent_delay_s: Option<u32>,
    dryrun_delay_s: Option<u32>,
    enabled: Option<bool>,
    start_hour: Option<u8>,
    start_minute: Option<u8>,
    end_hour: Option<u8>,
    end_minute: Option<u8>,
    days: Option<u8>,
}

impl Envelope {
    fn into_command(self) -> Result<Command, ParseError> {
        let pump = self.pump.map_or(PumpTarget::All, PumpTarget::One);
        let cmd = match self.command.as_str() {
            "SET_THRESHOLDS" => Command::SetThresholds {
                pump,
                max_current: self.max_current,
                dry_current: self.dry_current,
            },
            "SET_PROTECTION" => Command::SetProtection {
                pump,
                overcurrent: self.overcurrent_enabled,
                dryrun: self.dryrun_enabled,
            },
            "SET_DELAYS" => Command::SetDelays {
                pump,
                overcurrent_s: self.overcurrent_delay_s,
                dryrun_s: self.dryrun_delay_s,
            },
            "SET_SCHEDULE" => Command::SetSchedule(ScheduleUpdate {
                enabled: self.enabled,
                start_hour: self.start_hour,
                start_minute: self.start_minute,
                end_hour: self.end_hour,
                end_minute: self.end_minute,
                days: self.days,
            }),
            "SET_RURAFLEX" => Command::SetTou { enabled: self.enabled.ok_or(ParseError::Malformed)? },
            "UPDATE_FIRMWARE" => Command::UpdateFirmware { url: self.url.filter(|u| !u.is_empty()) },
            "" => return Err(ParseError::Malformed),
            other => verb(other, pump).ok_or_else(|| ParseError::Unknown(other.to_string()))?,
        };
        Ok(cmd)
    }
}

/// Parse a command-topic payload: a plain verb or a JSON envelope.
pub fn parse_broker(payload: &str) -> Result<Command, ParseError> {
    let text = payload.trim();
    if text.is_empty() {
        return Err(ParseError::Empty);
    }
    if text.starts_with('{') {
        let envelope: Envelope = serde_json::from_str(text).map_err(|_| ParseError::Malformed)?;
        return envelope.into_command();
    }
    verb(text, PumpTarget::All).ok_or_else(|| ParseError::Unknown(text.to_string()))
}

// ── Console ───────────────────────────────────────────────────

/// Split `"START2"` into `("START", Some(2))`.
fn split_index(word: &str) -> (&str, Option<u8>) {
    let digits = word.len() - word.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 || digits == word.len() {
        return (word, None);
    }
    let (head, tail) = word.split_at(word.len() - digits);
    (head, tail.parse().ok())
}

/// Parse one console line.  Case-insensitive.
pub fn parse_console(line: &str) -> Result<Command, ParseError> {
    let upper = line.trim().to_ascii_uppercase();
    if upper.is_empty() {
        return Err(ParseError::Empty);
    }

    if let Some(rest) = upper.strip_prefix("DO") {
        let (on, num) = if let Some(n) = rest.strip_suffix("ON") {
            (true, n)
        } else if let Some(n) = rest.strip_suffix("OFF") {
            (false, n)
        } else {
            return Err(ParseError::Unknown(upper.clone()));
        };
        return match num.parse::<u8>() {
            Ok(n @ 1..=8) => Ok(Command::SetOutput { channel: n - 1, on }),
            _ => Err(ParseError::Unknown(upper.clone())),
        };
    }

    let (word, index) = split_index(&upper);
    let pump = index.map_or(PumpTarget::All, PumpTarget::One);
    let cmd = match word {
        "START" => Command::Start(pump),
        "STOP" => Command::Stop(pump),
        "FAULT_RESET" | "CLEAR" | "RESET" => Command::Reset(pump),
        "STARTALL" => Command::Start(PumpTarget::All),
        "STOPALL" => Command::Stop(PumpTarget::All),
        "RESETALL" => Command::Reset(PumpTarget::All),
        "TEST_FAULT" => Command::TestFault(pump),
        "HELP" => Command::Help,
        other => verb(other, pump).ok_or_else(|| ParseError::Unknown(upper.clone()))?,
    };
    Ok(cmd)
}
