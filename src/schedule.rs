//! Schedule and time-of-use gating.
//!
//! Pure functions of local wall-clock time and stored configuration.  The
//! only state is [`ScheduleGate`], which remembers the previous verdict so
//! the caller can act on edges rather than levels.
//!
//! Unknown time (clock never synchronised) always yields *permitted*.

use serde::{Deserialize, Serialize};

use crate::config::{ScheduleConfig, TouConfig};

/// Broken-down local time.  Produced by the clock adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalTime {
    pub year: u16,
    /// 1 = January.
    pub month: u8,
    pub day: u8,
    /// 0 = Sunday.
    pub weekday: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl LocalTime {
    pub fn minute_of_day(&self) -> u16 {
        self.hour as u16 * 60 + self.minute as u16
    }

    /// `HH:MM:SS`, as reported in telemetry.
    pub fn hms(&self) -> heapless::String<8> {
        let mut s = heapless::String::new();
        let _ = core::fmt::write(&mut s, format_args!("{:02}:{:02}:{:02}", self.hour, self.minute, self.second));
        s
    }

    pub fn is_weekday(&self) -> bool {
        (1..=5).contains(&self.weekday)
    }
}

// ── Calendar tariff ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Season {
    /// June to August.
    High,
    Low,
}

impl Season {
    pub fn of_month(month: u8) -> Self {
        if (6..=8).contains(&month) { Self::High } else { Self::Low }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TouPeriod {
    Peak,
    Standard,
    OffPeak,
}

impl TouPeriod {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Peak => "PEAK",
            Self::Standard => "STANDARD",
            Self::OffPeak => "OFF_PEAK",
        }
    }
}

/// Half-open minute-of-day ranges `[start, end)`.
type Windows = &'static [(u16, u16)];

const HIGH_WEEKDAY_PEAK: Windows = &[(360, 480), (1020, 1200)];
const HIGH_WEEKDAY_STANDARD: Windows = &[(480, 1020), (1200, 1320)];
const LOW_WEEKDAY_PEAK: Windows = &[(420, 540), (1020, 1200)];
const LOW_WEEKDAY_STANDARD: Windows = &[(360, 420), (540, 1020), (1200, 1320)];
const WEEKEND_STANDARD: Windows = &[(420, 720), (1080, 1200)];

fn tariff_windows(season: Season, weekday: bool) -> (Windows, Windows) {
    match (weekday, season) {
        (true, Season::High) => (HIGH_WEEKDAY_PEAK, HIGH_WEEKDAY_STANDARD),
        (true, Season::Low) => (LOW_WEEKDAY_PEAK, LOW_WEEKDAY_STANDARD),
        (false, _) => (&[], WEEKEND_STANDARD),
    }
}

fn in_any(minute: u16, windows: Windows) -> bool {
    windows.iter().any(|&(start, end)| minute >= start && minute < end)
}

pub fn classify(time: &LocalTime) -> TouPeriod {
    let (peak, standard) = tariff_windows(Season::of_month(time.month), time.is_weekday());
    let minute = time.minute_of_day();
    if in_any(minute, peak) {
        TouPeriod::Peak
    } else if in_any(minute, standard) {
        TouPeriod::Standard
    } else {
        TouPeriod::OffPeak
    }
}

// ── Custom window ─────────────────────────────────────────────

/// Whether `time` falls in the configured daily window.
///
/// The day bit is checked against the current day even when the window
/// wraps past midnight.  Equal start and end is an empty window.
pub fn within_window(schedule: &ScheduleConfig, time: &LocalTime) -> bool {
    if schedule.days & (1 << (time.weekday % 7)) == 0 {
        return false;
    }
    let now = time.minute_of_day();
    let (start, end) = (schedule.start_minutes(), schedule.end_minutes());
    if start <= end {
        now >= start && now < end
    } else {
        now >= start || now < end
    }
}

/// Overall verdict.  The tariff is authoritative when enabled; with neither
/// mechanism enabled operation is always permitted.
pub fn operation_permitted(schedule: &ScheduleConfig, tou: &TouConfig, time: Option<&LocalTime>) -> bool {
    let Some(time) = time else {
        return true;
    };
    if tou.enabled {
        classify(time) == TouPeriod::OffPeak
    } else if schedule.enabled {
        within_window(schedule, time)
    } else {
        true
    }
}

// ── Edge tracking ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleEdge {
    /// Permitted went false → true.
    Enter,
    /// Permitted went true → false.
    Leave,
}

/// Remembers the last verdict so auto start/stop fires once per edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleGate {
    was_permitted: bool,
}

impl ScheduleGate {
    pub fn new(initially_permitted: bool) -> Self {
        Self { was_permitted: initially_permitted }
    }

    /// Record the new verdict.  Edges are only reported while a schedule
    /// mechanism is `active`; the verdict is tracked either way.
    pub fn observe(&mut self, active: bool, permitted: bool) -> Option<ScheduleEdge> {
        let was = core::mem::replace(&mut self.was_permitted, permitted);
        if !active || was == permitted {
            return None;
        }
        Some(if permitted { ScheduleEdge::Enter } else { ScheduleEdge::Leave })
    }

    pub fn was_permitted(&self) -> bool {
        self.was_permitted
    }
}
