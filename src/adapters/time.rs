//! System clock adapter.
//!
//! Monotonic milliseconds come from `esp_timer_get_time()` (host:
//! `Instant`).  Wall-clock time is synchronised over SNTP and converted to
//! South Africa Standard Time, a fixed UTC+2 with no daylight saving, so
//! the conversion needs no TZ database.  Anything before 2020-01-01 means
//! the clock has not been set yet.

use crate::app::ports::ClockPort;
use crate::schedule::LocalTime;

#[cfg(target_os = "espidf")]
use esp_idf_svc::sntp::{EspSntp, SyncStatus};

/// SAST offset from UTC.
pub const UTC_OFFSET_SECS: i64 = 2 * 3600;

const EPOCH_2020: i64 = 1_577_836_800;

pub struct SystemClock {
    #[cfg(target_os = "espidf")]
    sntp: Option<EspSntp<'static>>,
    #[cfg(not(target_os = "espidf"))]
    start: std::time::Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            #[cfg(target_os = "espidf")]
            sntp: None,
            #[cfg(not(target_os = "espidf"))]
            start: std::time::Instant::now(),
        }
    }

    /// Start background SNTP sync.  Needs a network link; safe to call again
    /// after a transport switch.
    #[cfg(target_os = "espidf")]
    pub fn start_sync(&mut self) {
        if self.sntp.is_some() {
            return;
        }
        match EspSntp::new_default() {
            Ok(sntp) => {
                log::info!("Clock: SNTP started");
                self.sntp = Some(sntp);
            }
            Err(e) => log::warn!("Clock: SNTP start failed: {}", e),
        }
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn start_sync(&mut self) {}

    pub fn is_synced(&self) -> bool {
        #[cfg(target_os = "espidf")]
        {
            self.sntp.as_ref().is_some_and(|s| s.get_sync_status() == SyncStatus::Completed)
                || self.unix_secs().is_some_and(|t| t >= EPOCH_2020)
        }

        #[cfg(not(target_os = "espidf"))]
        {
            true
        }
    }

    #[cfg(target_os = "espidf")]
    fn unix_secs(&self) -> Option<i64> {
        let mut tv = esp_idf_svc::sys::timeval { tv_sec: 0, tv_usec: 0 };
        // SAFETY: tv is a valid out-param; tz may be null.
        if unsafe { esp_idf_svc::sys::gettimeofday(&mut tv, core::ptr::null_mut()) } != 0 {
            return None;
        }
        Some(tv.tv_sec as i64)
    }

    #[cfg(not(target_os = "espidf"))]
    fn unix_secs(&self) -> Option<i64> {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .ok()
            .map(|d| d.as_secs() as i64)
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockPort for SystemClock {
    fn now_ms(&self) -> u64 {
        #[cfg(target_os = "espidf")]
        {
            // SAFETY: reads the monotonic high-resolution timer.
            (unsafe { esp_idf_svc::sys::esp_timer_get_time() }) as u64 / 1000
        }

        #[cfg(not(target_os = "espidf"))]
        {
            self.start.elapsed().as_millis() as u64
        }
    }

    fn local_time(&self) -> Option<LocalTime> {
        local_from_unix(self.unix_secs()?)
    }
}

/// Convert UTC seconds to SAST calendar time.  `None` before 2020.
pub fn local_from_unix(unix_secs: i64) -> Option<LocalTime> {
    if unix_secs < EPOCH_2020 {
        return None;
    }
    let local = unix_secs + UTC_OFFSET_SECS;
    let days = local.div_euclid(86_400);
    let secs = local.rem_euclid(86_400);

    // Days-to-civil, proleptic Gregorian.
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + i64::from(month <= 2);

    Some(LocalTime {
        year: year as u16,
        month: month as u8,
        day: day as u8,
        // 1970-01-01 was a Thursday.
        weekday: (days + 4).rem_euclid(7) as u8,
        hour: (secs / 3600) as u8,
        minute: (secs % 3600 / 60) as u8,
        second: (secs % 60) as u8,
    })
}
