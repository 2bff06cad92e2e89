//! System configuration parameters
//!
//! Compile-time tuning for the protection engine and the network policy,
//! plus the runtime settings persisted in NVS.  Runtime settings are changed
//! over the broker; every setter range-checks and keeps the prior value on
//! rejection.

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::app::ports::{ConfigError, ConfigStore};
use crate::error::ConfigValidationError;

// ---------------------------------------------------------------------------
// Loop timing
// ---------------------------------------------------------------------------

/// Sensor read + protection evaluation period.
pub const SENSOR_READ_INTERVAL_MS: u64 = 500;
/// Telemetry publish period.
pub const TELEMETRY_INTERVAL_MS: u64 = 2_000;
/// Local panel button debounce.
pub const BUTTON_DEBOUNCE_MS: u64 = 50;
/// Main loop idle delay.
pub const LOOP_DELAY_MS: u64 = 10;

// ---------------------------------------------------------------------------
// Network policy
// ---------------------------------------------------------------------------

pub const WIFI_CONNECT_TIMEOUT_MS: u32 = 30_000;
/// Wireless bring-up bound when failing over at runtime.
pub const WIFI_FAILOVER_TIMEOUT_MS: u32 = 15_000;
pub const ETH_DHCP_TIMEOUT_MS: u32 = 10_000;
pub const MQTT_CONNECT_TIMEOUT_MS: u32 = 10_000;
pub const MQTT_RETRY_INTERVAL_MS: u64 = 5_000;
pub const MQTT_KEEPALIVE_S: u16 = 30;
/// No publish/receive for this long on a live session forces a reconnect.
pub const MQTT_STALE_TIMEOUT_MS: u64 = 90_000;
/// Session buffer size; inbound payloads of this size or larger are dropped.
pub const MQTT_MAX_PAYLOAD: usize = 512;
pub const MAX_PUBLISH_FAILURES: u8 = 3;
pub const MAX_CONNECT_FAILURES: u8 = 3;
/// Port used over the wired transport, which has no TLS stack.
pub const MQTT_PLAIN_PORT: u16 = 1883;
/// Delay before restarting when no transport came up at boot.
pub const NO_NETWORK_RESTART_DELAY_MS: u32 = 3_000;

// ---------------------------------------------------------------------------
// Protection engine tuning
// ---------------------------------------------------------------------------

/// Fixed engine constants.  Not persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineTuning {
    /// Current above which a stopped pump is considered running (A).
    pub run_threshold_a: f32,
    /// A running pump is considered stopped below `run_threshold_a - hysteresis_a`.
    pub hysteresis_a: f32,
    /// Consecutive agreeing ticks needed to commit a state change.
    pub debounce_count: u8,
    /// Commanded pump must reach Running within this window (0 = disabled).
    pub start_timeout_ms: u64,
    /// Latched faults clear themselves after this long (0 = never).
    pub auto_reset_ms: u64,
    /// Consecutive sensor failures that force a SensorFault.
    pub sensor_fault_threshold: u32,
}

impl Default for EngineTuning {
    fn default() -> Self {
        Self {
            run_threshold_a: 5.0,
            hysteresis_a: 1.0,
            debounce_count: 3,
            start_timeout_ms: 10_000,
            auto_reset_ms: 0,
            sensor_fault_threshold: 5,
        }
    }
}

// ---------------------------------------------------------------------------
// Per-pump protection
// ---------------------------------------------------------------------------

pub const MAX_CURRENT_RANGE: (f32, f32) = (1.0, 500.0);
pub const DRY_CURRENT_RANGE: (f32, f32) = (0.0, 50.0);
pub const MAX_DELAY_S: u32 = 30;

/// Protection thresholds for one pump, stored under `prot_p<N>`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProtectionConfig {
    pub overcurrent_enabled: bool,
    pub dryrun_enabled: bool,
    /// Trip above this phase current (A).
    pub max_current_a: f32,
    /// Dry-run below this current while running (A).  0 disables dry-run.
    pub dry_current_a: f32,
    pub overcurrent_delay_s: u32,
    pub dryrun_delay_s: u32,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            overcurrent_enabled: true,
            dryrun_enabled: true,
            max_current_a: 120.0,
            dry_current_a: 0.5,
            overcurrent_delay_s: 0,
            dryrun_delay_s: 0,
        }
    }
}

fn in_range(v: f32, (lo, hi): (f32, f32)) -> bool {
    v.is_finite() && v >= lo && v <= hi
}

impl ProtectionConfig {
    pub fn set_max_current(&mut self, amps: f32) -> Result<(), ConfigValidationError> {
        if !in_range(amps, MAX_CURRENT_RANGE) {
            return Err(ConfigValidationError::OutOfRange { field: "max_current" });
        }
        self.max_current_a = amps;
        Ok(())
    }

    pub fn set_dry_current(&mut self, amps: f32) -> Result<(), ConfigValidationError> {
        if !in_range(amps, DRY_CURRENT_RANGE) {
            return Err(ConfigValidationError::OutOfRange { field: "dry_current" });
        }
        self.dry_current_a = amps;
        Ok(())
    }

    pub fn set_overcurrent_delay(&mut self, secs: u32) -> Result<(), ConfigValidationError> {
        if secs > MAX_DELAY_S {
            return Err(ConfigValidationError::OutOfRange { field: "overcurrent_delay_s" });
        }
        self.overcurrent_delay_s = secs;
        Ok(())
    }

    pub fn set_dryrun_delay(&mut self, secs: u32) -> Result<(), ConfigValidationError> {
        if secs > MAX_DELAY_S {
            return Err(ConfigValidationError::OutOfRange { field: "dryrun_delay_s" });
        }
        self.dryrun_delay_s = secs;
        Ok(())
    }

    pub fn load(store: &impl ConfigStore, namespace: &str) -> Self {
        let d = Self::default();
        let mut cfg = Self {
            overcurrent_enabled: store.get_bool(namespace, "oc_en", d.overcurrent_enabled),
            dryrun_enabled: store.get_bool(namespace, "dr_en", d.dryrun_enabled),
            ..d
        };
        // Stored values go through the same validation as live updates.
        if cfg.set_max_current(store.get_f32(namespace, "max_i", d.max_current_a)).is_err() {
            warn!("Config: {} max_i out of range, using default", namespace);
        }
        if cfg.set_dry_current(store.get_f32(namespace, "dry_i", d.dry_current_a)).is_err() {
            warn!("Config: {} dry_i out of range, using default", namespace);
        }
        let _ = cfg.set_overcurrent_delay(store.get_u32(namespace, "oc_delay", 0));
        let _ = cfg.set_dryrun_delay(store.get_u32(namespace, "dr_delay", 0));
        info!(
            "Config: {} max={:.1}A dry={:.1}A oc_delay={}s dr_delay={}s",
            namespace, cfg.max_current_a, cfg.dry_current_a, cfg.overcurrent_delay_s, cfg.dryrun_delay_s
        );
        cfg
    }

    pub fn save(&self, store: &mut impl ConfigStore, namespace: &str) -> Result<(), ConfigError> {
        store.put(namespace, "oc_en", &self.overcurrent_enabled)?;
        store.put(namespace, "dr_en", &self.dryrun_enabled)?;
        store.put(namespace, "max_i", &self.max_current_a)?;
        store.put(namespace, "dry_i", &self.dry_current_a)?;
        store.put(namespace, "oc_delay", &self.overcurrent_delay_s)?;
        store.put(namespace, "dr_delay", &self.dryrun_delay_s)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Schedule
// ---------------------------------------------------------------------------

pub const SCHEDULE_NAMESPACE: &str = "schedule";
pub const TOU_NAMESPACE: &str = "ruraflex";
/// All seven days, bit 0 = Sunday.
pub const ALL_DAYS: u8 = 0x7F;

/// Custom daily operating window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub enabled: bool,
    pub start_hour: u8,
    pub start_minute: u8,
    pub end_hour: u8,
    pub end_minute: u8,
    /// Day-of-week bitmask, bit 0 = Sunday .. bit 6 = Saturday.
    pub days: u8,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            start_hour: 6,
            start_minute: 0,
            end_hour: 18,
            end_minute: 0,
            days: ALL_DAYS,
        }
    }
}

/// Partial update to a [`ScheduleConfig`]; absent fields are left unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleUpdate {
    pub enabled: Option<bool>,
    pub start_hour: Option<u8>,
    pub start_minute: Option<u8>,
    pub end_hour: Option<u8>,
    pub end_minute: Option<u8>,
    pub days: Option<u8>,
}

impl ScheduleConfig {
    pub fn start_minutes(&self) -> u16 {
        self.start_hour as u16 * 60 + self.start_minute as u16
    }

    pub fn end_minutes(&self) -> u16 {
        self.end_hour as u16 * 60 + self.end_minute as u16
    }

    /// Apply `update` atomically: either every present field is valid and
    /// applied, or nothing changes.
    pub fn apply(&mut self, update: &ScheduleUpdate) -> Result<(), ConfigValidationError> {
        let check = |v: Option<u8>, max: u8, field: &'static str| match v {
            Some(x) if x > max => Err(ConfigValidationError::OutOfRange { field }),
            _ => Ok(()),
        };
        check(update.start_hour, 23, "start_hour")?;
        check(update.start_minute, 59, "start_minute")?;
        check(update.end_hour, 23, "end_hour")?;
        check(update.end_minute, 59, "end_minute")?;
        check(update.days, ALL_DAYS, "days")?;

        if let Some(v) = update.enabled {
            self.enabled = v;
        }
        if let Some(v) = update.start_hour {
            self.start_hour = v;
        }
        if let Some(v) = update.start_minute {
            self.start_minute = v;
        }
        if let Some(v) = update.end_hour {
            self.end_hour = v;
        }
        if let Some(v) = update.end_minute {
            self.end_minute = v;
        }
        if let Some(v) = update.days {
            self.days = v;
        }
        Ok(())
    }

    pub fn load(store: &impl ConfigStore) -> Self {
        let d = Self::default();
        let mut cfg = Self { enabled: store.get_bool(SCHEDULE_NAMESPACE, "enabled", d.enabled), ..d };
        let update = ScheduleUpdate {
            enabled: None,
            start_hour: Some(store.get_u8(SCHEDULE_NAMESPACE, "startH", d.start_hour)),
            start_minute: Some(store.get_u8(SCHEDULE_NAMESPACE, "startM", d.start_minute)),
            end_hour: Some(store.get_u8(SCHEDULE_NAMESPACE, "endH", d.end_hour)),
            end_minute: Some(store.get_u8(SCHEDULE_NAMESPACE, "endM", d.end_minute)),
            days: Some(store.get_u8(SCHEDULE_NAMESPACE, "days", d.days)),
        };
        if let Err(e) = cfg.apply(&update) {
            warn!("Schedule: stored window rejected ({}), using default window", e);
        }
        info!(
            "Schedule: {} {:02}:{:02}-{:02}:{:02} days=0x{:02X}",
            if cfg.enabled { "enabled" } else { "disabled" },
            cfg.start_hour,
            cfg.start_minute,
            cfg.end_hour,
            cfg.end_minute,
            cfg.days
        );
        cfg
    }

    pub fn save(&self, store: &mut impl ConfigStore) -> Result<(), ConfigError> {
        store.put(SCHEDULE_NAMESPACE, "enabled", &self.enabled)?;
        store.put(SCHEDULE_NAMESPACE, "startH", &self.start_hour)?;
        store.put(SCHEDULE_NAMESPACE, "startM", &self.start_minute)?;
        store.put(SCHEDULE_NAMESPACE, "endH", &self.end_hour)?;
        store.put(SCHEDULE_NAMESPACE, "endM", &self.end_minute)?;
        store.put(SCHEDULE_NAMESPACE, "days", &self.days)?;
        Ok(())
    }
}

/// Seasonal time-of-use tariff.  Calendar-driven, only the flag is stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TouConfig {
    pub enabled: bool,
}

impl TouConfig {
    pub fn load(store: &impl ConfigStore) -> Self {
        Self { enabled: store.get_bool(TOU_NAMESPACE, "enabled", false) }
    }

    pub fn save(&self, store: &mut impl ConfigStore) -> Result<(), ConfigError> {
        store.put(TOU_NAMESPACE, "enabled", &self.enabled)
    }
}

// ---------------------------------------------------------------------------
// Broker
// ---------------------------------------------------------------------------

pub const BROKER_NAMESPACE: &str = "mqtt";
const BROKER_KEY: &str = "session";

/// Broker endpoint and credentials.  Stored as one postcard blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub host: heapless::String<96>,
    pub port: u16,
    pub use_tls: bool,
    pub username: heapless::String<48>,
    pub password: heapless::String<48>,
}

fn bounded<const N: usize>(s: &str) -> heapless::String<N> {
    let mut out = heapless::String::new();
    for c in s.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

impl Default for BrokerConfig {
    /// Defaults are baked in at build time from `FIELDLINK_MQTT_*`.
    fn default() -> Self {
        let port = option_env!("FIELDLINK_MQTT_PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(8883);
        Self {
            host: bounded(option_env!("FIELDLINK_MQTT_HOST").unwrap_or("")),
            port,
            use_tls: port != MQTT_PLAIN_PORT,
            username: bounded(option_env!("FIELDLINK_MQTT_USER").unwrap_or("")),
            password: bounded(option_env!("FIELDLINK_MQTT_PASS").unwrap_or("")),
        }
    }
}

impl BrokerConfig {
    pub fn is_configured(&self) -> bool {
        !self.host.is_empty()
    }

    /// Stored blob overrides the build-time defaults.
    pub fn load(store: &impl ConfigStore) -> Self {
        let cfg = store.get_or(BROKER_NAMESPACE, BROKER_KEY, Self::default());
        info!(
            "MQTT: broker {}:{} (TLS: {}) user '{}'",
            cfg.host,
            cfg.port,
            if cfg.use_tls { "yes" } else { "no" },
            cfg.username
        );
        cfg
    }

    pub fn save(&self, store: &mut impl ConfigStore) -> Result<(), ConfigError> {
        store.put(BROKER_NAMESPACE, BROKER_KEY, self)
    }
}

// ---------------------------------------------------------------------------
// Aggregate
// ---------------------------------------------------------------------------

/// Everything loaded from NVS at boot.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerSettings {
    /// One entry per pump, index 0 = pump 1.
    pub protection: Vec<ProtectionConfig>,
    pub schedule: ScheduleConfig,
    pub tou: TouConfig,
}

impl ControllerSettings {
    pub fn defaults(pump_count: usize) -> Self {
        Self {
            protection: vec![ProtectionConfig::default(); pump_count],
            schedule: ScheduleConfig::default(),
            tou: TouConfig::default(),
        }
    }

    /// Load per-pump protection from `namespaces` plus the shared schedule.
    pub fn load(store: &impl ConfigStore, namespaces: &[&str]) -> Self {
        let protection = namespaces.iter().map(|ns| ProtectionConfig::load(store, ns)).collect();
        let mut schedule = ScheduleConfig::load(store);
        let tou = TouConfig::load(store);
        if tou.enabled && schedule.enabled {
            // Both flags set can only come from a partial write; the tariff wins.
            warn!("Schedule: custom window and tariff both enabled, tariff takes precedence");
            schedule.enabled = false;
        }
        Self { protection, schedule, tou }
    }
}
