//! Port traits: the hexagonal boundary between domain logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ PumpController / ConnectionManager (domain)
//! ```
//!
//! Driven adapters (power meter, IO expander, broker client, links, storage)
//! implement these traits.  The domain consumes them via generics, so the
//! protection engine and the transport policy never touch hardware directly
//! and run unchanged against the mocks in `tests/`.

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::commands::{Command, Origin, Outcome};
use super::events::AppEvent;
use crate::error::{FirmwareUpdateError, NetworkError};
use crate::schedule::LocalTime;

// ───────────────────────────────────────────────────────────────
// Sensor port (driven adapter: power meter → domain)
// ───────────────────────────────────────────────────────────────

/// Per-phase voltage and current, index 0..3 = L1..L3.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PowerSample {
    pub voltages: [f32; 3],
    pub currents: [f32; 3],
}

/// Result of one sensor transaction.
///
/// `sample` always carries the last known-good values; `ok` is false when the
/// transaction failed or the currents were rejected.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SensorReading {
    pub sample: PowerSample,
    pub ok: bool,
}

/// Read-side port: the domain calls this once per sensing tick.
pub trait SensorPort {
    fn read(&mut self) -> SensorReading;

    /// False after the consecutive-failure threshold, true after any success.
    fn is_online(&self) -> bool;

    fn consecutive_failures(&self) -> u32;
}

// ───────────────────────────────────────────────────────────────
// Digital IO ports (driven adapter: domain ↔ board IO)
// ───────────────────────────────────────────────────────────────

/// Logical digital outputs (`true` = energised), channels 0..8.
///
/// Implementations write to hardware only when the output image changes.
pub trait OutputPort {
    fn set_output(&mut self, channel: u8, on: bool);

    fn is_output_on(&self, channel: u8) -> bool;

    /// Bitmap of energised outputs, bit n = channel n.
    fn output_bits(&self) -> u8;
}

/// Digital inputs packed into a bitmap, bit n set = input n active.
pub trait InputPort {
    fn read_inputs(&mut self) -> u8;
}

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

/// Injectable time source.  Every delay and debounce in the domain is a
/// duration-since-timestamp comparison against [`now_ms`](ClockPort::now_ms).
pub trait ClockPort {
    /// Monotonic milliseconds since boot.
    fn now_ms(&self) -> u64;

    /// Local wall-clock time, `None` until the clock has been synchronised.
    fn local_time(&self) -> Option<LocalTime>;
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging)
// ───────────────────────────────────────────────────────────────

/// The domain emits structured [`AppEvent`]s through this port.
pub trait EventSink {
    fn emit(&mut self, event: &AppEvent);
}

// ───────────────────────────────────────────────────────────────
// Network ports
// ───────────────────────────────────────────────────────────────

/// One physical network transport (wired Ethernet or wireless station).
pub trait LinkPort {
    /// Bring the link up and wait (bounded) for an address lease.
    fn bring_up(&mut self) -> Result<(), NetworkError>;

    /// Poll link and lease health.  Called every loop iteration.
    fn is_up(&mut self) -> bool;

    /// Power the interface down.
    fn shutdown(&mut self);
}

/// Everything a broker client needs to open one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionParams<'a> {
    pub client_id: &'a str,
    pub host: &'a str,
    pub port: u16,
    pub use_tls: bool,
    pub username: Option<&'a str>,
    pub password: Option<&'a str>,
    /// Last-Will topic; the will is published retained with `will_payload`.
    pub will_topic: &'a str,
    pub will_payload: &'a str,
    pub keepalive_secs: u16,
    pub buffer_size: usize,
    pub connect_timeout_ms: u32,
}

/// A message delivered by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Publish/subscribe session over whichever link is active.
pub trait BrokerPort {
    /// Open a session; blocks at most `params.connect_timeout_ms`.
    fn connect(&mut self, params: &SessionParams<'_>) -> Result<(), NetworkError>;

    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    fn subscribe(&mut self, topic: &str) -> Result<(), NetworkError>;

    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), NetworkError>;

    /// Next queued inbound message, if any.  Never blocks.
    fn poll(&mut self) -> Option<InboundMessage>;
}

// ───────────────────────────────────────────────────────────────
// Command capability (transport → domain)
// ───────────────────────────────────────────────────────────────

/// The single capability interface every command source drives.
pub trait CommandHandler {
    /// De-energise every contactor and clear all start intent.
    fn halt_all(&mut self);

    fn dispatch(&mut self, command: Command, origin: Origin) -> Outcome;
}

/// Downloads and installs a new firmware image.
///
/// On success the implementation restarts the device and does not return
/// on hardware.  On failure the running image is untouched.
pub trait FirmwareUpdater {
    fn perform_update(&mut self, url: &str) -> Result<(), FirmwareUpdateError>;
}

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: domain ↔ NVS / flash)
// ───────────────────────────────────────────────────────────────

/// Persistent key-value storage, grouped by namespace.
///
/// - Keys are namespaced to prevent collisions between subsystems.
/// - Write operations MUST be atomic: no partial writes on power loss.
///   The ESP-IDF NVS API guarantees this natively.
pub trait StoragePort {
    /// Read a value.  Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key.  Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    /// Check whether a key exists without reading it.
    fn exists(&self, namespace: &str, key: &str) -> bool;
}

/// Largest encoded value the typed store reads back.
pub const MAX_VALUE_LEN: usize = 256;

/// Typed get/set layered over any [`StoragePort`], values encoded with postcard.
///
/// Writes are read-before-write: an unchanged value is not rewritten, which
/// keeps flash wear down when a settings command repeats the current value.
pub trait ConfigStore: StoragePort {
    fn get<T: DeserializeOwned>(&self, namespace: &str, key: &str) -> Result<T, ConfigError> {
        let mut buf = [0u8; MAX_VALUE_LEN];
        let len = match self.read(namespace, key, &mut buf) {
            Ok(len) => len,
            Err(StorageError::NotFound) => return Err(ConfigError::NotFound),
            Err(_) => return Err(ConfigError::IoError),
        };
        postcard::from_bytes(&buf[..len]).map_err(|_| ConfigError::Corrupted)
    }

    fn put<T: Serialize>(&mut self, namespace: &str, key: &str, value: &T) -> Result<(), ConfigError> {
        let bytes = postcard::to_allocvec(value).map_err(|_| ConfigError::IoError)?;
        if bytes.len() > MAX_VALUE_LEN {
            return Err(ConfigError::ValidationFailed("value too large"));
        }
        let mut current = [0u8; MAX_VALUE_LEN];
        if let Ok(len) = self.read(namespace, key, &mut current) {
            if current[..len] == bytes[..] {
                return Ok(());
            }
        }
        self.write(namespace, key, &bytes).map_err(|e| match e {
            StorageError::Full => ConfigError::StorageFull,
            _ => ConfigError::IoError,
        })
    }

    /// Read `key`, falling back to `default` when missing or unreadable.
    fn get_or<T: DeserializeOwned>(&self, namespace: &str, key: &str, default: T) -> T {
        match self.get(namespace, key) {
            Ok(v) => v,
            Err(ConfigError::NotFound) => default,
            Err(e) => {
                log::warn!("Config: {}/{} unreadable ({}), using default", namespace, key, e);
                default
            }
        }
    }

    fn get_bool(&self, namespace: &str, key: &str, default: bool) -> bool {
        self.get_or(namespace, key, default)
    }

    fn get_f32(&self, namespace: &str, key: &str, default: f32) -> f32 {
        self.get_or(namespace, key, default)
    }

    fn get_u32(&self, namespace: &str, key: &str, default: u32) -> u32 {
        self.get_or(namespace, key, default)
    }

    fn get_u8(&self, namespace: &str, key: &str, default: u8) -> u8 {
        self.get_or(namespace, key, default)
    }
}

impl<S: StoragePort + ?Sized> ConfigStore for S {}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`ConfigStore`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// No value stored under the key (first boot).
    NotFound,
    /// Stored value failed to decode.
    Corrupted,
    /// A value was rejected before it reached storage.
    ValidationFailed(&'static str),
    /// Underlying storage is full.
    StorageFull,
    /// Generic I/O error from the storage backend.
    IoError,
}

/// Errors from [`StoragePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Storage partition is full.
    Full,
    /// Generic I/O error.
    IoError,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "not found"),
            Self::Corrupted => write!(f, "corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::StorageFull => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}
