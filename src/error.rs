//! Unified error types for the FieldLink firmware.
//!
//! Every subsystem error converts into [`Error`] so the binary's top level
//! can treat them uniformly.  All variants are `Copy`; nothing here allocates.
//!
//! Recovery policy per category:
//!
//! | Category                 | Handling                                         |
//! |--------------------------|--------------------------------------------------|
//! | [`SensorError`]          | retried; escalates to a SensorFault after 5 reads |
//! | [`ElectricalFault`]      | latched on the pump until an explicit reset       |
//! | [`NetworkError`]         | retried with fixed interval and transport failover |
//! | [`ConfigValidationError`]| input rejected, prior value kept                  |
//! | [`FirmwareUpdateError`]  | update aborted, running image untouched           |

use core::fmt;

pub use crate::app::ports::StorageError;

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    Sensor(SensorError),
    Electrical(ElectricalFault),
    Network(NetworkError),
    Config(ConfigValidationError),
    FirmwareUpdate(FirmwareUpdateError),
    Storage(StorageError),
    /// Peripheral initialisation failed.
    Init(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sensor(e) => write!(f, "sensor: {e}"),
            Self::Electrical(e) => write!(f, "electrical: {e}"),
            Self::Network(e) => write!(f, "network: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
            Self::FirmwareUpdate(e) => write!(f, "firmware update: {e}"),
            Self::Storage(e) => write!(f, "storage: {e}"),
            Self::Init(msg) => write!(f, "init: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Sensor errors
// ---------------------------------------------------------------------------

/// A single failed exchange with the power meter.  Transient by nature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    /// No (complete) response within the bus timeout.
    Timeout,
    /// Response frame failed its CRC check.
    Crc,
    /// The meter answered with a Modbus exception code.
    Exception(u8),
    /// Response had the wrong address, function or length.
    Malformed,
    /// Frame was fine but the decoded values were NaN/inf or out of range.
    InvalidReading,
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "meter did not respond"),
            Self::Crc => write!(f, "response CRC mismatch"),
            Self::Exception(code) => write!(f, "meter exception 0x{code:02X}"),
            Self::Malformed => write!(f, "malformed response"),
            Self::InvalidReading => write!(f, "reading out of range"),
        }
    }
}

impl From<SensorError> for Error {
    fn from(e: SensorError) -> Self {
        Self::Sensor(e)
    }
}

// ---------------------------------------------------------------------------
// Electrical faults
// ---------------------------------------------------------------------------

/// Conditions detected by the protection engine that trip a pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectricalFault {
    /// Phase current above the configured maximum for the configured delay.
    Overcurrent,
    /// Current below the dry-run threshold while commanded and running.
    DryRun,
    /// Start was commanded but the motor never drew running current.
    StartTimeout,
}

impl fmt::Display for ElectricalFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overcurrent => write!(f, "overcurrent"),
            Self::DryRun => write!(f, "dry run"),
            Self::StartTimeout => write!(f, "start timeout"),
        }
    }
}

impl From<ElectricalFault> for Error {
    fn from(e: ElectricalFault) -> Self {
        Self::Electrical(e)
    }
}

// ---------------------------------------------------------------------------
// Network errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkError {
    /// Physical link absent (cable unplugged, AP out of range).
    LinkDown,
    /// DHCP lease / association not obtained within the bring-up timeout.
    LeaseTimeout,
    /// No broker host configured.
    NotConfigured,
    /// Broker did not accept the session within the connect timeout.
    ConnectTimeout,
    /// Broker refused the session (bad credentials, client id clash).
    BrokerRefused,
    /// Operation requires a live broker session.
    NotConnected,
    PublishFailed,
    PayloadTooLarge,
    /// Neither transport could be brought up.
    NoTransport,
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LinkDown => write!(f, "link down"),
            Self::LeaseTimeout => write!(f, "no address lease within timeout"),
            Self::NotConfigured => write!(f, "broker not configured"),
            Self::ConnectTimeout => write!(f, "broker connect timeout"),
            Self::BrokerRefused => write!(f, "broker refused session"),
            Self::NotConnected => write!(f, "not connected"),
            Self::PublishFailed => write!(f, "publish failed"),
            Self::PayloadTooLarge => write!(f, "payload too large"),
            Self::NoTransport => write!(f, "no transport available"),
        }
    }
}

impl From<NetworkError> for Error {
    fn from(e: NetworkError) -> Self {
        Self::Network(e)
    }
}

// ---------------------------------------------------------------------------
// Configuration validation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigValidationError {
    /// The named field was outside its permitted range; nothing was changed.
    OutOfRange { field: &'static str },
    /// A command addressed a pump number the board does not have.
    UnknownPump(u8),
}

impl fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfRange { field } => write!(f, "{field} out of range"),
            Self::UnknownPump(n) => write!(f, "no pump {n}"),
        }
    }
}

impl From<ConfigValidationError> for Error {
    fn from(e: ConfigValidationError) -> Self {
        Self::Config(e)
    }
}

// ---------------------------------------------------------------------------
// Firmware update
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareUpdateError {
    MissingUrl,
    /// HTTP request failed or returned a non-200 status.
    Download,
    /// Writing to the inactive OTA partition failed.
    Write,
    /// Image verification failed after the last byte.
    Verify,
    BootPartition,
    /// This build has no updater (host simulation).
    Unsupported,
}

impl fmt::Display for FirmwareUpdateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingUrl => write!(f, "missing url"),
            Self::Download => write!(f, "download failed"),
            Self::Write => write!(f, "flash write failed"),
            Self::Verify => write!(f, "image verification failed"),
            Self::BootPartition => write!(f, "set boot partition failed"),
            Self::Unsupported => write!(f, "updates unsupported on this target"),
        }
    }
}

impl From<FirmwareUpdateError> for Error {
    fn from(e: FirmwareUpdateError) -> Self {
        Self::FirmwareUpdate(e)
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
