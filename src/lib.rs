//! FieldLink pump controller firmware library.
//!
//! Exposes the domain and adapter modules for integration testing.  All
//! ESP-IDF-specific code is guarded by `#[cfg(target_os = "espidf")]`
//! within each module; on the host every adapter has a simulation path.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod config;
pub mod drivers;
pub mod error;
pub mod pins;
pub mod pump;
pub mod schedule;
pub mod transport;
