//! Application core: pure domain logic, zero I/O.
//!
//! The pump controller, the command model and the outbound events.  All
//! interaction with hardware and the network happens through the **port
//! traits** in [`ports`], so this layer runs unchanged against mocks.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
