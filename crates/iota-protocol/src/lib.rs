//! Shared protocol types for the iota device-management platform.
//!
//! Everything that crosses a wire lives here: device records and their
//! reserved keys, alarms, the MQTT topic grammar (builders and the
//! bridge topic parser), and JSON-RPC request classification.

pub mod alarm;
pub mod device;
pub mod rpc;
pub mod topics;

pub use device::{Record, Token, VersionInfo};
