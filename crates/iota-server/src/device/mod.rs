//! Device lifecycle: registry, claims, and device-directed RPC.

pub mod mgr;
pub mod rpc;

pub use mgr::{DeviceManager, DeviceManagerOptions};
