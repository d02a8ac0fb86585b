//! IOTA API server library.
//!
//! Devices speak MQTT, operators speak HTTP/JSON; both populations
//! land in the same handler graph. The library exposes everything the
//! `iota` binary wires together, plus what the broker auth shim and
//! the test suites need.

pub mod alarm;
pub mod api;
pub mod auth;
pub mod bridge;
pub mod config;
pub mod db;
pub mod device;
pub mod error;
pub mod hub;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod tsdb;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
