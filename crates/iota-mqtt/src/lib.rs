//! MQTT gateway for the iota platform.
//!
//! Wraps `rumqttc::AsyncClient` behind the [`Channel`] trait so the
//! rest of the system (and tests, via [`MockChannel`]) never touch the
//! broker client directly. Outbound publishes flow through a bounded
//! queue drained by a single task; inbound messages are dispatched to
//! registered topic handlers.

pub mod channel;
pub mod config;
pub mod error;
pub mod handler;
pub mod mock;

pub use channel::{Channel, MqttChannel, Payload};
pub use config::MqttConfig;
pub use error::{MqttError, MqttResult};
pub use handler::{HandlerRegistry, MessageHandler, filter_matches};
pub use mock::MockChannel;
