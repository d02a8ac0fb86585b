//! Gateway error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MqttError {
    #[error("invalid broker url: {0}")]
    Config(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error("unsubscribe failed: {0}")]
    Unsubscribe(String),

    #[error("payload serialization failed: {0}")]
    Serialization(String),

    #[error("gateway is shut down")]
    Closed,
}

pub type MqttResult<T> = Result<T, MqttError>;
