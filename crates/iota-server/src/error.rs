//! API error taxonomy with Axum `IntoResponse` support.
//!
//! Every variant carries its HTTP status. The response body is the
//! error message for client errors and a fixed string for 5xx, which
//! never leaks internals. Call sites construct the precise variant;
//! there is no classification by message content.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid device id: {0}")]
    InvalidDeviceId(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("You cannot login using this identity: {0}")]
    InactiveUser(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("No such device claim: {0}")]
    ClaimNotFound(String),

    #[error("Alarm not found: {0}")]
    AlarmNotFound(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Device already exists: {0}")]
    DuplicateDevice(String),

    #[error("User already exists: {0}")]
    DuplicateUser(String),

    #[error("Device claim with id '{0}' is in progress, please wait.")]
    DuplicateClaim(String),

    #[error("{0}")]
    NotAcceptable(String),

    #[error("Device did not respond: {0}")]
    RpcTimeout(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidDeviceId(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::InactiveUser(_) => StatusCode::FORBIDDEN,
            ApiError::DeviceNotFound(_)
            | ApiError::ClaimNotFound(_)
            | ApiError::AlarmNotFound(_)
            | ApiError::UserNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::DuplicateDevice(_)
            | ApiError::DuplicateUser(_)
            | ApiError::DuplicateClaim(_) => StatusCode::CONFLICT,
            ApiError::NotAcceptable(_) => StatusCode::NOT_ACCEPTABLE,
            ApiError::RpcTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "handler returned error");
            (status, "Internal server error").into_response()
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "handler returned error");
            (status, self.to_string()).into_response()
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        ApiError::Internal(anyhow::Error::new(e).context("database error"))
    }
}

impl From<iota_mqtt::MqttError> for ApiError {
    fn from(e: iota_mqtt::MqttError) -> Self {
        ApiError::Internal(anyhow::Error::new(e).context("mqtt gateway error"))
    }
}

/// Convenience alias.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn client_error_carries_message() {
        let err = ApiError::DeviceNotFound("pi-99".into());
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.as_ref(), b"Device not found: pi-99");
    }

    #[tokio::test]
    async fn server_error_body_is_fixed() {
        let err = ApiError::Internal(anyhow::anyhow!("connection pool exhausted"));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.as_ref(), b"Internal server error");
    }

    #[test]
    fn status_mapping() {
        assert_eq!(
            ApiError::InvalidDeviceId("x y".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::DuplicateClaim("pi-1".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::InactiveUser("bob".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::RpcTimeout("pi-1".into()).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }
}
