//! Request middleware: API version negotiation and authentication.

use std::sync::LazyLock;

use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use regex::Regex;

use crate::api::{API_VERSION, MIN_API_VERSION, VERSION, compare_versions};
use crate::error::ApiError;
use crate::state::AppState;

static VERSION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^/api/v([0-9.]+)(/|$)").expect("version pattern"));

/// Paths served without any credential.
static NO_AUTH_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("^/api/v[0-9.]+/(version|auth|me/claim|swagger\\.json)$").expect("no-auth pattern")
});

/// Paths a device reaches with its own token.
static DEVICE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^/api/v[0-9.]+/me(/.*)?$").expect("device pattern"));

/// Identity injected for device-authenticated requests.
#[derive(Debug, Clone)]
pub struct DeviceIdentity(pub String);

/// Validate the client's `/api/vN/` version against what this server
/// speaks, and stamp the `Server` header on every response.
pub async fn version(request: Request, next: Next) -> Response {
    let path = request.uri().path();
    if path.starts_with("/api/") && !VERSION_PATTERN.is_match(path) {
        return ApiError::BadRequest("invalid API version".into()).into_response();
    }
    if let Some(caps) = VERSION_PATTERN.captures(path) {
        let client = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        if compare_versions(client, API_VERSION) == std::cmp::Ordering::Greater {
            return ApiError::BadRequest(format!(
                "client is newer than server (client API version: {client}, server API version: {API_VERSION})"
            ))
            .into_response();
        }
        if compare_versions(client, MIN_API_VERSION) == std::cmp::Ordering::Less {
            return ApiError::BadRequest(format!(
                "client version {client} is too old, minimum supported API version is {MIN_API_VERSION}, \
                 please upgrade your client to a newer version"
            ))
            .into_response();
        }
    }

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&format!("IOTA-API/{VERSION}")) {
        response.headers_mut().insert("server", value);
    }
    response
}

/// Resolve the bearer token into a device id or a user record, or let
/// the no-auth paths through. Failures get an empty 401.
pub async fn auth(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let path = request.uri().path();

    if NO_AUTH_PATTERN.is_match(path) {
        return next.run(request).await;
    }

    if DEVICE_PATTERN.is_match(path) {
        match state.devices.verify_request(request.headers()) {
            Ok(device_id) => {
                request.extensions_mut().insert(DeviceIdentity(device_id));
                next.run(request).await
            }
            Err(_) => StatusCode::UNAUTHORIZED.into_response(),
        }
    } else {
        match state.authz.verify_request(request.headers()) {
            Ok(user) => {
                tracing::debug!(user = %user.name, "logged in user");
                request.extensions_mut().insert(user);
                next.run(request).await
            }
            Err(_) => StatusCode::UNAUTHORIZED.into_response(),
        }
    }
}
