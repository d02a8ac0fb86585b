//! System endpoints: version info and login.

use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use base64::Engine as _;

use iota_protocol::{Token, VersionInfo};

use crate::api;
use crate::state::AppState;

/// GET /api/v1/version — build and API version info, no auth.
pub async fn version() -> Json<VersionInfo> {
    Json(VersionInfo {
        version: api::VERSION.to_string(),
        api_version: api::API_VERSION.to_string(),
        git_commit: api::GIT_COMMIT.to_string(),
        build_time: api::BUILD_TIME.to_string(),
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
    })
}

/// POST /api/v1/auth — basic-auth login, returns a bearer token.
pub async fn auth(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some((username, password)) = basic_credentials(&headers) else {
        return (
            StatusCode::UNAUTHORIZED,
            "Requires username and password",
        )
            .into_response();
    };

    match state.authz.authenticate(&username, &password).await {
        Ok((_, token)) => Json(Token::new(token)).into_response(),
        Err(e) => {
            tracing::debug!(username = %username, error = %e, "login failed");
            (StatusCode::UNAUTHORIZED, "Login failed").into_response()
        }
    }
}

fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_credentials_parse() {
        let mut headers = HeaderMap::new();
        let encoded = base64::engine::general_purpose::STANDARD.encode("alice:s3cr:et");
        headers.insert(
            header::AUTHORIZATION,
            format!("Basic {encoded}").parse().unwrap(),
        );
        // Only the first colon separates user and password.
        assert_eq!(
            basic_credentials(&headers),
            Some(("alice".into(), "s3cr:et".into()))
        );
    }

    #[test]
    fn non_basic_scheme_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "bearer tok".parse().unwrap());
        assert_eq!(basic_credentials(&headers), None);
        headers.clear();
        assert_eq!(basic_credentials(&headers), None);
    }
}
