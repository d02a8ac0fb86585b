//! Operator-side claim endpoints.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;

use iota_protocol::{Record, Token};

use crate::error::ApiResult;
use crate::state::AppState;

/// GET /api/v1/claims — pending claims.
pub async fn list(State(state): State<AppState>) -> Json<Vec<Record>> {
    Json(state.devices.get_claims())
}

/// POST /api/v1/claims/{id}/approve — approve with optional attribute
/// overrides; returns the minted device token.
pub async fn approve(
    State(state): State<AppState>,
    Path((_version, id)): Path<(String, String)>,
    Json(overrides): Json<Record>,
) -> ApiResult<Json<Token>> {
    let token = state.devices.approve(&id, overrides).await?;
    Ok(Json(Token::new(token)))
}

/// POST /api/v1/claims/{id}/reject — drop a pending claim.
pub async fn reject(
    State(state): State<AppState>,
    Path((_version, id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    state.devices.reject(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
