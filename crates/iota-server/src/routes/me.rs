//! Device-facing endpoints.
//!
//! All but `/me/claim` run behind device-token auth, which injects the
//! caller's identity; a device can only ever touch its own record.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};

use iota_protocol::Record;
use iota_protocol::device::CLAIM_ID_ATTR;

use crate::error::{ApiError, ApiResult};
use crate::middleware::DeviceIdentity;
use crate::routes::KeysQuery;
use crate::state::AppState;
use crate::tsdb;

/// POST /api/v1/me/claim — anonymous onboarding request; the body
/// must carry `claim-id`.
pub async fn claim(
    State(state): State<AppState>,
    Json(body): Json<Record>,
) -> ApiResult<StatusCode> {
    let Some(claim_id) = body
        .get(CLAIM_ID_ATTR)
        .and_then(|v| v.as_str())
        .map(str::to_string)
    else {
        return Err(ApiError::BadRequest("Missing \"claim-id\" attribute".into()));
    };

    state.devices.claim(&claim_id, body).await?;
    Ok(StatusCode::ACCEPTED)
}

/// GET /api/v1/me/attributes — the device reads its own record.
pub async fn read_attributes(
    State(state): State<AppState>,
    Extension(DeviceIdentity(id)): Extension<DeviceIdentity>,
    Query(query): Query<KeysQuery>,
) -> ApiResult<Json<Record>> {
    let record = state.devices.find(&id, &query.keys()).await?;
    Ok(Json(record))
}

/// POST /api/v1/me/attributes — the device updates its own record.
pub async fn update_attributes(
    State(state): State<AppState>,
    Extension(DeviceIdentity(id)): Extension<DeviceIdentity>,
    Json(body): Json<Record>,
) -> ApiResult<StatusCode> {
    state.devices.update(&id, body).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/me/measurement — telemetry in line protocol. The
/// record is tagged with the calling device and handed to the
/// time-series sink; the device never waits on the write.
pub async fn measurement(
    State(state): State<AppState>,
    Extension(DeviceIdentity(id)): Extension<DeviceIdentity>,
    body: String,
) -> StatusCode {
    let record = tsdb::tag_device(&body, &id);
    match &state.tsdb {
        Some(sink) => sink.write_record(record),
        None => tracing::debug!(device_id = %id, "dropping measurement, no time-series sink"),
    }
    StatusCode::NO_CONTENT
}
