//! Alarm endpoints, operator-side and device-side.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{OriginalUri, Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde_json::json;

use iota_protocol::alarm::Alarm;

use crate::error::{ApiError, ApiResult};
use crate::middleware::DeviceIdentity;
use crate::state::AppState;

/// Alarm ids are opaque lowercase hex.
fn check_alarm_id(id: &str) -> Result<(), ApiError> {
    let hex = !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    if hex {
        Ok(())
    } else {
        Err(ApiError::AlarmNotFound(id.to_string()))
    }
}

/// GET /api/v1/alarms.
pub async fn list(State(state): State<AppState>) -> ApiResult<Json<Vec<Alarm>>> {
    Ok(Json(state.alarms.find_all().await?))
}

/// POST /api/v1/alarms — raise or refresh an alarm.
pub async fn upsert(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Json(mut alarm): Json<Alarm>,
) -> ApiResult<Response> {
    state.alarms.upsert(&mut alarm).await?;
    let location = format!("{}/{}", uri.path(), alarm.id);
    Ok((
        StatusCode::OK,
        [(header::LOCATION, location)],
        Json(json!({"id": alarm.id})),
    )
        .into_response())
}

/// GET /api/v1/alarms/{id}.
pub async fn read(
    State(state): State<AppState>,
    Path((_version, id)): Path<(String, String)>,
) -> ApiResult<Json<Alarm>> {
    check_alarm_id(&id)?;
    Ok(Json(state.alarms.find(&id).await?))
}

/// DELETE /api/v1/alarms/{id}.
pub async fn remove(
    State(state): State<AppState>,
    Path((_version, id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    check_alarm_id(&id)?;
    state.alarms.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/alarms/{id}/clear.
pub async fn clear(
    State(state): State<AppState>,
    Path((_version, id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    check_alarm_id(&id)?;
    state.alarms.clear(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/alarms/{id}/subscribe — WebSocket stream of alarm
/// updates for one alarm id, or all alarms with `+`.
pub async fn subscribe(
    State(state): State<AppState>,
    Path((_version, id)): Path<(String, String)>,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    if id != "+" {
        check_alarm_id(&id)?;
    }
    Ok(state.alarm_hub.serve(ws, id))
}

/// POST /api/v1/me/alarm — a device raises an alarm about itself; the
/// originator is always the caller.
pub async fn upsert_me(
    State(state): State<AppState>,
    Extension(DeviceIdentity(device_id)): Extension<DeviceIdentity>,
    OriginalUri(uri): OriginalUri,
    Json(mut alarm): Json<Alarm>,
) -> ApiResult<Response> {
    alarm.originator = device_id;
    state.alarms.upsert(&mut alarm).await?;
    let location = format!("{}/{}", uri.path(), alarm.name);
    Ok((
        StatusCode::OK,
        [(header::LOCATION, location)],
        Json(json!({"id": alarm.id})),
    )
        .into_response())
}

/// GET /api/v1/me/alarm/{name}.
pub async fn read_me(
    State(state): State<AppState>,
    Extension(DeviceIdentity(device_id)): Extension<DeviceIdentity>,
    Path((_version, name)): Path<(String, String)>,
) -> ApiResult<Json<Alarm>> {
    Ok(Json(state.alarms.find_name(&name, &device_id).await?))
}

/// DELETE /api/v1/me/alarm/{name}.
pub async fn remove_me(
    State(state): State<AppState>,
    Extension(DeviceIdentity(device_id)): Extension<DeviceIdentity>,
    Path((_version, name)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    state.alarms.delete_name(&name, &device_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/me/alarm/{name}/clear.
pub async fn clear_me(
    State(state): State<AppState>,
    Extension(DeviceIdentity(device_id)): Extension<DeviceIdentity>,
    Path((_version, name)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    state.alarms.clear_name(&name, &device_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alarm_id_must_be_lowercase_hex() {
        assert!(check_alarm_id("0badc0ffee").is_ok());
        assert!(check_alarm_id("DEADBEEF").is_err());
        assert!(check_alarm_id("not-hex").is_err());
        assert!(check_alarm_id("").is_err());
    }
}
