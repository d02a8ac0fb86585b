//! Device registry endpoints.

use axum::Json;
use axum::body::Bytes;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{OriginalUri, Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};

use iota_protocol::{Record, Token};

use crate::error::{ApiError, ApiResult};
use crate::routes::KeysQuery;
use crate::state::AppState;

/// GET /api/v1/devices — list all devices, optionally projected.
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<KeysQuery>,
) -> ApiResult<Json<Vec<Record>>> {
    let records = state.devices.find_all(&query.keys()).await?;
    Ok(Json(records))
}

/// POST /api/v1/devices — register a device; the body must carry `id`.
pub async fn create(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Json(body): Json<Record>,
) -> ApiResult<Response> {
    let Some(id) = body.get("id").and_then(|v| v.as_str()).map(str::to_string) else {
        return Err(ApiError::BadRequest("Missing \"id\" attribute".into()));
    };

    let token = state.devices.create_token(&id)?;
    state.devices.create(&id, &token, body).await?;

    let location = format!("{}/{}", uri.path(), id);
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        Json(Token::new(token)),
    )
        .into_response())
}

/// GET /api/v1/devices/{id} — read one device.
pub async fn read(
    State(state): State<AppState>,
    Path((_version, id)): Path<(String, String)>,
    Query(query): Query<KeysQuery>,
) -> ApiResult<Json<Record>> {
    let record = state.devices.find(&id, &query.keys()).await?;
    Ok(Json(record))
}

/// PUT /api/v1/devices/{id} — merge attribute updates.
pub async fn update(
    State(state): State<AppState>,
    Path((_version, id)): Path<(String, String)>,
    Json(body): Json<Record>,
) -> ApiResult<StatusCode> {
    state.devices.update(&id, body).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/v1/devices/{id}.
pub async fn remove(
    State(state): State<AppState>,
    Path((_version, id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    state.devices.remove(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/devices/{id}/rpc — forward a JSON-RPC payload to the
/// device, waiting for the response when one is expected.
pub async fn rpc(
    State(state): State<AppState>,
    Path((_version, id)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<Response> {
    match state.devices.rpc(&id, body.to_vec()).await? {
        Some(response) => Ok((
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            response,
        )
            .into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

/// GET /api/v1/devices/{id}/subscribe — WebSocket stream of attribute
/// changes for one device, or all devices with id `+`.
pub async fn subscribe(
    State(state): State<AppState>,
    Path((_version, id)): Path<(String, String)>,
    ws: WebSocketUpgrade,
) -> Response {
    state.device_hub.serve(ws, id)
}
