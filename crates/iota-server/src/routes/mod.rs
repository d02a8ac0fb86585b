//! API route definitions and router builder.

pub mod alarms;
pub mod claims;
pub mod devices;
pub mod me;
pub mod system;

use axum::Router;
use axum::routing::{get, post};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::middleware;
use crate::state::AppState;

/// Optional `keys=a,b,c` projection parameter.
#[derive(Debug, Default, Deserialize)]
pub struct KeysQuery {
    pub keys: Option<String>,
}

impl KeysQuery {
    pub fn keys(&self) -> Vec<String> {
        self.keys
            .as_deref()
            .filter(|k| !k.is_empty())
            .map(|k| k.split(',').map(str::to_string).collect())
            .unwrap_or_default()
    }
}

/// Build the Axum router with all routes and middleware.
///
/// The same router serves real HTTP and the synthesized requests the
/// MQTT bridge produces.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        // System endpoints
        .route("/version", get(system::version))
        .route("/auth", post(system::auth))
        // Device registry
        .route("/devices", get(devices::list).post(devices::create))
        .route(
            "/devices/{id}",
            get(devices::read)
                .put(devices::update)
                .delete(devices::remove),
        )
        .route("/devices/{id}/rpc", post(devices::rpc))
        .route("/devices/{id}/subscribe", get(devices::subscribe))
        // Claims
        .route("/claims", get(claims::list))
        .route("/claims/{id}/approve", post(claims::approve))
        .route("/claims/{id}/reject", post(claims::reject))
        // Device-facing endpoints
        .route("/me/claim", post(me::claim))
        .route(
            "/me/attributes",
            get(me::read_attributes).post(me::update_attributes),
        )
        .route("/me/measurement", post(me::measurement))
        // Alarms
        .route("/alarms", get(alarms::list).post(alarms::upsert))
        .route(
            "/alarms/{id}",
            get(alarms::read).delete(alarms::remove),
        )
        .route("/alarms/{id}/clear", post(alarms::clear))
        .route("/alarms/{id}/subscribe", get(alarms::subscribe))
        .route("/me/alarm", post(alarms::upsert_me))
        .route(
            "/me/alarm/{name}",
            get(alarms::read_me).delete(alarms::remove_me),
        )
        .route("/me/alarm/{name}/clear", post(alarms::clear_me));

    Router::new()
        .nest("/api/{version}", api)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth,
        ))
        .layer(axum::middleware::from_fn(middleware::version))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
