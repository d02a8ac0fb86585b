//! Shared test harness for the end-to-end scenarios.
//!
//! Wires the full application state, the real router, and a shared
//! `MockChannel` standing in for the broker, so every scenario runs
//! the same code paths as production minus the network.

#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, header};
use http_body_util::BodyExt;
use tower::ServiceExt;

use iota_mqtt::{Channel, MockChannel};
use iota_server::device::DeviceManagerOptions;
use iota_server::routes::build_router;
use iota_server::state::AppState;

pub struct TestHarness {
    pub state: AppState,
    pub router: Router,
    pub mqtt: Arc<MockChannel>,
    /// Bearer token of the logged-in operator.
    pub operator_token: String,
}

impl TestHarness {
    pub async fn new() -> Self {
        Self::with_options(DeviceManagerOptions::default()).await
    }

    pub async fn with_options(options: DeviceManagerOptions) -> Self {
        let mqtt = Arc::new(MockChannel::new());
        let state =
            AppState::in_memory_with(Some(Arc::clone(&mqtt) as Arc<dyn Channel>), options).await;

        state.users.create("admin", "hunter2").await.unwrap();
        let (_, operator_token) = state.authz.authenticate("admin", "hunter2").await.unwrap();

        let router = build_router(state.clone());
        Self {
            state,
            router,
            mqtt,
            operator_token,
        }
    }

    /// Issue a request as the logged-in operator.
    pub async fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<&str>,
    ) -> axum::response::Response {
        self.request_with_token(method, path, Some(&self.operator_token), body)
            .await
    }

    /// Issue a request with an explicit bearer token (or none).
    pub async fn request_with_token(
        &self,
        method: &str,
        path: &str,
        token: Option<&str>,
        body: Option<&str>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Deliver a device-originated MQTT message through the bridge.
    pub async fn publish_from_device(&self, topic: &str, payload: &[u8]) {
        iota_server::bridge::serve_mqtt(
            self.router.clone(),
            Arc::clone(&self.mqtt) as Arc<dyn Channel>,
            topic,
            payload,
        )
        .await;
    }
}

pub async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
}

pub async fn body_text(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8_lossy(&bytes).into_owned()
}
