//! MQTT→HTTP bridge.
//!
//! Drives the gateway event loop, dispatching broker messages either
//! to registered handlers (RPC correlation topics) or, for the
//! `api/#` namespace, into the same Axum router that serves HTTP,
//! as a synthesized request. GET responses are published back to the
//! device's response topic; POST responses are dropped.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, header};
use rumqttc::{Event, EventLoop, Packet};
use serde_json::json;
use tower::ServiceExt;

use iota_mqtt::{Channel, MqttChannel, Payload};
use iota_protocol::topics::{self, BridgeRequest};

/// Run the gateway event loop.
///
/// On a fresh broker session the bridge filter is (re)subscribed;
/// incoming publishes are first offered to registered handlers, and
/// unclaimed `api/#` traffic is served through the router, one task
/// per message.
pub async fn run(mut eventloop: EventLoop, channel: Arc<MqttChannel>, router: Router) {
    tracing::info!("mqtt bridge started");

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if !ack.session_present {
                    tracing::debug!(filter = topics::BRIDGE_FILTER, "subscribing bridge filter");
                    if let Err(e) = channel.subscribe_filter(topics::BRIDGE_FILTER).await {
                        tracing::error!(error = %e, "failed to subscribe bridge filter");
                    }
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let topic = publish.topic;
                let payload = publish.payload.to_vec();

                if channel.dispatch(&topic, &payload) {
                    continue;
                }

                if topic.starts_with("api/") {
                    let router = router.clone();
                    let publisher: Arc<dyn Channel> = Arc::clone(&channel) as Arc<dyn Channel>;
                    tokio::spawn(async move {
                        serve_mqtt(router, publisher, &topic, &payload).await;
                    });
                } else {
                    tracing::debug!(topic = %topic, "ignoring unclaimed mqtt topic");
                }
            }
            Ok(_) => {} // SubAck, PingResp, etc.
            Err(e) => {
                tracing::error!(error = %e, "mqtt event loop error, retrying in 5s");
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            }
        }
    }
}

/// Translate one bridged message into a synthesized request, run it
/// through the router, and publish the response where the grammar
/// calls for one.
pub async fn serve_mqtt(
    router: Router,
    publisher: Arc<dyn Channel>,
    topic: &str,
    payload: &[u8],
) {
    tracing::debug!(topic = %topic, len = payload.len(), "bridging mqtt message");

    let Some(request) = topics::parse_bridge_topic(topic) else {
        tracing::error!(topic = %topic, "invalid bridge topic");
        return;
    };

    match request {
        BridgeRequest::Claim { version } => {
            let request = Request::post(format!("/api/{version}/me/claim"))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(payload.to_vec()))
                .expect("claim request");
            let _ = route(router, request).await;
        }
        BridgeRequest::Post {
            version,
            token,
            path,
        } => {
            let request = Request::post(format!("/api/{version}/{path}"))
                .header(header::AUTHORIZATION, format!("bearer {token}"))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(payload.to_vec()))
                .expect("bridged post");
            // Responses for bridged POSTs are dropped.
            let _ = route(router, request).await;
        }
        BridgeRequest::Get {
            version,
            token,
            path,
            request_id,
        } => {
            let uri = match query_string(payload) {
                Ok(Some(query)) => format!("/api/{version}/{path}?{query}"),
                Ok(None) => format!("/api/{version}/{path}"),
                Err(e) => {
                    tracing::error!(error = %e, topic = %topic, "invalid query parameter payload");
                    return;
                }
            };
            let request = Request::get(uri)
                .header(header::AUTHORIZATION, format!("bearer {token}"))
                .body(Body::empty())
                .expect("bridged get");

            let (status, body) = route(router, request).await;

            let response_topic = topics::bridge_response(&token, &path, &request_id);
            let message = if status.is_success() {
                Payload::Bytes(body)
            } else {
                Payload::Json(json!({
                    "$status": status.as_u16(),
                    "$error": String::from_utf8_lossy(&body),
                }))
            };
            if let Err(e) = publisher.publish(&response_topic, message).await {
                tracing::error!(error = %e, topic = %response_topic, "failed to publish bridge response");
            }
        }
    }
}

/// A non-empty GET payload must be a flat string map, encoded as
/// query parameters.
fn query_string(payload: &[u8]) -> Result<Option<String>, serde_json::Error> {
    if payload.is_empty() {
        return Ok(None);
    }
    let params: HashMap<String, String> = serde_json::from_slice(payload)?;
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in &params {
        serializer.append_pair(key, value);
    }
    Ok(Some(serializer.finish()))
}

async fn route(router: Router, request: Request<Body>) -> (axum::http::StatusCode, Vec<u8>) {
    match router.oneshot(request).await {
        Ok(response) => {
            let status = response.status();
            let body = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .map(|b| b.to_vec())
                .unwrap_or_default();
            (status, body)
        }
        Err(never) => match never {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::build_router;
    use crate::state::AppState;
    use iota_mqtt::MockChannel;
    use iota_protocol::Record;
    use serde_json::Value;

    async fn bridged_app() -> (AppState, Router, Arc<MockChannel>) {
        let channel = Arc::new(MockChannel::new());
        let state = AppState::in_memory(Some(Arc::clone(&channel) as Arc<dyn Channel>)).await;
        let router = build_router(state.clone());
        (state, router, channel)
    }

    async fn provision(state: &AppState, id: &str) -> String {
        let token = state.devices.create_token(id).unwrap();
        state.devices.create(id, &token, Record::new()).await.unwrap();
        token
    }

    #[tokio::test]
    async fn bridged_get_publishes_the_response() {
        let (state, router, channel) = bridged_app().await;
        let token = provision(&state, "pi-42").await;

        let topic = format!("api/v1/{token}/me/attributes/request/9");
        serve_mqtt(router, channel.clone(), &topic, b"").await;

        let response_topic = format!("{token}/me/attributes/response/9");
        let published = channel.published_to(&response_topic);
        assert_eq!(published.len(), 1);

        let body: Value = serde_json::from_slice(&published[0].payload).unwrap();
        assert_eq!(body["id"], "pi-42");
        assert_eq!(body["token"], token.as_str());
    }

    #[tokio::test]
    async fn bridged_get_with_query_payload() {
        let (state, router, channel) = bridged_app().await;
        let token = provision(&state, "pi-42").await;
        state
            .devices
            .update(
                "pi-42",
                serde_json::json!({"model": "rpi4", "zone": "lab"})
                    .as_object()
                    .unwrap()
                    .clone(),
            )
            .await
            .unwrap();

        let topic = format!("api/v1/{token}/me/attributes/request/3");
        serve_mqtt(router, channel.clone(), &topic, br#"{"keys":"model"}"#).await;

        let published = channel.published_to(&format!("{token}/me/attributes/response/3"));
        let body: Value = serde_json::from_slice(&published[0].payload).unwrap();
        assert_eq!(body["model"], "rpi4");
        assert!(body.get("zone").is_none());
    }

    #[tokio::test]
    async fn bridged_get_failure_wraps_status_and_error() {
        let (_, router, channel) = bridged_app().await;

        // Bogus token: the auth middleware answers 401.
        let topic = "api/v1/BOGUS/me/attributes/request/7";
        serve_mqtt(router, channel.clone(), topic, b"").await;

        let published = channel.published_to("BOGUS/me/attributes/response/7");
        assert_eq!(published.len(), 1);
        let body: Value = serde_json::from_slice(&published[0].payload).unwrap();
        assert_eq!(body["$status"], 401);
        assert!(body.get("$error").is_some());
    }

    #[tokio::test]
    async fn invalid_query_payload_aborts_without_publishing() {
        let (state, router, channel) = bridged_app().await;
        let token = provision(&state, "pi-42").await;

        let topic = format!("api/v1/{token}/me/attributes/request/5");
        serve_mqtt(router, channel.clone(), &topic, b"[1,2,3]").await;

        assert!(
            channel
                .published_to(&format!("{token}/me/attributes/response/5"))
                .is_empty()
        );
    }

    #[tokio::test]
    async fn bridged_post_updates_and_drops_the_response() {
        let (state, router, channel) = bridged_app().await;
        let token = provision(&state, "pi-42").await;
        let publishes_before = channel.published().len();

        let topic = format!("api/v1/{token}/me/attributes");
        serve_mqtt(router, channel.clone(), &topic, br#"{"firmware":"2.0"}"#).await;

        let device = state.devices.find("pi-42", &[]).await.unwrap();
        assert_eq!(device["firmware"], "2.0");

        // Only the attribute broadcast went out, no bridge response.
        let published = channel.published();
        assert_eq!(published.len(), publishes_before + 1);
        assert_eq!(published.last().unwrap().topic, format!("{token}/me/attributes"));
    }

    #[tokio::test]
    async fn anonymous_claim_over_the_bridge() {
        let (state, router, channel) = bridged_app().await;

        serve_mqtt(
            router,
            channel.clone(),
            "api/v1/me/claim",
            br#"{"claim-id":"pi-42","model":"rpi4"}"#,
        )
        .await;

        let claims = state.devices.get_claims();
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0]["claim-id"], "pi-42");
    }

    #[tokio::test]
    async fn unknown_topic_is_ignored() {
        let (_, router, channel) = bridged_app().await;
        serve_mqtt(router, channel.clone(), "api/v1", b"x").await;
        assert!(channel.published().is_empty());
    }
}
