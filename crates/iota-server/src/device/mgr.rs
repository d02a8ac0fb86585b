//! Device manager — composes the device store, the token signer, the
//! MQTT gateway, and the volatile claim registry.

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::HeaderMap;
use chrono::Utc;
use serde_json::json;
use tokio::sync::broadcast;

use iota_mqtt::{Channel, Payload};
use iota_protocol::Record;
use iota_protocol::device::{CLAIM_ID_ATTR, CLAIM_TIME_ATTR, ID_ATTR, valid_device_id};
use iota_protocol::topics;

use crate::auth::token::TokenSigner;
use crate::db::devices::DeviceStore;
use crate::error::ApiError;

#[derive(Debug, Clone)]
pub struct DeviceManagerOptions {
    /// How long a device RPC waits for its response. Zero disables
    /// correlation entirely: every call is publish-and-forget.
    pub rpc_timeout: Duration,
    /// Approve claims immediately instead of parking them for an
    /// operator.
    pub auto_approve: bool,
}

impl Default for DeviceManagerOptions {
    fn default() -> Self {
        Self {
            rpc_timeout: Duration::from_secs(5),
            auto_approve: false,
        }
    }
}

pub struct DeviceManager {
    store: DeviceStore,
    signer: TokenSigner,
    channel: Option<Arc<dyn Channel>>,
    claims: Mutex<HashMap<String, Record>>,
    pub(crate) seq: AtomicU64,
    pub(crate) rpc_timeout: Duration,
    auto_approve: bool,
    update_tx: broadcast::Sender<Record>,
}

impl DeviceManager {
    pub fn new(
        store: DeviceStore,
        secret: &[u8],
        channel: Option<Arc<dyn Channel>>,
        options: DeviceManagerOptions,
    ) -> Self {
        let (update_tx, _) = broadcast::channel(64);
        Self {
            store,
            signer: TokenSigner::new(secret, None),
            channel,
            claims: Mutex::new(HashMap::new()),
            seq: AtomicU64::new(Utc::now().timestamp_millis() as u64),
            rpc_timeout: options.rpc_timeout,
            auto_approve: options.auto_approve,
            update_tx,
        }
    }

    /// Post-image notifications for attribute changes, consumed by the
    /// subscription hub.
    pub fn subscribe_updates(&self) -> broadcast::Receiver<Record> {
        self.update_tx.subscribe()
    }

    pub(crate) fn channel(&self) -> Result<&Arc<dyn Channel>, ApiError> {
        self.channel
            .as_ref()
            .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("mqtt gateway not attached")))
    }

    // ── Tokens ────────────────────────────────────────────────

    /// Mint an access token the device uses for all further calls.
    pub fn create_token(&self, id: &str) -> Result<String, ApiError> {
        self.signer.mint(id)
    }

    pub fn verify_token(&self, token: &str) -> Result<String, ApiError> {
        self.signer.verify(token)
    }

    pub fn verify_request(&self, headers: &HeaderMap) -> Result<String, ApiError> {
        self.signer.verify_request(headers)
    }

    // ── Registry ──────────────────────────────────────────────

    pub async fn create(&self, id: &str, token: &str, attrs: Record) -> Result<(), ApiError> {
        if !valid_device_id(id) {
            return Err(ApiError::InvalidDeviceId(id.to_string()));
        }
        self.store.create(id, token, attrs).await
    }

    pub async fn find(&self, id: &str, keys: &[String]) -> Result<Record, ApiError> {
        self.store.find(id, keys).await
    }

    pub async fn find_all(&self, keys: &[String]) -> Result<Vec<Record>, ApiError> {
        self.store.find_all(keys).await
    }

    pub async fn get_token(&self, id: &str) -> Result<String, ApiError> {
        self.store.get_token(id).await
    }

    pub async fn remove(&self, id: &str) -> Result<(), ApiError> {
        self.store.remove(id).await
    }

    /// Merge attribute updates into the device document. When anything
    /// changed the device is notified on its attribute topic and the
    /// hub receives the post-image.
    pub async fn update(&self, id: &str, updates: Record) -> Result<(), ApiError> {
        let changed = self.store.update(id, updates.clone()).await?;
        if !changed {
            return Ok(());
        }

        if let Some(channel) = &self.channel {
            let token = self.store.get_token(id).await?;
            let mut message = updates;
            message.retain(|k, _| !matches!(k.as_str(), "id" | "_id" | "token" | "_token"));
            message.insert(ID_ATTR.into(), json!(id));
            channel
                .publish(
                    &topics::attributes(&token),
                    Payload::Json(serde_json::Value::Object(message)),
                )
                .await?;
        }

        let post_image = self.store.find(id, &[]).await?;
        let _ = self.update_tx.send(post_image);
        Ok(())
    }

    // ── Claim state machine ───────────────────────────────────

    /// Park a claim for operator approval (or approve it immediately
    /// when auto-approve is configured).
    pub async fn claim(&self, claim_id: &str, mut attrs: Record) -> Result<(), ApiError> {
        if !valid_device_id(claim_id) {
            return Err(ApiError::InvalidDeviceId(claim_id.to_string()));
        }

        attrs.insert(CLAIM_ID_ATTR.into(), json!(claim_id));
        attrs.insert(CLAIM_TIME_ATTR.into(), json!(Utc::now()));

        {
            let mut claims = self.claims.lock().expect("claim registry poisoned");
            if claims.contains_key(claim_id) {
                return Err(ApiError::DuplicateClaim(claim_id.to_string()));
            }
            claims.insert(claim_id.to_string(), attrs);
        }

        if self.auto_approve {
            self.approve(claim_id, Record::new()).await?;
        }
        Ok(())
    }

    pub fn get_claims(&self) -> Vec<Record> {
        self.claims
            .lock()
            .expect("claim registry poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Approve a pending claim: merge operator overrides, mint a
    /// token, upsert the device, and tell the device on its claim
    /// topic. Upsert (rather than insert) is what allows a device that
    /// lost its token to reclaim and keep its attributes.
    pub async fn approve(&self, claim_id: &str, overrides: Record) -> Result<String, ApiError> {
        let mut attrs = self
            .claims
            .lock()
            .expect("claim registry poisoned")
            .remove(claim_id)
            .ok_or_else(|| ApiError::ClaimNotFound(claim_id.to_string()))?;

        for (key, value) in overrides {
            if value.is_null() {
                attrs.remove(&key);
            } else {
                attrs.insert(key, value);
            }
        }

        attrs.remove(CLAIM_ID_ATTR);
        attrs.remove(CLAIM_TIME_ATTR);

        // The device id defaults to the claim id; the approver can
        // override it with an "id" attribute.
        let id = match attrs.get(ID_ATTR).and_then(|v| v.as_str()) {
            Some(id) => id.to_string(),
            None => claim_id.to_string(),
        };

        let token = self.create_token(&id)?;
        let result = self.store.upsert(&id, &token, attrs).await;

        let topic = topics::claim_result(claim_id);
        match result {
            Ok(()) => {
                if let Some(channel) = &self.channel {
                    channel
                        .publish(&topic, Payload::Json(json!({"token": token})))
                        .await?;
                }
                Ok(token)
            }
            Err(e) => {
                if let Some(channel) = &self.channel {
                    let _ = channel
                        .publish(&topic, Payload::Json(json!({"error": e.to_string()})))
                        .await;
                }
                Err(e)
            }
        }
    }

    /// Drop a pending claim and tell the device it was rejected.
    pub async fn reject(&self, claim_id: &str) -> Result<(), ApiError> {
        self.claims
            .lock()
            .expect("claim registry poisoned")
            .remove(claim_id)
            .ok_or_else(|| ApiError::ClaimNotFound(claim_id.to_string()))?;

        if let Some(channel) = &self.channel {
            channel
                .publish(
                    &topics::claim_result(claim_id),
                    Payload::Json(json!({"error": "Rejected"})),
                )
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;
    use iota_mqtt::MockChannel;
    use serde_json::Value;

    fn record(value: Value) -> Record {
        value.as_object().unwrap().clone()
    }

    fn manager(channel: Arc<MockChannel>) -> DeviceManager {
        DeviceManager::new(
            DeviceStore::new(Store::in_memory()),
            b"device-secret-for-tests",
            Some(channel),
            DeviceManagerOptions::default(),
        )
    }

    #[tokio::test]
    async fn token_round_trip_identifies_device() {
        let mgr = manager(Arc::new(MockChannel::new()));
        let token = mgr.create_token("pi-42").unwrap();
        assert_eq!(mgr.verify_token(&token).unwrap(), "pi-42");

        let other = mgr.create_token("pi-43").unwrap();
        assert_ne!(mgr.verify_token(&other).unwrap(), "pi-42");
    }

    #[tokio::test]
    async fn create_validates_id() {
        let mgr = manager(Arc::new(MockChannel::new()));
        let err = mgr
            .create("bad id!", "T", Record::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidDeviceId(_)));
        assert!(mgr.find("bad id!", &[]).await.is_err());
    }

    #[tokio::test]
    async fn update_broadcasts_to_device_topic() {
        let channel = Arc::new(MockChannel::new());
        let mgr = manager(Arc::clone(&channel));
        let mut updates_rx = mgr.subscribe_updates();

        mgr.create("pi-42", "T1", Record::new()).await.unwrap();
        mgr.update("pi-42", record(json!({"zone": "lab"})))
            .await
            .unwrap();

        let published = channel.published_to("T1/me/attributes");
        assert_eq!(published.len(), 1);
        let body: Value = serde_json::from_slice(&published[0].payload).unwrap();
        assert_eq!(body["id"], "pi-42");
        assert_eq!(body["zone"], "lab");

        let post_image = updates_rx.try_recv().unwrap();
        assert_eq!(post_image["id"], "pi-42");
        assert_eq!(post_image["zone"], "lab");
        assert_eq!(post_image["token"], "T1");
    }

    #[tokio::test]
    async fn empty_update_publishes_nothing() {
        let channel = Arc::new(MockChannel::new());
        let mgr = manager(Arc::clone(&channel));
        mgr.create("pi-42", "T1", Record::new()).await.unwrap();

        mgr.update("pi-42", record(json!({"id": "spoof"})))
            .await
            .unwrap();
        assert!(channel.published().is_empty());
    }

    #[tokio::test]
    async fn claim_approve_lifecycle() {
        let channel = Arc::new(MockChannel::new());
        let mgr = manager(Arc::clone(&channel));

        mgr.claim("pi-42", record(json!({"model": "rpi4"})))
            .await
            .unwrap();

        let claims = mgr.get_claims();
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0]["claim-id"], "pi-42");
        assert_eq!(claims[0]["model"], "rpi4");
        assert!(claims[0].contains_key("claim-time"));

        let token = mgr.approve("pi-42", Record::new()).await.unwrap();
        assert!(mgr.get_claims().is_empty());

        let device = mgr.find("pi-42", &[]).await.unwrap();
        assert_eq!(device["id"], "pi-42");
        assert_eq!(device["token"], token.as_str());
        assert_eq!(device["model"], "rpi4");
        assert!(!device.contains_key("claim-id"));
        assert!(!device.contains_key("claim-time"));

        let published = channel.published_to("me/claim/pi-42");
        assert_eq!(published.len(), 1);
        let body: Value = serde_json::from_slice(&published[0].payload).unwrap();
        assert_eq!(body["token"], token.as_str());
    }

    #[tokio::test]
    async fn duplicate_claim_conflicts() {
        let mgr = manager(Arc::new(MockChannel::new()));
        mgr.claim("pi-42", Record::new()).await.unwrap();
        let err = mgr.claim("pi-42", Record::new()).await.unwrap_err();
        assert!(matches!(err, ApiError::DuplicateClaim(_)));
    }

    #[tokio::test]
    async fn approve_honors_overrides_and_id_rename() {
        let mgr = manager(Arc::new(MockChannel::new()));
        mgr.claim("tmp-1", record(json!({"model": "rpi4", "rack": "b2"})))
            .await
            .unwrap();

        mgr.approve("tmp-1", record(json!({"id": "pi-99", "rack": null, "zone": "lab"})))
            .await
            .unwrap();

        let device = mgr.find("pi-99", &[]).await.unwrap();
        assert_eq!(device["model"], "rpi4");
        assert_eq!(device["zone"], "lab");
        assert!(!device.contains_key("rack"));
        assert!(mgr.find("tmp-1", &[]).await.is_err());
    }

    #[tokio::test]
    async fn reclaim_preserves_attributes() {
        let mgr = manager(Arc::new(MockChannel::new()));
        mgr.claim("pi-42", record(json!({"model": "rpi4"})))
            .await
            .unwrap();
        let first = mgr.approve("pi-42", Record::new()).await.unwrap();

        // The device lost its token and claims again.
        mgr.claim("pi-42", Record::new()).await.unwrap();
        let second = mgr.approve("pi-42", Record::new()).await.unwrap();
        assert_ne!(first, second);

        let device = mgr.find("pi-42", &[]).await.unwrap();
        assert_eq!(device["model"], "rpi4");
        assert_eq!(device["token"], second.as_str());
        assert_eq!(mgr.get_token("pi-42").await.unwrap(), second);
    }

    #[tokio::test]
    async fn reject_drops_claim_and_notifies() {
        let channel = Arc::new(MockChannel::new());
        let mgr = manager(Arc::clone(&channel));
        mgr.claim("pi-42", Record::new()).await.unwrap();

        mgr.reject("pi-42").await.unwrap();
        assert!(mgr.get_claims().is_empty());
        assert!(matches!(
            mgr.reject("pi-42").await.unwrap_err(),
            ApiError::ClaimNotFound(_)
        ));

        let published = channel.published_to("me/claim/pi-42");
        let body: Value = serde_json::from_slice(&published[0].payload).unwrap();
        assert_eq!(body["error"], "Rejected");
    }

    #[tokio::test]
    async fn auto_approve_skips_the_pending_phase() {
        let channel = Arc::new(MockChannel::new());
        let mgr = DeviceManager::new(
            DeviceStore::new(Store::in_memory()),
            b"device-secret-for-tests",
            Some(Arc::clone(&channel) as Arc<dyn Channel>),
            DeviceManagerOptions {
                auto_approve: true,
                ..Default::default()
            },
        );

        mgr.claim("pi-42", record(json!({"model": "rpi4"})))
            .await
            .unwrap();
        assert!(mgr.get_claims().is_empty());

        let device = mgr.find("pi-42", &[]).await.unwrap();
        assert_eq!(device["model"], "rpi4");
        assert_eq!(channel.published_to("me/claim/pi-42").len(), 1);
    }
}
