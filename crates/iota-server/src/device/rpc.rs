//! Device-directed RPC with request/response correlation.
//!
//! Each call that expects an answer owns exactly one subscription on
//! the broker for its correlation topic. The subscription is removed
//! on every exit path; cancellation is covered by a drop guard.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use iota_mqtt::{Channel, Payload};
use iota_protocol::{rpc, topics};

use crate::device::mgr::DeviceManager;
use crate::error::ApiError;

impl DeviceManager {
    /// Send a JSON-RPC payload to the device.
    ///
    /// Notifications (and every call when the RPC timeout is zero) are
    /// published fire-and-forget and return `None`. Calls subscribe to
    /// the correlation topic first, publish, and await the first
    /// response up to the configured timeout.
    pub async fn rpc(&self, id: &str, raw: Vec<u8>) -> Result<Option<Vec<u8>>, ApiError> {
        let need_response =
            rpc::needs_response(&raw).map_err(|e| ApiError::BadRequest(e.to_string()))?;

        let token = self.get_token(id).await?;
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let request_topic = topics::rpc_request(&token, seq);
        let channel = Arc::clone(self.channel()?);

        if !need_response || self.rpc_timeout.is_zero() {
            channel
                .publish(&request_topic, Payload::Bytes(raw))
                .await?;
            return Ok(None);
        }

        let response_topic = topics::rpc_response(&token, seq);
        let (response_tx, response_rx) = oneshot::channel::<Vec<u8>>();

        // At most one waiter per correlation id: the first matching
        // message consumes the sender, later ones are dropped.
        let slot = Arc::new(Mutex::new(Some(response_tx)));
        let handler_slot = Arc::clone(&slot);
        channel
            .subscribe(
                &response_topic,
                Arc::new(move |_topic, payload| {
                    if let Some(tx) = handler_slot.lock().expect("rpc slot poisoned").take() {
                        let _ = tx.send(payload.to_vec());
                    }
                }),
            )
            .await?;

        let mut guard = Unsubscriber::new(Arc::clone(&channel), response_topic.clone());

        channel
            .publish(&request_topic, Payload::Bytes(raw))
            .await?;

        let outcome = tokio::time::timeout(self.rpc_timeout, response_rx).await;

        // Deterministic cleanup for the response and timeout paths;
        // the guard still covers publish errors and cancellation.
        guard.disarm();
        if let Err(e) = channel.unsubscribe(&response_topic).await {
            tracing::error!(error = %e, topic = %response_topic, "failed to remove rpc subscription");
        }

        match outcome {
            Ok(Ok(payload)) => Ok(Some(payload)),
            Ok(Err(_)) => Err(ApiError::Internal(anyhow::anyhow!(
                "rpc correlation slot dropped"
            ))),
            Err(_) => Err(ApiError::RpcTimeout(id.to_string())),
        }
    }
}

/// Removes the correlation subscription when the call is abandoned
/// before its cleanup ran (publish failure, caller cancellation).
struct Unsubscriber {
    channel: Arc<dyn Channel>,
    topic: Option<String>,
}

impl Unsubscriber {
    fn new(channel: Arc<dyn Channel>, topic: String) -> Self {
        Self {
            channel,
            topic: Some(topic),
        }
    }

    fn disarm(&mut self) {
        self.topic = None;
    }
}

impl Drop for Unsubscriber {
    fn drop(&mut self) {
        if let Some(topic) = self.topic.take() {
            let channel = Arc::clone(&self.channel);
            tokio::spawn(async move {
                if let Err(e) = channel.unsubscribe(&topic).await {
                    tracing::error!(error = %e, topic = %topic, "failed to remove rpc subscription");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;
    use crate::db::devices::DeviceStore;
    use crate::device::mgr::DeviceManagerOptions;
    use iota_mqtt::MockChannel;
    use iota_protocol::Record;
    use std::time::Duration;

    async fn manager_with(
        channel: Arc<MockChannel>,
        rpc_timeout: Duration,
    ) -> (DeviceManager, String) {
        let mgr = DeviceManager::new(
            DeviceStore::new(Store::in_memory()),
            b"device-secret-for-tests",
            Some(channel as Arc<dyn Channel>),
            DeviceManagerOptions {
                rpc_timeout,
                ..Default::default()
            },
        );
        mgr.create("pi-42", "T1", Record::new()).await.unwrap();
        (mgr, "T1".to_string())
    }

    #[tokio::test]
    async fn notification_is_fire_and_forget() {
        let channel = Arc::new(MockChannel::new());
        let (mgr, token) = manager_with(Arc::clone(&channel), Duration::from_secs(5)).await;

        let result = mgr
            .rpc("pi-42", br#"{"method":"ping"}"#.to_vec())
            .await
            .unwrap();
        assert!(result.is_none());

        let published = channel.published();
        assert_eq!(published.len(), 1);
        assert!(published[0].topic.starts_with(&format!("{token}/me/rpc/request/")));
        // No correlation subscription for notifications.
        assert!(channel.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn call_correlates_the_response() {
        let channel = Arc::new(MockChannel::new());
        let (mgr, _) = manager_with(Arc::clone(&channel), Duration::from_secs(5)).await;

        let injector = Arc::clone(&channel);
        let reply = tokio::spawn(async move {
            // Wait until the correlation subscription shows up, then
            // answer on the matching response topic.
            loop {
                if let Some(filter) = injector.subscriptions().first().cloned() {
                    let payload = br#"{"id":1,"result":"pong"}"#;
                    assert!(injector.inject(&filter, payload));
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        let result = mgr
            .rpc("pi-42", br#"{"id":1,"method":"ping"}"#.to_vec())
            .await
            .unwrap();
        reply.await.unwrap();

        assert_eq!(result.unwrap(), br#"{"id":1,"result":"pong"}"#);

        // The subscription was removed after the response arrived.
        let subscribed = channel.subscriptions();
        assert_eq!(channel.unsubscriptions(), subscribed);
    }

    #[tokio::test]
    async fn timeout_cleans_up_the_subscription() {
        let channel = Arc::new(MockChannel::new());
        let (mgr, _) = manager_with(Arc::clone(&channel), Duration::from_millis(50)).await;

        let err = mgr
            .rpc("pi-42", br#"{"id":1,"method":"ping"}"#.to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::RpcTimeout(id) if id == "pi-42"));

        let subscribed = channel.subscriptions();
        assert_eq!(subscribed.len(), 1);
        assert_eq!(channel.unsubscriptions(), subscribed);
        assert!(!channel.is_subscribed_to(&subscribed[0]));
    }

    #[tokio::test]
    async fn zero_timeout_disables_correlation() {
        let channel = Arc::new(MockChannel::new());
        let (mgr, _) = manager_with(Arc::clone(&channel), Duration::ZERO).await;

        let result = mgr
            .rpc("pi-42", br#"{"id":1,"method":"ping"}"#.to_vec())
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(channel.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn malformed_payload_is_a_bad_request() {
        let channel = Arc::new(MockChannel::new());
        let (mgr, _) = manager_with(Arc::clone(&channel), Duration::from_secs(5)).await;

        let err = mgr.rpc("pi-42", b"not json".to_vec()).await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
        assert!(channel.published().is_empty());
    }

    #[tokio::test]
    async fn sequence_ids_are_strictly_increasing() {
        let channel = Arc::new(MockChannel::new());
        let (mgr, token) = manager_with(Arc::clone(&channel), Duration::ZERO).await;

        for _ in 0..3 {
            mgr.rpc("pi-42", br#"{"id":1,"method":"ping"}"#.to_vec())
                .await
                .unwrap();
        }

        let prefix = format!("{token}/me/rpc/request/");
        let seqs: Vec<u64> = channel
            .published()
            .iter()
            .map(|m| m.topic.strip_prefix(&prefix).unwrap().parse().unwrap())
            .collect();
        assert!(seqs.windows(2).all(|w| w[1] > w[0]));
    }

    #[tokio::test]
    async fn rpc_for_unknown_device_fails() {
        let channel = Arc::new(MockChannel::new());
        let (mgr, _) = manager_with(Arc::clone(&channel), Duration::from_secs(5)).await;

        let err = mgr
            .rpc("ghost", br#"{"id":1,"method":"ping"}"#.to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::DeviceNotFound(_)));
    }
}
