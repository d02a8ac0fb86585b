//! Mock channel for testing without a real broker.
//!
//! Records publishes, subscriptions, and unsubscribes, and lets tests
//! inject incoming messages into registered handlers.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::channel::{Channel, Payload};
use crate::error::MqttResult;
use crate::handler::{HandlerRegistry, MessageHandler};

/// A recorded publish call, payload already encoded.
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Mock implementation of the [`Channel`] trait.
#[derive(Default)]
pub struct MockChannel {
    published: Mutex<Vec<PublishedMessage>>,
    subscriptions: Mutex<Vec<String>>,
    unsubscriptions: Mutex<Vec<String>>,
    handlers: HandlerRegistry,
}

impl MockChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// All published messages, in order.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().unwrap().clone()
    }

    /// Published messages for one topic.
    pub fn published_to(&self, topic: &str) -> Vec<PublishedMessage> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    /// The most recent publish, if any.
    pub fn last_published(&self) -> Option<PublishedMessage> {
        self.published.lock().unwrap().last().cloned()
    }

    /// Whether a live subscription exists for `filter`.
    pub fn is_subscribed_to(&self, filter: &str) -> bool {
        self.handlers.contains(filter)
    }

    /// Filters that have been subscribed at any point.
    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().unwrap().clone()
    }

    /// Filters that have been unsubscribed.
    pub fn unsubscriptions(&self) -> Vec<String> {
        self.unsubscriptions.lock().unwrap().clone()
    }

    /// Deliver an incoming message to matching handlers, as the event
    /// loop would. Returns `false` if nothing matched.
    pub fn inject(&self, topic: &str, payload: &[u8]) -> bool {
        self.handlers.dispatch(topic, payload)
    }
}

#[async_trait]
impl Channel for MockChannel {
    async fn publish(&self, topic: &str, payload: Payload) -> MqttResult<()> {
        let payload = match payload {
            Payload::Bytes(b) => b,
            Payload::Text(s) => s.into_bytes(),
            Payload::Json(v) => serde_json::to_vec(&v).unwrap(),
        };
        self.published.lock().unwrap().push(PublishedMessage {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }

    async fn subscribe(&self, filter: &str, handler: MessageHandler) -> MqttResult<()> {
        self.subscriptions.lock().unwrap().push(filter.to_string());
        self.handlers.insert(filter, handler);
        Ok(())
    }

    async fn unsubscribe(&self, filter: &str) -> MqttResult<()> {
        self.unsubscriptions
            .lock()
            .unwrap()
            .push(filter.to_string());
        self.handlers.remove(filter);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn publish_records_encoded_payloads() {
        let mock = MockChannel::new();
        mock.publish("t/1", Payload::from(serde_json::json!({"k": "v"})))
            .await
            .unwrap();

        let msgs = mock.published_to("t/1");
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].payload, br#"{"k":"v"}"#);
    }

    #[tokio::test]
    async fn inject_reaches_subscribed_handler() {
        let mock = MockChannel::new();
        let seen: Arc<Mutex<Vec<Vec<u8>>>> = Arc::default();

        let seen2 = Arc::clone(&seen);
        mock.subscribe(
            "T/me/rpc/response/1",
            Arc::new(move |_, payload| seen2.lock().unwrap().push(payload.to_vec())),
        )
        .await
        .unwrap();

        assert!(mock.inject("T/me/rpc/response/1", b"pong"));
        assert_eq!(seen.lock().unwrap().as_slice(), [b"pong".to_vec()]);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let mock = MockChannel::new();
        mock.subscribe("t", Arc::new(|_, _| panic!("should not run")))
            .await
            .unwrap();
        mock.unsubscribe("t").await.unwrap();

        assert!(!mock.inject("t", b""));
        assert!(!mock.is_subscribed_to("t"));
        assert_eq!(mock.unsubscriptions(), ["t"]);
    }
}
