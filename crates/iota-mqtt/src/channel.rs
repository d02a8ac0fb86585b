//! Broker channel — bounded publish queue over `rumqttc::AsyncClient`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS};
use tokio::sync::mpsc;

use crate::config::MqttConfig;
use crate::error::{MqttError, MqttResult};
use crate::handler::{HandlerRegistry, MessageHandler};

/// How many outbound publishes may be queued before producers block.
const PUBLISH_QUEUE_DEPTH: usize = 100;

/// Grace period for the broker disconnect on shutdown.
const DISCONNECT_TIMEOUT: Duration = Duration::from_millis(250);

/// An outbound payload. Bytes and text are sent as-is; anything else
/// is JSON-encoded before hand-off to the queue.
#[derive(Debug, Clone)]
pub enum Payload {
    Bytes(Vec<u8>),
    Text(String),
    Json(serde_json::Value),
}

impl Payload {
    fn into_bytes(self) -> MqttResult<Vec<u8>> {
        match self {
            Payload::Bytes(b) => Ok(b),
            Payload::Text(s) => Ok(s.into_bytes()),
            Payload::Json(v) => {
                serde_json::to_vec(&v).map_err(|e| MqttError::Serialization(e.to_string()))
            }
        }
    }
}

impl From<Vec<u8>> for Payload {
    fn from(b: Vec<u8>) -> Self {
        Payload::Bytes(b)
    }
}

impl From<&[u8]> for Payload {
    fn from(b: &[u8]) -> Self {
        Payload::Bytes(b.to_vec())
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::Text(s)
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Text(s.to_string())
    }
}

impl From<serde_json::Value> for Payload {
    fn from(v: serde_json::Value) -> Self {
        Payload::Json(v)
    }
}

// ── Channel trait ─────────────────────────────────────────────

/// Abstraction over broker publish/subscribe.
///
/// Enables mocking in tests without a real MQTT broker.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Queue a payload for publication.
    async fn publish(&self, topic: &str, payload: Payload) -> MqttResult<()>;

    /// Subscribe to a filter, invoking `handler` for each message.
    async fn subscribe(&self, filter: &str, handler: MessageHandler) -> MqttResult<()>;

    /// Drop the subscription registered under `filter`.
    async fn unsubscribe(&self, filter: &str) -> MqttResult<()>;
}

// ── MqttChannel ───────────────────────────────────────────────

enum Job {
    Publish { topic: String, payload: Vec<u8> },
    Unsubscribe(String),
    Shutdown,
}

/// MQTT gateway connected to the external broker.
///
/// `new()` creates the client but does not touch the network; the
/// caller drives the returned `EventLoop` (which performs the actual
/// connect) and feeds incoming publishes to [`MqttChannel::dispatch`].
pub struct MqttChannel {
    client: AsyncClient,
    qos: QoS,
    queue_tx: mpsc::Sender<Job>,
    handlers: Arc<HandlerRegistry>,
}

impl MqttChannel {
    /// Create a channel and its event loop from the gateway config.
    ///
    /// Spawns the single drainer task that feeds queued publishes to
    /// the broker client, so this must run inside a tokio runtime.
    pub fn new(config: &MqttConfig) -> MqttResult<(Self, EventLoop)> {
        let (host, port) = config.broker_addr()?;
        let qos = config.qos_level();

        let mut options = MqttOptions::new(&config.client_id, host, port);
        options.set_clean_session(config.clean);
        if let (Some(user), Some(password)) = (&config.user, &config.password) {
            options.set_credentials(user, password);
        }

        let (client, eventloop) = AsyncClient::new(options, 64);
        let (queue_tx, queue_rx) = mpsc::channel(PUBLISH_QUEUE_DEPTH);

        tokio::spawn(drain_queue(client.clone(), qos, queue_rx));

        Ok((
            Self {
                client,
                qos,
                queue_tx,
                handlers: Arc::new(HandlerRegistry::new()),
            },
            eventloop,
        ))
    }

    /// Subscribe to a raw filter without registering a handler.
    ///
    /// Used for the bridge filter `api/#`, whose messages fall through
    /// to the default handler in the event loop.
    pub async fn subscribe_filter(&self, filter: &str) -> MqttResult<()> {
        self.client
            .subscribe(filter, self.qos)
            .await
            .map_err(|e| MqttError::Subscribe(e.to_string()))
    }

    /// Route an incoming message to registered handlers.
    ///
    /// Returns `false` when no handler claimed the topic.
    pub fn dispatch(&self, topic: &str, payload: &[u8]) -> bool {
        self.handlers.dispatch(topic, payload)
    }

    /// Drain the publish queue and disconnect from the broker.
    pub async fn close(&self) {
        let _ = self.queue_tx.send(Job::Shutdown).await;
        let _ = tokio::time::timeout(DISCONNECT_TIMEOUT, self.client.disconnect()).await;
    }
}

#[async_trait]
impl Channel for MqttChannel {
    async fn publish(&self, topic: &str, payload: Payload) -> MqttResult<()> {
        let payload = payload.into_bytes()?;
        self.queue_tx
            .send(Job::Publish {
                topic: topic.to_string(),
                payload,
            })
            .await
            .map_err(|_| MqttError::Closed)
    }

    async fn subscribe(&self, filter: &str, handler: MessageHandler) -> MqttResult<()> {
        self.handlers.insert(filter, handler);
        self.client
            .subscribe(filter, self.qos)
            .await
            .map_err(|e| MqttError::Subscribe(e.to_string()))
    }

    async fn unsubscribe(&self, filter: &str) -> MqttResult<()> {
        self.handlers.remove(filter);
        self.queue_tx
            .send(Job::Unsubscribe(filter.to_string()))
            .await
            .map_err(|_| MqttError::Closed)
    }
}

/// Single drainer: waits on each queued job and logs failures, so
/// error reporting stays serialized and producers get backpressure.
async fn drain_queue(client: AsyncClient, qos: QoS, mut queue_rx: mpsc::Receiver<Job>) {
    while let Some(job) = queue_rx.recv().await {
        match job {
            Job::Publish { topic, payload } => {
                if let Err(e) = client.publish(&topic, qos, false, payload).await {
                    tracing::error!(error = %e, topic = %topic, "failed to publish message");
                }
            }
            Job::Unsubscribe(filter) => {
                if let Err(e) = client.unsubscribe(&filter).await {
                    tracing::error!(error = %e, filter = %filter, "failed to unsubscribe");
                }
            }
            Job::Shutdown => break,
        }
    }
}
