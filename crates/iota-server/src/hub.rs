//! WebSocket subscription hub.
//!
//! A single serializer task owns the subscriber set; registration,
//! removal, and updates all arrive on its command channel, which is
//! the only ordering guarantee the hub gives. Each connection runs a
//! reader task (drains and discards inbound frames, enforces the pong
//! deadline) and a writer task (drains the per-subscriber queue,
//! coalescing backlog into newline-delimited frames, and pings).
//!
//! A subscriber that cannot keep up (its 256-slot queue is full when
//! an update arrives) is evicted: queue closed, connection dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

/// Outbound queue capacity per subscriber.
const SEND_QUEUE: usize = 256;

/// Time allowed to write a frame to the peer.
const WRITE_WAIT: Duration = Duration::from_secs(10);

/// Time allowed between inbound frames (pong or otherwise).
const PONG_WAIT: Duration = Duration::from_secs(60);

/// Ping period; must be below `PONG_WAIT`.
const PING_PERIOD: Duration = Duration::from_secs(54);

/// Maximum inbound frame size.
const MAX_MESSAGE_SIZE: usize = 512;

/// An update fanned out to matching subscribers.
#[derive(Debug, Clone)]
pub struct Update {
    /// Message identity matched against subscriber filters.
    pub id: String,
    pub payload: serde_json::Value,
}

enum Command {
    Register {
        sub_id: u64,
        filter: String,
        queue: mpsc::Sender<Vec<u8>>,
    },
    Unregister {
        sub_id: u64,
    },
    Update(Update),
}

/// Handle to one hub; cheap to clone.
#[derive(Clone)]
pub struct Hub {
    command_tx: mpsc::UnboundedSender<Command>,
    next_sub_id: Arc<AtomicU64>,
}

impl Hub {
    pub fn new() -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        tokio::spawn(serialize(command_rx));
        Self {
            command_tx,
            next_sub_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Fan an update out to all subscribers whose filter is `"+"` or
    /// equals the update id.
    pub fn publish(&self, update: Update) {
        let _ = self.command_tx.send(Command::Update(update));
    }

    /// Upgrade the request and attach the connection as a subscriber.
    pub fn serve(&self, ws: WebSocketUpgrade, filter: String) -> Response {
        let hub = self.clone();
        ws.max_message_size(MAX_MESSAGE_SIZE)
            .on_upgrade(move |socket| hub.run_connection(socket, filter))
    }

    async fn run_connection(self, socket: WebSocket, filter: String) {
        let sub_id = self.next_sub_id.fetch_add(1, Ordering::Relaxed);
        let (queue_tx, queue_rx) = mpsc::channel(SEND_QUEUE);

        if self
            .command_tx
            .send(Command::Register {
                sub_id,
                filter,
                queue: queue_tx,
            })
            .is_err()
        {
            return;
        }

        let (sink, stream) = socket.split();
        let writer = tokio::spawn(write_pump(sink, queue_rx));

        read_pump(stream).await;

        // Unregister drops the queue sender, which ends the writer.
        let _ = self.command_tx.send(Command::Unregister { sub_id });
        let _ = writer.await;
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

struct Subscriber {
    filter: String,
    queue: mpsc::Sender<Vec<u8>>,
}

/// The serializer loop: sole owner of the subscriber set.
async fn serialize(mut command_rx: mpsc::UnboundedReceiver<Command>) {
    let mut subscribers: HashMap<u64, Subscriber> = HashMap::new();

    while let Some(command) = command_rx.recv().await {
        match command {
            Command::Register {
                sub_id,
                filter,
                queue,
            } => {
                subscribers.insert(sub_id, Subscriber { filter, queue });
            }
            Command::Unregister { sub_id } => {
                subscribers.remove(&sub_id);
            }
            Command::Update(update) => {
                if subscribers.is_empty() {
                    continue;
                }
                let data = match serde_json::to_vec(&update.payload) {
                    Ok(data) => data,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to serialize hub update");
                        continue;
                    }
                };
                subscribers.retain(|_, sub| {
                    if sub.filter != "+" && sub.filter != update.id {
                        return true;
                    }
                    match sub.queue.try_send(data.clone()) {
                        Ok(()) => true,
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            tracing::warn!(filter = %sub.filter, "evicting slow subscriber");
                            false
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => false,
                    }
                });
            }
        }
    }
}

/// Drains inbound frames; every frame resets the liveness deadline.
/// Returns on close, error, or deadline expiry.
async fn read_pump(mut stream: SplitStream<WebSocket>) {
    loop {
        match tokio::time::timeout(PONG_WAIT, stream.next()).await {
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) | Err(_) => return,
            Ok(Some(Ok(_))) => {} // discarded; pongs only feed the deadline
            Ok(Some(Err(_))) => return,
        }
    }
}

/// Writes queued updates and periodic pings. One text frame per wake,
/// with all currently-queued messages joined by newlines.
async fn write_pump(mut sink: SplitSink<WebSocket, Message>, mut queue_rx: mpsc::Receiver<Vec<u8>>) {
    let start = tokio::time::Instant::now() + PING_PERIOD;
    let mut ping = tokio::time::interval_at(start, PING_PERIOD);

    loop {
        tokio::select! {
            message = queue_rx.recv() => {
                let Some(mut frame) = message else {
                    // Hub closed the queue: say goodbye.
                    let _ = tokio::time::timeout(WRITE_WAIT, sink.send(Message::Close(None))).await;
                    return;
                };
                while let Ok(more) = queue_rx.try_recv() {
                    frame.push(b'\n');
                    frame.extend_from_slice(&more);
                }
                let text = match String::from_utf8(frame) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(error = %e, "dropping non-utf8 hub frame");
                        continue;
                    }
                };
                match tokio::time::timeout(WRITE_WAIT, sink.send(Message::Text(text.into()))).await {
                    Ok(Ok(())) => {}
                    _ => return,
                }
            }
            _ = ping.tick() => {
                match tokio::time::timeout(WRITE_WAIT, sink.send(Message::Ping(Vec::new().into()))).await {
                    Ok(Ok(())) => {}
                    _ => return,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // Register a raw subscriber on the hub without a socket, so the
    // fan-out and eviction rules can be exercised directly.
    fn attach(hub: &Hub, filter: &str) -> (u64, mpsc::Receiver<Vec<u8>>) {
        let sub_id = hub.next_sub_id.fetch_add(1, Ordering::Relaxed);
        let (queue_tx, queue_rx) = mpsc::channel(SEND_QUEUE);
        hub.command_tx
            .send(Command::Register {
                sub_id,
                filter: filter.to_string(),
                queue: queue_tx,
            })
            .unwrap();
        (sub_id, queue_rx)
    }

    fn update(id: &str, n: u64) -> Update {
        Update {
            id: id.to_string(),
            payload: json!({"id": id, "n": n}),
        }
    }

    #[tokio::test]
    async fn fan_out_respects_filters() {
        let hub = Hub::new();
        let (_, mut all) = attach(&hub, "+");
        let (_, mut only_42) = attach(&hub, "pi-42");
        let (_, mut only_43) = attach(&hub, "pi-43");

        hub.publish(update("pi-42", 1));
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(all.try_recv().is_ok());
        assert!(only_42.try_recv().is_ok());
        assert!(only_43.try_recv().is_err());
    }

    #[tokio::test]
    async fn each_update_is_delivered_once() {
        let hub = Hub::new();
        let (_, mut rx) = attach(&hub, "+");

        hub.publish(update("pi-42", 1));
        hub.publish(update("pi-42", 2));
        tokio::time::sleep(Duration::from_millis(10)).await;

        let first: serde_json::Value = serde_json::from_slice(&rx.try_recv().unwrap()).unwrap();
        let second: serde_json::Value = serde_json::from_slice(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(first["n"], 1);
        assert_eq!(second["n"], 2);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn slow_subscriber_is_evicted_and_others_survive() {
        let hub = Hub::new();
        let (_, slow_rx) = attach(&hub, "+");
        let (_, mut healthy_rx) = attach(&hub, "+");

        // The slow subscriber never reads; the healthy one drains
        // between bursts. Push well past the queue depth.
        let mut healthy_received = 0;
        for burst in 0..3 {
            for n in 0..100u64 {
                hub.publish(update("pi-42", burst * 100 + n));
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            while healthy_rx.try_recv().is_ok() {
                healthy_received += 1;
            }
        }

        // Eviction closed the slow queue after it filled up.
        let mut slow_rx = slow_rx;
        let mut slow_received = 0;
        loop {
            match slow_rx.try_recv() {
                Ok(_) => slow_received += 1,
                Err(mpsc::error::TryRecvError::Disconnected) => break,
                Err(mpsc::error::TryRecvError::Empty) => {
                    panic!("slow subscriber queue was never closed")
                }
            }
        }
        assert_eq!(slow_received, SEND_QUEUE);

        // The healthy subscriber saw every update.
        assert_eq!(healthy_received, 300);
    }

    #[tokio::test]
    async fn unregister_closes_the_queue() {
        let hub = Hub::new();
        let (sub_id, mut rx) = attach(&hub, "+");

        hub.command_tx
            .send(Command::Unregister { sub_id })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }
}
