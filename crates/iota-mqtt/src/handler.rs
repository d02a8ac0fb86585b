//! Subscription handler registry with MQTT wildcard matching.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Callback invoked with `(topic, payload)` for each matching message.
pub type MessageHandler = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Topic-filter keyed handler table shared between the gateway and its
/// event loop.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, MessageHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, filter: &str, handler: MessageHandler) {
        self.handlers
            .write()
            .expect("handler registry poisoned")
            .insert(filter.to_string(), handler);
    }

    pub fn remove(&self, filter: &str) {
        self.handlers
            .write()
            .expect("handler registry poisoned")
            .remove(filter);
    }

    pub fn contains(&self, filter: &str) -> bool {
        self.handlers
            .read()
            .expect("handler registry poisoned")
            .contains_key(filter)
    }

    /// Invoke every handler whose filter matches `topic`.
    ///
    /// Returns `true` if at least one handler ran, so the caller can
    /// fall back to a default handler for unclaimed topics.
    pub fn dispatch(&self, topic: &str, payload: &[u8]) -> bool {
        let matching: Vec<MessageHandler> = {
            let handlers = self.handlers.read().expect("handler registry poisoned");
            handlers
                .iter()
                .filter(|(filter, _)| filter_matches(filter, topic))
                .map(|(_, h)| Arc::clone(h))
                .collect()
        };
        for handler in &matching {
            handler(topic, payload);
        }
        !matching.is_empty()
    }
}

/// MQTT topic-filter matching: `+` matches one segment, `#` matches
/// the rest of the topic (and must be the last segment).
pub fn filter_matches(filter: &str, topic: &str) -> bool {
    let mut filter_parts = filter.split('/');
    let mut topic_parts = topic.split('/');

    loop {
        match (filter_parts.next(), topic_parts.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
