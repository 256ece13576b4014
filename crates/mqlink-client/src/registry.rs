//! Exact-topic subscription registry.

use std::collections::HashMap;
use std::sync::Weak;

use parking_lot::Mutex;

use crate::handler::MessageHandler;

struct Registration {
    handler: Weak<dyn MessageHandler>,
    /// Packet id of the SUBSCRIBE that created this entry.
    packet_id: u16,
}

/// Maps a topic string to the handler registered for it.
///
/// At most one handler per exact topic. Handlers are held weakly; the
/// caller keeps them alive. The lock is held only for the map operation
/// itself and never while a handler runs.
#[derive(Default)]
pub struct SubscriptionRegistry {
    topics: Mutex<HashMap<String, Registration>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `topic` under the SUBSCRIBE `packet_id`.
    /// Returns false, leaving the existing entry in place, if the topic is
    /// already registered.
    pub fn insert(&self, topic: &str, packet_id: u16, handler: Weak<dyn MessageHandler>) -> bool {
        let mut topics = self.topics.lock();
        if topics.contains_key(topic) {
            return false;
        }
        topics.insert(topic.to_string(), Registration { handler, packet_id });
        true
    }

    /// Returns false if nothing was registered for `topic`.
    pub fn remove(&self, topic: &str) -> bool {
        self.topics.lock().remove(topic).is_some()
    }

    /// Remove `topic` only if its entry was created by `packet_id`. A later
    /// subscription to the same topic is left alone.
    pub fn remove_if_created_by(&self, topic: &str, packet_id: u16) -> bool {
        let mut topics = self.topics.lock();
        match topics.get(topic) {
            Some(entry) if entry.packet_id == packet_id => topics.remove(topic).is_some(),
            _ => false,
        }
    }

    /// The handler reference for `topic`, whether or not it is still alive.
    pub fn get(&self, topic: &str) -> Option<Weak<dyn MessageHandler>> {
        self.topics.lock().get(topic).map(|entry| entry.handler.clone())
    }

    /// Packet id of the SUBSCRIBE that registered `topic`.
    pub fn packet_id(&self, topic: &str) -> Option<u16> {
        self.topics.lock().get(topic).map(|entry| entry.packet_id)
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.topics.lock().contains_key(topic)
    }

    /// Registered topics, sorted.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.topics.lock().keys().cloned().collect();
        topics.sort();
        topics
    }

    pub fn len(&self) -> usize {
        self.topics.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.lock().is_empty()
    }

    pub fn clear(&self) {
        self.topics.lock().clear();
    }

    /// Number of registrations whose handler has been dropped.
    pub fn dead_handlers(&self) -> usize {
        self.topics
            .lock()
            .values()
            .filter(|entry| entry.handler.strong_count() == 0)
            .count()
    }
}
