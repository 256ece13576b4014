//! SUBSCRIBE / UNSUBSCRIBE requests awaiting their acknowledgement.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;

/// Which request a packet identifier was spent on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Subscribe,
    Unsubscribe,
}

#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub kind: RequestKind,
    pub topic: String,
    pub sent_at: Instant,
}

/// Correlates acks with the request that carried the same packet id.
#[derive(Debug, Default)]
pub struct PendingAcks {
    requests: Mutex<HashMap<u16, PendingRequest>>,
}

impl PendingAcks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, packet_id: u16, kind: RequestKind, topic: &str) {
        self.requests.lock().insert(
            packet_id,
            PendingRequest {
                kind,
                topic: topic.to_string(),
                sent_at: Instant::now(),
            },
        );
    }

    /// Take the request matching both `packet_id` and `kind`.
    ///
    /// An entry of the other kind is left in place.
    pub fn resolve(&self, packet_id: u16, kind: RequestKind) -> Option<PendingRequest> {
        let mut requests = self.requests.lock();
        match requests.get(&packet_id) {
            Some(request) if request.kind == kind => requests.remove(&packet_id),
            _ => None,
        }
    }

    pub fn remove(&self, packet_id: u16) -> Option<PendingRequest> {
        self.requests.lock().remove(&packet_id)
    }

    /// Forget every `kind` request for `topic`. Returns how many were dropped.
    pub fn remove_topic(&self, topic: &str, kind: RequestKind) -> usize {
        let mut requests = self.requests.lock();
        let before = requests.len();
        requests.retain(|_, request| !(request.kind == kind && request.topic == topic));
        before - requests.len()
    }

    pub fn len(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.lock().is_empty()
    }

    pub fn clear(&self) {
        self.requests.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_matches_kind() {
        let pending = PendingAcks::new();
        pending.insert(7, RequestKind::Subscribe, "home/temp");

        assert!(pending.resolve(7, RequestKind::Unsubscribe).is_none());
        assert_eq!(pending.len(), 1);

        let request = pending.resolve(7, RequestKind::Subscribe).unwrap();
        assert_eq!(request.topic, "home/temp");
        assert!(pending.is_empty());
    }

    #[test]
    fn test_unknown_id() {
        let pending = PendingAcks::new();
        assert!(pending.resolve(1, RequestKind::Subscribe).is_none());
        assert!(pending.remove(1).is_none());
    }

    #[test]
    fn test_remove_topic_keeps_other_requests() {
        let pending = PendingAcks::new();
        pending.insert(1, RequestKind::Subscribe, "t");
        pending.insert(2, RequestKind::Unsubscribe, "t");
        pending.insert(3, RequestKind::Subscribe, "other");

        assert_eq!(pending.remove_topic("t", RequestKind::Subscribe), 1);
        assert!(pending.resolve(1, RequestKind::Subscribe).is_none());
        assert!(pending.resolve(2, RequestKind::Unsubscribe).is_some());
        assert!(pending.resolve(3, RequestKind::Subscribe).is_some());
    }

    #[test]
    fn test_clear() {
        let pending = PendingAcks::new();
        pending.insert(1, RequestKind::Subscribe, "a");
        pending.insert(2, RequestKind::Unsubscribe, "b");
        pending.clear();
        assert!(pending.is_empty());
    }
}
