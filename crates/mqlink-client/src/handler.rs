//! Callback surfaces invoked on the consumer context.
//!
//! The session only keeps [`Weak`] references to handlers. Whoever supplied
//! a handler owns it; once the last `Arc` is dropped the session stops
//! calling it.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;

/// Receives messages published to a subscribed topic.
pub trait MessageHandler: Send + Sync {
    fn on_message(&self, topic: &str, payload: &[u8]);
}

impl<F> MessageHandler for F
where
    F: Fn(&str, &[u8]) + Send + Sync,
{
    fn on_message(&self, topic: &str, payload: &[u8]) {
        self(topic, payload)
    }
}

/// Receives the notification that a connection ended.
///
/// `reason` is `None` for a disconnect the application asked for.
pub trait DisconnectHandler: Send + Sync {
    fn on_disconnect(&self, reason: Option<&str>);
}

impl<F> DisconnectHandler for F
where
    F: Fn(Option<&str>) + Send + Sync,
{
    fn on_disconnect(&self, reason: Option<&str>) {
        self(reason)
    }
}

/// Replaceable slot holding the per-session disconnect handler.
#[derive(Clone, Default)]
pub(crate) struct DisconnectSlot {
    inner: Arc<RwLock<Option<Weak<dyn DisconnectHandler>>>>,
}

impl DisconnectSlot {
    pub fn set(&self, handler: Weak<dyn DisconnectHandler>) {
        *self.inner.write() = Some(handler);
    }

    pub fn clear(&self) {
        *self.inner.write() = None;
    }

    /// Upgrade the current handler, if one is set and still alive.
    pub fn get(&self) -> Option<Arc<dyn DisconnectHandler>> {
        self.inner.read().as_ref().and_then(Weak::upgrade)
    }
}
