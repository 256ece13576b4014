//! Hand-off from the reader thread to the consumer context.
//!
//! The reader pushes [`InboundEvent`]s without ever blocking; the
//! application drains them through a [`Dispatcher`] on whichever thread it
//! has designated for callbacks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Weak;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, warn};

use crate::handler::{DisconnectSlot, MessageHandler};

/// Work item for the consumer context.
pub enum InboundEvent {
    /// A publish that matched a subscription when it arrived.
    Message {
        topic: String,
        payload: Bytes,
        handler: Weak<dyn MessageHandler>,
    },
    /// The connection ended. `reason` is `None` for a requested disconnect.
    Disconnected { reason: Option<String> },
}

impl std::fmt::Debug for InboundEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InboundEvent::Message { topic, payload, .. } => f
                .debug_struct("Message")
                .field("topic", topic)
                .field("payload_len", &payload.len())
                .finish(),
            InboundEvent::Disconnected { reason } => f
                .debug_struct("Disconnected")
                .field("reason", reason)
                .finish(),
        }
    }
}

/// FIFO of inbound events in wire-receipt order.
///
/// With a non-zero `max_messages` the queue refuses message events once that
/// many events are waiting and counts them as dropped. Disconnect
/// notifications are always accepted.
pub struct InboundEventQueue {
    tx: Sender<InboundEvent>,
    rx: Receiver<InboundEvent>,
    max_messages: usize,
    dropped: AtomicU64,
    on_disconnect: DisconnectSlot,
}

impl InboundEventQueue {
    /// `max_messages` of 0 means unbounded.
    pub fn new(max_messages: usize) -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            max_messages,
            dropped: AtomicU64::new(0),
            on_disconnect: DisconnectSlot::default(),
        }
    }

    /// Enqueue a message event. Returns false if it was dropped for overflow.
    pub fn push_message(
        &self,
        topic: &str,
        payload: Bytes,
        handler: Weak<dyn MessageHandler>,
    ) -> bool {
        if self.max_messages > 0 && self.rx.len() >= self.max_messages {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(
                "Inbound queue full ({} events), dropping message on '{}' ({} dropped so far)",
                self.max_messages, topic, dropped
            );
            return false;
        }
        self.send(InboundEvent::Message {
            topic: topic.to_string(),
            payload,
            handler,
        });
        true
    }

    pub fn push_disconnected(&self, reason: Option<String>) {
        self.send(InboundEvent::Disconnected { reason });
    }

    fn send(&self, event: InboundEvent) {
        // The queue owns a receiver, so the channel can never be disconnected.
        if self.tx.send(event).is_err() {
            debug!("Inbound queue closed, event discarded");
        }
    }

    /// Drop every waiting message event. Pending disconnect notifications
    /// are kept, in order. Returns the number of messages discarded.
    pub fn discard_messages(&self) -> usize {
        let mut discarded = 0;
        let mut notices = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            match event {
                InboundEvent::Message { .. } => discarded += 1,
                notice @ InboundEvent::Disconnected { .. } => notices.push(notice),
            }
        }
        for notice in notices {
            self.send(notice);
        }
        if discarded > 0 {
            debug!("Discarded {} undelivered messages", discarded);
        }
        discarded
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Message events refused because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn disconnect_slot(&self) -> &DisconnectSlot {
        &self.on_disconnect
    }

    /// A handle for the consumer context.
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher {
            rx: self.rx.clone(),
            on_disconnect: self.on_disconnect.clone(),
        }
    }
}

/// Drains the inbound queue and invokes callbacks on the calling thread.
///
/// Meant for one designated consumer context. Clones share the same queue.
#[derive(Clone)]
pub struct Dispatcher {
    rx: Receiver<InboundEvent>,
    on_disconnect: DisconnectSlot,
}

impl Dispatcher {
    /// Deliver the events waiting right now without blocking. Events that
    /// arrive while callbacks run are left for the next call.
    ///
    /// Returns the number of callbacks invoked.
    pub fn dispatch_pending(&self) -> usize {
        let waiting = self.rx.len();
        let mut invoked = 0;
        for _ in 0..waiting {
            match self.rx.try_recv() {
                Ok(event) => invoked += self.dispatch(event),
                Err(_) => break,
            }
        }
        invoked
    }

    /// Wait up to `timeout` for an event, then drain what is waiting.
    pub fn dispatch_timeout(&self, timeout: Duration) -> usize {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => self.dispatch(event) + self.dispatch_pending(),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => 0,
        }
    }

    /// Events waiting for delivery.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    fn dispatch(&self, event: InboundEvent) -> usize {
        match event {
            InboundEvent::Message {
                topic,
                payload,
                handler,
            } => match handler.upgrade() {
                Some(handler) => {
                    handler.on_message(&topic, &payload);
                    1
                }
                None => {
                    debug!("Handler for '{}' was dropped, message skipped", topic);
                    0
                }
            },
            InboundEvent::Disconnected { reason } => match self.on_disconnect.get() {
                Some(handler) => {
                    handler.on_disconnect(reason.as_deref());
                    1
                }
                None => {
                    debug!("No disconnect handler set, notification skipped");
                    0
                }
            },
        }
    }
}
