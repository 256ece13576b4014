//! The client session: connection lifecycle, subscriptions and sends.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use log::{debug, info, trace, warn};
use parking_lot::{Condvar, Mutex};

use crate::codec::{ConnectRequest, MqttCodec, PacketCodec};
use crate::config::SessionConfig;
use crate::connection::{Connection, Connector, TcpConnector};
use crate::error::{ClientError, Result, SessionError};
use crate::handler::{DisconnectHandler, MessageHandler};
use crate::keepalive::{KeepaliveAction, KeepaliveScheduler, KeepaliveState};
use crate::packet_id::PacketIdAllocator;
use crate::pending::{PendingAcks, RequestKind};
use crate::queue::{Dispatcher, InboundEventQueue};
use crate::reader;
use crate::registry::SubscriptionRegistry;

/// How long `disconnect` waits for the write lock to send DISCONNECT.
const DISCONNECT_GRACE: Duration = Duration::from_millis(100);

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
}

/// The live connection, if any.
struct Link {
    state: SessionState,
    /// A `connect` call is opening the transport.
    connecting: bool,
    /// Bumped on every successful connect; tags everything tied to one
    /// connection so late failures from an old one are ignored.
    generation: u64,
    /// Handle used to shut the transport down.
    control: Option<Box<dyn Connection>>,
    /// Read handle, taken by the reader thread.
    reader: Option<Box<dyn Connection>>,
}

struct Writer {
    generation: u64,
    stream: Box<dyn Connection>,
}

/// State shared between the session, the reader thread and the keepalive
/// thread.
///
/// Lock order: `link`, then `keepalive`, then `writer`. The writer lock is
/// never held while taking `link`.
pub(crate) struct Shared {
    pub(crate) config: SessionConfig,
    pub(crate) codec: Arc<dyn PacketCodec>,
    link: Mutex<Link>,
    wake: Condvar,
    writer: Mutex<Option<Writer>>,
    terminating: AtomicBool,
    pub(crate) registry: SubscriptionRegistry,
    pub(crate) queue: InboundEventQueue,
    packet_ids: PacketIdAllocator,
    pub(crate) pending: PendingAcks,
    pub(crate) keepalive: Mutex<KeepaliveState>,
}

impl Shared {
    fn new(config: SessionConfig, codec: Arc<dyn PacketCodec>) -> Self {
        let queue = InboundEventQueue::new(config.max_inbound_queue);
        let keepalive = KeepaliveState::new(config.requested_keep_alive());
        Self {
            config,
            codec,
            link: Mutex::new(Link {
                state: SessionState::Disconnected,
                connecting: false,
                generation: 0,
                control: None,
                reader: None,
            }),
            wake: Condvar::new(),
            writer: Mutex::new(None),
            terminating: AtomicBool::new(false),
            registry: SubscriptionRegistry::new(),
            queue,
            packet_ids: PacketIdAllocator::new(),
            pending: PendingAcks::new(),
            keepalive: Mutex::new(keepalive),
        }
    }

    /// Park until a connection is live, then hand out its read handle.
    /// Returns `None` once the session is being torn down.
    pub(crate) fn wait_for_connection(&self) -> Option<(u64, Box<dyn Connection>)> {
        let mut link = self.link.lock();
        loop {
            if self.terminating.load(Ordering::SeqCst) {
                return None;
            }
            if link.state == SessionState::Connected {
                if let Some(stream) = link.reader.take() {
                    return Some((link.generation, stream));
                }
            }
            self.wake.wait(&mut link);
        }
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        let link = self.link.lock();
        link.state == SessionState::Connected && link.generation == generation
    }

    /// Write one frame on the connection `generation`.
    ///
    /// A packet the codec cannot encode is reported as `Encode` and leaves
    /// the connection up. Any other failed write ends that connection and
    /// reports `NotConnected`.
    fn write_frame<F>(&self, generation: u64, write: F) -> Result<()>
    where
        F: FnOnce(&dyn PacketCodec, &mut dyn Write) -> io::Result<()>,
    {
        let result = {
            let mut writer = self.writer.lock();
            match writer.as_mut() {
                Some(w) if w.generation == generation => write(self.codec.as_ref(), &mut w.stream),
                _ => return Err(SessionError::NotConnected),
            }
        };

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Err(SessionError::Encode(e)),
            Err(e) => {
                self.connection_lost(generation, &ClientError::Io(e));
                Err(SessionError::NotConnected)
            }
        }
    }

    /// Tear down connection `generation` after a transport or protocol
    /// failure and queue one disconnect notification. No-op if that
    /// connection is already gone.
    pub(crate) fn connection_lost(&self, generation: u64, err: &ClientError) {
        let mut link = self.link.lock();
        if link.state != SessionState::Connected || link.generation != generation {
            debug!("Ignoring failure of closed connection: {}", err);
            return;
        }
        info!("Connection #{} closed: {}", generation, err);
        self.teardown(&mut link, Some(err.to_string()), true);
    }

    /// Close the transport and reset per-connection state. Caller holds the
    /// link lock.
    fn teardown(&self, link: &mut Link, reason: Option<String>, notify: bool) {
        // Shutdown first so a writer blocked in send releases the write lock.
        if let Some(control) = link.control.take() {
            if let Err(e) = control.shutdown() {
                debug!("Shutdown failed: {}", e);
            }
        }
        link.reader = None;
        link.state = SessionState::Disconnected;
        *self.writer.lock() = None;

        self.registry.clear();
        self.pending.clear();
        self.queue.discard_messages();
        if notify {
            self.queue.push_disconnected(reason);
        }
        self.wake.notify_all();
    }

    /// Route a PUBLISH to its subscriber. Returns false if it was dropped.
    pub(crate) fn deliver(&self, generation: u64, topic: &str, payload: Bytes) -> bool {
        // Held across lookup and enqueue so a concurrent teardown cannot
        // slip between them.
        let link = self.link.lock();
        if link.state != SessionState::Connected || link.generation != generation {
            return false;
        }
        match self.registry.get(topic) {
            Some(handler) => self.queue.push_message(topic, payload, handler),
            None => {
                trace!("No subscription for '{}', message discarded", topic);
                false
            }
        }
    }

    /// Drop the local registration for a subscription the server refused,
    /// unless the topic has since been subscribed again.
    pub(crate) fn reject_subscription(&self, generation: u64, topic: &str, packet_id: u16) {
        let link = self.link.lock();
        if link.state == SessionState::Connected && link.generation == generation {
            self.registry.remove_if_created_by(topic, packet_id);
        }
    }

    fn keepalive_tick(&self) {
        let (generation, action) = {
            let link = self.link.lock();
            if link.state != SessionState::Connected {
                return;
            }
            let action = self
                .keepalive
                .lock()
                .poll(Instant::now(), self.config.max_missed_pings);
            (link.generation, action)
        };

        match action {
            KeepaliveAction::Nothing => {}
            KeepaliveAction::SendPing => {
                trace!("Sending PINGREQ");
                if self
                    .write_frame(generation, |codec, w| codec.write_ping(w))
                    .is_err()
                {
                    debug!("PINGREQ not sent, connection gone");
                }
            }
            KeepaliveAction::TimedOut => {
                warn!("No PINGRESP from broker, giving up on connection");
                self.connection_lost(generation, &ClientError::KeepAliveTimeout);
            }
        }
    }
}

/// A client session with one broker.
///
/// Operations may be called from any thread. Callbacks only ever run on
/// the thread that drains the [`Dispatcher`].
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use mqlink_client::{MessageHandler, Session, SessionConfig};
///
/// let session = Session::new(SessionConfig::new().keep_alive(30))?;
/// session.connect("localhost", 1883, "sensor-1", None, None)?;
///
/// let handler: Arc<dyn MessageHandler> = Arc::new(|topic: &str, payload: &[u8]| {
///     println!("{}: {}", topic, String::from_utf8_lossy(payload));
/// });
/// session.subscribe("home/temp", Arc::downgrade(&handler))?;
///
/// let dispatcher = session.dispatcher();
/// loop {
///     dispatcher.dispatch_timeout(Duration::from_millis(100));
/// }
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Session {
    shared: Arc<Shared>,
    connector: Box<dyn Connector>,
    reader: Option<JoinHandle<()>>,
    keepalive: KeepaliveScheduler,
}

impl Session {
    /// Create a session using TCP and the MQTT codec.
    pub fn new(config: SessionConfig) -> io::Result<Self> {
        let connector = TcpConnector::new(config.connect_timeout_duration());
        let codec = MqttCodec::from_config(&config);
        Self::with_parts(config, Box::new(connector), Arc::new(codec))
    }

    /// Create a session over a custom transport and codec.
    pub fn with_parts(
        config: SessionConfig,
        connector: Box<dyn Connector>,
        codec: Arc<dyn PacketCodec>,
    ) -> io::Result<Self> {
        let tick = config.tick();
        let shared = Arc::new(Shared::new(config, codec));

        let reader = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("mqlink-reader".to_string())
                .spawn(move || reader::run(shared))?
        };

        let ticker = Arc::clone(&shared);
        let keepalive = match KeepaliveScheduler::spawn(tick, move || ticker.keepalive_tick()) {
            Ok(keepalive) => keepalive,
            Err(e) => {
                stop_reader(&shared, reader);
                return Err(e);
            }
        };

        Ok(Self {
            shared,
            connector,
            reader: Some(reader),
            keepalive,
        })
    }

    /// Open a connection and send CONNECT.
    ///
    /// Returns once CONNECT is written; the CONNACK is handled by the reader
    /// thread. Every connection starts with no subscriptions and no queued
    /// messages.
    pub fn connect(
        &self,
        host: &str,
        port: u16,
        client_id: &str,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<()> {
        {
            let mut link = self.shared.link.lock();
            if link.state != SessionState::Disconnected || link.connecting {
                return Err(SessionError::AlreadyConnected);
            }
            link.connecting = true;
        }

        let result = self.open(host, port, client_id, username, password);
        self.shared.link.lock().connecting = false;
        result
    }

    fn open(
        &self,
        host: &str,
        port: u16,
        client_id: &str,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<()> {
        let shared = &self.shared;
        let control = self.connector.open(host, port)?;
        let reader = control.try_clone().map_err(SessionError::ConnectFailed)?;
        let mut writer = control.try_clone().map_err(SessionError::ConnectFailed)?;

        let request = ConnectRequest {
            client_id,
            username,
            password: password.map(str::as_bytes),
            keep_alive: shared.config.keep_alive,
            clean_session: shared.config.clean_session,
        };
        if let Err(e) = shared.codec.write_connect(&mut writer, &request) {
            if let Err(shutdown) = control.shutdown() {
                debug!("Shutdown failed: {}", shutdown);
            }
            return Err(match e.kind() {
                io::ErrorKind::InvalidInput => SessionError::Encode(e),
                _ => SessionError::ConnectFailed(e),
            });
        }

        let mut link = shared.link.lock();
        link.generation += 1;
        let generation = link.generation;

        shared.registry.clear();
        shared.pending.clear();
        shared.queue.discard_messages();
        shared
            .keepalive
            .lock()
            .reset(shared.config.requested_keep_alive(), Instant::now());
        *shared.writer.lock() = Some(Writer {
            generation,
            stream: writer,
        });

        link.control = Some(control);
        link.reader = Some(reader);
        link.state = SessionState::Connected;
        shared.wake.notify_all();

        info!(
            "Connected to {}:{} as '{}' (keep alive {}s)",
            host, port, client_id, shared.config.keep_alive
        );
        Ok(())
    }

    /// Close the connection.
    ///
    /// Subscriptions and undelivered messages are dropped. The disconnect
    /// handler is called on the next dispatch with no reason.
    pub fn disconnect(&self) -> Result<()> {
        let shared = &self.shared;
        let mut link = shared.link.lock();
        if link.state != SessionState::Connected {
            return Err(SessionError::NotConnected);
        }

        if let Some(mut writer) = shared.writer.try_lock_for(DISCONNECT_GRACE) {
            if let Some(w) = writer.as_mut().filter(|w| w.generation == link.generation) {
                if let Err(e) = shared.codec.write_disconnect(&mut w.stream) {
                    debug!("DISCONNECT not sent: {}", e);
                }
            }
        }

        shared.teardown(&mut link, None, true);
        info!("Disconnected");
        Ok(())
    }

    /// Subscribe to an exact topic at QoS 0.
    ///
    /// The handler is held weakly; keep the `Arc` alive for as long as
    /// messages should be delivered. Returns the packet identifier of the
    /// SUBSCRIBE.
    pub fn subscribe(&self, topic: &str, handler: Weak<dyn MessageHandler>) -> Result<u16> {
        if handler.strong_count() == 0 {
            return Err(SessionError::MissingHandler);
        }
        if topic.is_empty() {
            return Err(SessionError::EmptyTopic);
        }

        let shared = &self.shared;
        let (generation, packet_id) = {
            let link = shared.link.lock();
            if link.state != SessionState::Connected {
                return Err(SessionError::NotConnected);
            }
            if shared.registry.contains(topic) {
                return Err(SessionError::AlreadySubscribed(topic.to_string()));
            }
            let packet_id = shared.packet_ids.allocate();
            shared.registry.insert(topic, packet_id, handler);
            shared.pending.insert(packet_id, RequestKind::Subscribe, topic);
            (link.generation, packet_id)
        };

        if let Err(e) = shared.write_frame(generation, |codec, w| {
            codec.write_subscribe(w, topic, packet_id)
        }) {
            shared.pending.remove(packet_id);
            shared.registry.remove_if_created_by(topic, packet_id);
            return Err(e);
        }

        debug!("SUBSCRIBE '{}' (packet id {})", topic, packet_id);
        Ok(packet_id)
    }

    /// Remove the subscription for `topic`, telling the broker if connected.
    pub fn unsubscribe(&self, topic: &str) -> Result<()> {
        let shared = &self.shared;
        let request = {
            let link = shared.link.lock();
            if !shared.registry.remove(topic) {
                return Err(SessionError::NotSubscribed(topic.to_string()));
            }
            // Its SUBACK no longer has a registration to act on.
            shared.pending.remove_topic(topic, RequestKind::Subscribe);
            (link.state == SessionState::Connected).then(|| {
                let packet_id = shared.packet_ids.allocate();
                shared.pending.insert(packet_id, RequestKind::Unsubscribe, topic);
                (link.generation, packet_id)
            })
        };

        if let Some((generation, packet_id)) = request {
            match shared.write_frame(generation, |codec, w| {
                codec.write_unsubscribe(w, topic, packet_id)
            }) {
                Ok(()) => debug!("UNSUBSCRIBE '{}' (packet id {})", topic, packet_id),
                Err(e) => {
                    shared.pending.remove(packet_id);
                    debug!("UNSUBSCRIBE '{}' not sent: {}", topic, e);
                }
            }
        }
        Ok(())
    }

    /// Publish `payload` to `topic` at QoS 0.
    pub fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        let generation = {
            let link = self.shared.link.lock();
            if link.state != SessionState::Connected {
                return Err(SessionError::NotConnected);
            }
            link.generation
        };
        if topic.is_empty() {
            return Err(SessionError::EmptyTopic);
        }

        self.shared.write_frame(generation, |codec, w| {
            codec.write_publish(w, topic, payload, None)
        })?;
        trace!("PUBLISH '{}' ({} bytes)", topic, payload.len());
        Ok(())
    }

    /// True while a connection is live.
    pub fn connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Current connection state.
    pub fn state(&self) -> SessionState {
        self.shared.link.lock().state
    }

    /// Topics with an active subscription, sorted.
    pub fn subscriptions(&self) -> Vec<String> {
        self.shared.registry.topics()
    }

    /// Keep-alive interval in effect for the current connection.
    pub fn keepalive_interval(&self) -> Duration {
        self.shared.keepalive.lock().interval()
    }

    /// SUBSCRIBE/UNSUBSCRIBE requests still waiting for an ack.
    pub fn pending_acks(&self) -> usize {
        self.shared.pending.len()
    }

    /// Messages refused because the inbound queue was full.
    pub fn dropped_messages(&self) -> u64 {
        self.shared.queue.dropped()
    }

    /// Handle for draining callbacks on the consumer thread.
    pub fn dispatcher(&self) -> Dispatcher {
        self.shared.queue.dispatcher()
    }

    /// Deliver waiting events on the calling thread. Returns the number of
    /// callbacks invoked.
    pub fn dispatch_pending(&self) -> usize {
        self.shared.queue.dispatcher().dispatch_pending()
    }

    /// Set the handler called when a connection ends.
    pub fn on_disconnect(&self, handler: Weak<dyn DisconnectHandler>) {
        self.shared.queue.disconnect_slot().set(handler);
    }

    /// Remove the disconnect handler.
    pub fn clear_on_disconnect(&self) {
        self.shared.queue.disconnect_slot().clear();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        {
            let mut link = self.shared.link.lock();
            self.shared.terminating.store(true, Ordering::SeqCst);
            if link.state == SessionState::Connected {
                self.shared.teardown(&mut link, None, false);
            }
            self.shared.wake.notify_all();
        }
        self.keepalive.stop();
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                warn!("Reader thread panicked");
            }
        }
        self.shared.registry.clear();
        self.shared.queue.discard_messages();
    }
}

fn stop_reader(shared: &Shared, reader: JoinHandle<()>) {
    {
        let _link = shared.link.lock();
        shared.terminating.store(true, Ordering::SeqCst);
        shared.wake.notify_all();
    }
    if reader.join().is_err() {
        warn!("Reader thread panicked");
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;

    fn quiet_config() -> SessionConfig {
        SessionConfig::new().keep_alive(0)
    }

    #[test]
    fn test_new_session_is_disconnected() {
        let session = Session::new(quiet_config()).unwrap();
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!session.connected());
        assert!(session.subscriptions().is_empty());
    }

    #[test]
    fn test_operations_require_connection() {
        let session = Session::new(quiet_config()).unwrap();
        let handler: Arc<dyn MessageHandler> = Arc::new(|_: &str, _: &[u8]| {});

        assert_eq!(
            session.disconnect().unwrap_err().kind(),
            crate::ErrorKind::NotConnected
        );
        assert_eq!(
            session.publish("t", b"x").unwrap_err().kind(),
            crate::ErrorKind::NotConnected
        );
        assert_eq!(
            session
                .subscribe("t", Arc::downgrade(&handler))
                .unwrap_err()
                .kind(),
            crate::ErrorKind::NotConnected
        );
        assert_eq!(
            session.unsubscribe("t").unwrap_err().kind(),
            crate::ErrorKind::NotSubscribed
        );
    }

    #[test]
    fn test_subscribe_argument_checks_come_first() {
        let session = Session::new(quiet_config()).unwrap();

        let dead: Weak<dyn MessageHandler> = {
            let handler: Arc<dyn MessageHandler> = Arc::new(|_: &str, _: &[u8]| {});
            Arc::downgrade(&handler)
        };
        assert_eq!(
            session.subscribe("t", dead).unwrap_err().kind(),
            crate::ErrorKind::MissingHandler
        );

        let handler: Arc<dyn MessageHandler> = Arc::new(|_: &str, _: &[u8]| {});
        assert_eq!(
            session
                .subscribe("", Arc::downgrade(&handler))
                .unwrap_err()
                .kind(),
            crate::ErrorKind::EmptyTopic
        );
    }

    #[test]
    fn test_failed_connect_returns_to_disconnected() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let session = Session::new(quiet_config()).unwrap();

        let err = session.connect("127.0.0.1", port, "cid", None, None).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::ConnectFailed);
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_drop_joins_threads_while_connected() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let session = Session::new(quiet_config()).unwrap();
        session.connect("127.0.0.1", port, "cid", None, None).unwrap();
        let (_broker_side, _) = listener.accept().unwrap();
        assert!(session.connected());

        drop(session);
    }
}
