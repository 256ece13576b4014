//! mqlink-client - Threaded MQTT client session engine.
//!
//! A [`Session`] owns one broker connection at a time. A background reader
//! thread decodes inbound frames and a keepalive thread pings the broker;
//! messages for subscribed topics are queued and handed to your callbacks
//! on whichever thread drains the [`Dispatcher`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use mqlink_client::{DisconnectHandler, MessageHandler, Session, SessionConfig};
//!
//! let session = Session::new(SessionConfig::new().keep_alive(30))?;
//!
//! let on_disconnect: Arc<dyn DisconnectHandler> = Arc::new(|reason: Option<&str>| {
//!     eprintln!("disconnected: {}", reason.unwrap_or("requested"));
//! });
//! session.on_disconnect(Arc::downgrade(&on_disconnect));
//!
//! session.connect("localhost", 1883, "sensor-gw", None, None)?;
//!
//! let on_temp: Arc<dyn MessageHandler> = Arc::new(|topic: &str, payload: &[u8]| {
//!     println!("{} = {}", topic, String::from_utf8_lossy(payload));
//! });
//! session.subscribe("home/temp", Arc::downgrade(&on_temp))?;
//! session.publish("home/status", b"online")?;
//!
//! // Callbacks run here, never on the reader thread.
//! let dispatcher = session.dispatcher();
//! loop {
//!     dispatcher.dispatch_timeout(Duration::from_millis(100));
//! }
//! ```
//!
//! Handlers are held weakly: the session stops calling a handler once its
//! last `Arc` is dropped.

pub mod codec;
pub mod config;
pub mod connection;
mod error;
mod handler;
mod keepalive;
pub mod packet_id;
pub mod pending;
pub mod queue;
mod reader;
pub mod registry;
mod session;

pub use codec::{ConnectRequest, MqttCodec, PacketCodec};
pub use crate::config::{BrokerConfig, ConfigError, LogConfig, SessionConfig, Settings};
pub use connection::{Connection, Connector, TcpConnector};
pub use error::{ClientError, ErrorKind, Result, SessionError};
pub use handler::{DisconnectHandler, MessageHandler};
pub use queue::{Dispatcher, InboundEvent, InboundEventQueue};
pub use session::{Session, SessionState};

// Re-export useful types from core
pub use mqlink_core::packet::{Packet, QoS};
