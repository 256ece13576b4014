//! Session error types.

use std::io;

use thiserror::Error;

/// Errors returned synchronously by [`Session`](crate::Session) operations.
///
/// Every variant is recoverable: fix the precondition and retry.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Already connected")]
    AlreadyConnected,

    #[error("Not connected")]
    NotConnected,

    #[error("Host not found: {host}")]
    HostNotFound { host: String },

    #[error("Connect failed: {0}")]
    ConnectFailed(#[source] io::Error),

    #[error("Message handler is missing")]
    MissingHandler,

    #[error("Already subscribed to '{0}'")]
    AlreadySubscribed(String),

    #[error("Topic must not be empty")]
    EmptyTopic,

    #[error("Not subscribed to '{0}'")]
    NotSubscribed(String),

    /// The arguments do not fit in a packet, e.g. a topic longer than
    /// 65535 bytes. Nothing was sent and the connection is unaffected.
    #[error("Cannot encode packet: {0}")]
    Encode(#[source] io::Error),
}

/// Fieldless mirror of [`SessionError`] for code-style matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    AlreadyConnected,
    NotConnected,
    HostNotFound,
    ConnectFailed,
    MissingHandler,
    AlreadySubscribed,
    EmptyTopic,
    NotSubscribed,
    Encode,
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::AlreadyConnected => ErrorKind::AlreadyConnected,
            SessionError::NotConnected => ErrorKind::NotConnected,
            SessionError::HostNotFound { .. } => ErrorKind::HostNotFound,
            SessionError::ConnectFailed(_) => ErrorKind::ConnectFailed,
            SessionError::MissingHandler => ErrorKind::MissingHandler,
            SessionError::AlreadySubscribed(_) => ErrorKind::AlreadySubscribed,
            SessionError::EmptyTopic => ErrorKind::EmptyTopic,
            SessionError::NotSubscribed(_) => ErrorKind::NotSubscribed,
            SessionError::Encode(_) => ErrorKind::Encode,
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// Failures on the connection itself, raised inside the reader and
/// keepalive threads. These never reach a caller directly; they end the
/// connection and surface as the disconnect reason.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] mqlink_core::ProtocolError),

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    #[error("Keep-alive timeout")]
    KeepAliveTimeout,

    #[error("Server disconnected (reason code {0:#04x})")]
    ServerDisconnect(u8),
}
