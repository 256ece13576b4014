//! Codec error types.

use thiserror::Error;

/// Malformed or unsupported wire data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid packet type: {0}")]
    InvalidPacketType(u8),

    #[error("Invalid remaining length encoding")]
    InvalidRemainingLength,

    #[error("Incomplete packet: need {needed} bytes, have {have}")]
    IncompletePacket { needed: usize, have: usize },

    #[error("Packet too large: {size} bytes (max {max})")]
    PacketTooLarge { size: usize, max: usize },

    #[error("Invalid protocol name: expected 'MQTT', got '{0}'")]
    InvalidProtocolName(String),

    #[error("Unsupported protocol version: {0}")]
    UnsupportedProtocolVersion(u8),

    #[error("Invalid connect flags: {0:#04x}")]
    InvalidConnectFlags(u8),

    #[error("String too long: {len} bytes (max {max})")]
    StringTooLong { len: usize, max: usize },

    #[error("Invalid UTF-8 string")]
    InvalidUtf8,

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
