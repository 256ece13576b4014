//! Packet codec seam between the session and the wire format.

use std::io::{self, Read, Write};

use bytes::{Bytes, BytesMut};

use mqlink_core::packet::{
    decode_packet, encode_connect, encode_disconnect, encode_pingreq, encode_publish,
    encode_subscribe, encode_unsubscribe, Connect, Packet, Publish, QoS, Subscribe, Unsubscribe,
};
use mqlink_core::{ProtocolError, PROTOCOL_V311};

use crate::config::SessionConfig;
use crate::error::ClientError;

const READ_CHUNK_SIZE: usize = 4096;

/// Parameters of an outgoing CONNECT.
#[derive(Debug, Clone, Copy)]
pub struct ConnectRequest<'a> {
    pub client_id: &'a str,
    pub username: Option<&'a str>,
    pub password: Option<&'a [u8]>,
    pub keep_alive: u16,
    pub clean_session: bool,
}

/// Frames and parses control packets on a byte stream.
///
/// Writers emit exactly one complete frame per call; the session serializes
/// calls so frames never interleave. A packet that cannot be encoded is
/// reported as [`io::ErrorKind::InvalidInput`] before anything is written,
/// and the session leaves the connection up.
pub trait PacketCodec: Send + Sync {
    /// Block until one complete frame is read. Bytes beyond that frame stay
    /// in `buf` for the next call.
    fn read_frame(&self, stream: &mut dyn Read, buf: &mut BytesMut) -> Result<Packet, ClientError>;

    fn write_connect(&self, stream: &mut dyn Write, request: &ConnectRequest<'_>) -> io::Result<()>;

    fn write_subscribe(&self, stream: &mut dyn Write, topic: &str, packet_id: u16)
        -> io::Result<()>;

    fn write_unsubscribe(
        &self,
        stream: &mut dyn Write,
        topic: &str,
        packet_id: u16,
    ) -> io::Result<()>;

    /// `packet_id` is `None` for at-most-once delivery.
    fn write_publish(
        &self,
        stream: &mut dyn Write,
        topic: &str,
        payload: &[u8],
        packet_id: Option<u16>,
    ) -> io::Result<()>;

    fn write_ping(&self, stream: &mut dyn Write) -> io::Result<()>;

    fn write_disconnect(&self, stream: &mut dyn Write) -> io::Result<()>;
}

/// MQTT 3.1.1 / 5.0 codec backed by `mqlink-core`.
#[derive(Debug, Clone)]
pub struct MqttCodec {
    protocol_version: u8,
    max_packet_size: usize,
}

impl Default for MqttCodec {
    fn default() -> Self {
        Self::new(PROTOCOL_V311)
    }
}

impl MqttCodec {
    pub fn new(protocol_version: u8) -> Self {
        Self {
            protocol_version,
            max_packet_size: 0,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.protocol_version).max_packet_size(config.max_packet_size)
    }

    /// Reject inbound frames larger than `bytes` (0 = unlimited).
    pub fn max_packet_size(mut self, bytes: usize) -> Self {
        self.max_packet_size = bytes;
        self
    }

    pub fn protocol_version(&self) -> u8 {
        self.protocol_version
    }
}

impl PacketCodec for MqttCodec {
    fn read_frame(&self, stream: &mut dyn Read, buf: &mut BytesMut) -> Result<Packet, ClientError> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            if let Some((packet, consumed)) =
                decode_packet(&buf[..], self.protocol_version, self.max_packet_size)?
            {
                let _ = buf.split_to(consumed);
                return Ok(packet);
            }

            match stream.read(&mut chunk) {
                Ok(0) => return Err(ClientError::ConnectionClosed),
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ClientError::Io(e)),
            }
        }
    }

    fn write_connect(&self, stream: &mut dyn Write, request: &ConnectRequest<'_>) -> io::Result<()> {
        let connect = Connect {
            protocol_version: self.protocol_version,
            clean_session: request.clean_session,
            keep_alive: request.keep_alive,
            client_id: request.client_id.to_string(),
            username: request.username.map(str::to_string),
            password: request.password.map(<[u8]>::to_vec),
        };
        let mut buf = Vec::new();
        encode_connect(&connect, &mut buf).map_err(invalid_input)?;
        stream.write_all(&buf)
    }

    fn write_subscribe(
        &self,
        stream: &mut dyn Write,
        topic: &str,
        packet_id: u16,
    ) -> io::Result<()> {
        let subscribe = Subscribe {
            packet_id,
            topics: vec![(topic.to_string(), QoS::AtMostOnce)],
        };
        let mut buf = Vec::new();
        encode_subscribe(&subscribe, self.protocol_version, &mut buf).map_err(invalid_input)?;
        stream.write_all(&buf)
    }

    fn write_unsubscribe(
        &self,
        stream: &mut dyn Write,
        topic: &str,
        packet_id: u16,
    ) -> io::Result<()> {
        let unsubscribe = Unsubscribe {
            packet_id,
            topics: vec![topic.to_string()],
        };
        let mut buf = Vec::new();
        encode_unsubscribe(&unsubscribe, self.protocol_version, &mut buf)
            .map_err(invalid_input)?;
        stream.write_all(&buf)
    }

    fn write_publish(
        &self,
        stream: &mut dyn Write,
        topic: &str,
        payload: &[u8],
        packet_id: Option<u16>,
    ) -> io::Result<()> {
        let publish = Publish {
            dup: false,
            qos: if packet_id.is_some() {
                QoS::AtLeastOnce
            } else {
                QoS::AtMostOnce
            },
            retain: false,
            topic: topic.to_string(),
            packet_id,
            payload: Bytes::copy_from_slice(payload),
        };
        let mut buf = Vec::with_capacity(8 + topic.len() + payload.len());
        encode_publish(&publish, self.protocol_version, &mut buf).map_err(invalid_input)?;
        stream.write_all(&buf)
    }

    fn write_ping(&self, stream: &mut dyn Write) -> io::Result<()> {
        let mut buf = Vec::with_capacity(2);
        encode_pingreq(&mut buf);
        stream.write_all(&buf)
    }

    fn write_disconnect(&self, stream: &mut dyn Write) -> io::Result<()> {
        let mut buf = Vec::with_capacity(3);
        encode_disconnect(0, self.protocol_version, &mut buf);
        stream.write_all(&buf)
    }
}

fn invalid_input(err: ProtocolError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, err)
}
