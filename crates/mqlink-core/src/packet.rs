//! MQTT control packets and their wire codec.
//!
//! Covers every packet a client session sends or receives under MQTT 3.1.1
//! (protocol level 4) and MQTT 5.0 (protocol level 5). MQTT 5 property
//! blocks are walked by property type; only Server Keep Alive is surfaced,
//! everything else is skipped.

use bytes::Bytes;

use crate::error::{ProtocolError, Result};
use crate::varint;

/// Protocol level for MQTT 3.1.1.
pub const PROTOCOL_V311: u8 = 4;
/// Protocol level for MQTT 5.0.
pub const PROTOCOL_V5: u8 = 5;

/// Longest UTF-8 string or binary field a packet can carry.
pub const MAX_STRING_LEN: usize = u16::MAX as usize;

/// Largest remaining length a fixed header can declare.
pub const MAX_REMAINING_LENGTH: usize = varint::MAX_VALUE as usize;

/// SUBACK return code signalling a rejected topic filter.
pub const SUBACK_FAILURE: u8 = 0x80;

const PROP_SERVER_KEEP_ALIVE: u32 = 0x13;

/// MQTT Control Packet Types (4 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Connect = 1,
    Connack = 2,
    Publish = 3,
    Puback = 4,
    Pubrec = 5,
    Pubrel = 6,
    Pubcomp = 7,
    Subscribe = 8,
    Suback = 9,
    Unsubscribe = 10,
    Unsuback = 11,
    Pingreq = 12,
    Pingresp = 13,
    Disconnect = 14,
    Auth = 15,
}

impl TryFrom<u8> for PacketType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            1 => PacketType::Connect,
            2 => PacketType::Connack,
            3 => PacketType::Publish,
            4 => PacketType::Puback,
            5 => PacketType::Pubrec,
            6 => PacketType::Pubrel,
            7 => PacketType::Pubcomp,
            8 => PacketType::Subscribe,
            9 => PacketType::Suback,
            10 => PacketType::Unsubscribe,
            11 => PacketType::Unsuback,
            12 => PacketType::Pingreq,
            13 => PacketType::Pingresp,
            14 => PacketType::Disconnect,
            15 => PacketType::Auth,
            _ => return Err(ProtocolError::InvalidPacketType(value)),
        })
    }
}

/// Quality of Service levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
#[allow(clippy::enum_variant_names)] // MQTT names
pub enum QoS {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl TryFrom<u8> for QoS {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            _ => Err(ProtocolError::MalformedPacket(format!(
                "Invalid QoS: {}",
                value
            ))),
        }
    }
}

/// CONNACK return codes (MQTT 3.1.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnackCode {
    Accepted = 0,
    UnacceptableProtocolVersion = 1,
    IdentifierRejected = 2,
    ServerUnavailable = 3,
    BadUsernamePassword = 4,
    NotAuthorized = 5,
}

impl TryFrom<u8> for ConnackCode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0 => ConnackCode::Accepted,
            1 => ConnackCode::UnacceptableProtocolVersion,
            2 => ConnackCode::IdentifierRejected,
            3 => ConnackCode::ServerUnavailable,
            4 => ConnackCode::BadUsernamePassword,
            5 => ConnackCode::NotAuthorized,
            _ => {
                return Err(ProtocolError::MalformedPacket(format!(
                    "Invalid CONNACK return code: {}",
                    value
                )))
            }
        })
    }
}

/// MQTT Packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Connect),
    Connack(Connack),
    Publish(Publish),
    Puback { packet_id: u16 },
    Pubrec { packet_id: u16 },
    Pubrel { packet_id: u16 },
    Pubcomp { packet_id: u16 },
    Subscribe(Subscribe),
    Suback(Suback),
    Unsubscribe(Unsubscribe),
    Unsuback(Unsuback),
    Pingreq,
    Pingresp,
    /// DISCONNECT with its reason code (always 0x00 under 3.1.1).
    Disconnect { reason_code: u8 },
}

impl Packet {
    /// The control packet type of this packet.
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Connect(_) => PacketType::Connect,
            Packet::Connack(_) => PacketType::Connack,
            Packet::Publish(_) => PacketType::Publish,
            Packet::Puback { .. } => PacketType::Puback,
            Packet::Pubrec { .. } => PacketType::Pubrec,
            Packet::Pubrel { .. } => PacketType::Pubrel,
            Packet::Pubcomp { .. } => PacketType::Pubcomp,
            Packet::Subscribe(_) => PacketType::Subscribe,
            Packet::Suback(_) => PacketType::Suback,
            Packet::Unsubscribe(_) => PacketType::Unsubscribe,
            Packet::Unsuback(_) => PacketType::Unsuback,
            Packet::Pingreq => PacketType::Pingreq,
            Packet::Pingresp => PacketType::Pingresp,
            Packet::Disconnect { .. } => PacketType::Disconnect,
        }
    }
}

/// CONNECT packet data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    pub protocol_version: u8,
    pub clean_session: bool,
    pub keep_alive: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
}

/// CONNACK packet data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connack {
    pub session_present: bool,
    /// 3.1.1 return code or 5.0 reason code; 0 means accepted.
    pub code: u8,
    /// Server Keep Alive property (MQTT 5 only).
    pub server_keep_alive: Option<u16>,
}

impl Connack {
    pub fn is_accepted(&self) -> bool {
        self.code == 0
    }
}

/// PUBLISH packet data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
    pub topic: String,
    pub packet_id: Option<u16>,
    pub payload: Bytes,
}

/// SUBSCRIBE packet data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe {
    pub packet_id: u16,
    pub topics: Vec<(String, QoS)>,
}

/// SUBACK packet data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suback {
    pub packet_id: u16,
    /// One per requested filter: granted QoS, or >= 0x80 on failure.
    pub return_codes: Vec<u8>,
}

/// UNSUBSCRIBE packet data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsubscribe {
    pub packet_id: u16,
    pub topics: Vec<String>,
}

/// UNSUBACK packet data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsuback {
    pub packet_id: u16,
    /// MQTT 5 only; empty under 3.1.1.
    pub reason_codes: Vec<u8>,
}

#[derive(Debug, Default)]
struct Properties {
    server_keep_alive: Option<u16>,
}

/// Cursor over one packet body.
struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(ProtocolError::IncompletePacket {
                needed: len,
                have: self.remaining(),
            });
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_varint(&mut self) -> Result<u32> {
        match varint::decode(&self.buf[self.pos..])? {
            Some((value, consumed)) => {
                self.pos += consumed;
                Ok(value)
            }
            None => Err(ProtocolError::IncompletePacket {
                needed: 1,
                have: 0,
            }),
        }
    }

    fn read_string(&mut self) -> Result<String> {
        let len = self.read_u16()? as usize;
        let bytes = self.read_bytes(len)?;
        // MQTT-1.5.3-2: no U+0000 in UTF-8 strings
        if bytes.contains(&0u8) {
            return Err(ProtocolError::MalformedPacket(
                "UTF-8 string must not contain null character".into(),
            ));
        }
        String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
    }

    fn read_binary(&mut self) -> Result<Vec<u8>> {
        let len = self.read_u16()? as usize;
        Ok(self.read_bytes(len)?.to_vec())
    }

    fn read_packet_id(&mut self) -> Result<u16> {
        let id = self.read_u16()?;
        if id == 0 {
            return Err(ProtocolError::MalformedPacket(
                "Packet identifier must be non-zero".into(),
            ));
        }
        Ok(id)
    }

    /// Walk an MQTT 5 property block.
    fn read_properties(&mut self) -> Result<Properties> {
        let len = self.read_varint()? as usize;
        if self.remaining() < len {
            return Err(ProtocolError::IncompletePacket {
                needed: len,
                have: self.remaining(),
            });
        }
        let end = self.pos + len;
        let mut props = Properties::default();

        while self.pos < end {
            let id = self.read_varint()?;
            match id {
                PROP_SERVER_KEEP_ALIVE => props.server_keep_alive = Some(self.read_u16()?),
                0x01 | 0x17 | 0x19 | 0x24 | 0x25 | 0x28 | 0x29 | 0x2A => {
                    self.read_u8()?;
                }
                0x21 | 0x22 | 0x23 => {
                    self.read_u16()?;
                }
                0x02 | 0x11 | 0x18 | 0x27 => {
                    self.read_u32()?;
                }
                0x0B => {
                    self.read_varint()?;
                }
                0x03 | 0x08 | 0x12 | 0x15 | 0x1A | 0x1C | 0x1F => {
                    self.read_string()?;
                }
                0x09 | 0x16 => {
                    self.read_binary()?;
                }
                0x26 => {
                    self.read_string()?;
                    self.read_string()?;
                }
                _ => {
                    return Err(ProtocolError::MalformedPacket(format!(
                        "Unknown property: 0x{:02x}",
                        id
                    )))
                }
            }
        }

        if self.pos != end {
            return Err(ProtocolError::MalformedPacket(
                "Property overruns its declared length".into(),
            ));
        }
        Ok(props)
    }
}

/// Try to decode one complete packet from the front of `buf`.
///
/// Returns `Ok(Some((packet, bytes_consumed)))` on success and `Ok(None)`
/// when more bytes are needed. `max_packet_size` of 0 disables the size check.
pub fn decode_packet(
    buf: &[u8],
    protocol_version: u8,
    max_packet_size: usize,
) -> Result<Option<(Packet, usize)>> {
    if buf.is_empty() {
        return Ok(None);
    }

    let fixed_header = buf[0];
    let flags = fixed_header & 0x0F;

    let Some((remaining_len, len_bytes)) = varint::decode(&buf[1..])? else {
        return Ok(None);
    };

    let header_len = 1 + len_bytes;
    let total_len = header_len + remaining_len as usize;

    if max_packet_size > 0 && total_len > max_packet_size {
        return Err(ProtocolError::PacketTooLarge {
            size: total_len,
            max: max_packet_size,
        });
    }

    if buf.len() < total_len {
        return Ok(None);
    }

    let packet_type = PacketType::try_from(fixed_header >> 4)?;

    // MQTT-2.2.2-1: reserved flag bits
    let expected_flags = match packet_type {
        PacketType::Publish => flags,
        PacketType::Subscribe | PacketType::Unsubscribe | PacketType::Pubrel => 0x02,
        _ => 0x00,
    };
    if flags != expected_flags {
        return Err(ProtocolError::MalformedPacket(format!(
            "{:?} fixed header flags must be {:#04x}, got {:#04x}",
            packet_type, expected_flags, flags
        )));
    }

    let body = &buf[header_len..total_len];
    let v5 = protocol_version == PROTOCOL_V5;

    let packet = match packet_type {
        PacketType::Connect => decode_connect(body)?,
        PacketType::Connack => decode_connack(body, v5)?,
        PacketType::Publish => decode_publish(flags, body, v5)?,
        PacketType::Puback => Packet::Puback {
            packet_id: decode_ack_id(body)?,
        },
        PacketType::Pubrec => Packet::Pubrec {
            packet_id: decode_ack_id(body)?,
        },
        PacketType::Pubrel => Packet::Pubrel {
            packet_id: decode_ack_id(body)?,
        },
        PacketType::Pubcomp => Packet::Pubcomp {
            packet_id: decode_ack_id(body)?,
        },
        PacketType::Subscribe => decode_subscribe(body, v5)?,
        PacketType::Suback => decode_suback(body, v5)?,
        PacketType::Unsubscribe => decode_unsubscribe(body, v5)?,
        PacketType::Unsuback => decode_unsuback(body, v5)?,
        PacketType::Pingreq => Packet::Pingreq,
        PacketType::Pingresp => Packet::Pingresp,
        PacketType::Disconnect => decode_disconnect(body, v5)?,
        PacketType::Auth => {
            return Err(ProtocolError::MalformedPacket(
                "AUTH packets are not supported".into(),
            ))
        }
    };

    Ok(Some((packet, total_len)))
}

fn decode_connect(body: &[u8]) -> Result<Packet> {
    let mut dec = Decoder::new(body);

    let protocol_name = dec.read_string()?;
    if protocol_name != "MQTT" && protocol_name != "MQIsdp" {
        return Err(ProtocolError::InvalidProtocolName(protocol_name));
    }

    let protocol_version = dec.read_u8()?;
    if !(3..=5).contains(&protocol_version) {
        return Err(ProtocolError::UnsupportedProtocolVersion(protocol_version));
    }
    let v5 = protocol_version == PROTOCOL_V5;

    let flags = dec.read_u8()?;
    if flags & 0x01 != 0 {
        return Err(ProtocolError::InvalidConnectFlags(flags));
    }
    let clean_session = flags & 0x02 != 0;
    let will_flag = flags & 0x04 != 0;
    let password_flag = flags & 0x40 != 0;
    let username_flag = flags & 0x80 != 0;

    let keep_alive = dec.read_u16()?;
    if v5 {
        dec.read_properties()?;
    }

    let client_id = dec.read_string()?;

    // Will fields are parsed for framing only; a session never sends one.
    if will_flag {
        if v5 {
            dec.read_properties()?;
        }
        dec.read_string()?;
        dec.read_binary()?;
    }

    let username = if username_flag {
        Some(dec.read_string()?)
    } else {
        None
    };
    let password = if password_flag {
        Some(dec.read_binary()?)
    } else {
        None
    };

    Ok(Packet::Connect(Connect {
        protocol_version,
        clean_session,
        keep_alive,
        client_id,
        username,
        password,
    }))
}

fn decode_connack(body: &[u8], v5: bool) -> Result<Packet> {
    let mut dec = Decoder::new(body);

    let ack_flags = dec.read_u8()?;
    if ack_flags & 0xFE != 0 {
        return Err(ProtocolError::MalformedPacket(format!(
            "CONNACK reserved flags set: {:#04x}",
            ack_flags
        )));
    }
    let code = dec.read_u8()?;

    let server_keep_alive = if v5 && dec.remaining() > 0 {
        dec.read_properties()?.server_keep_alive
    } else {
        None
    };

    Ok(Packet::Connack(Connack {
        session_present: ack_flags & 0x01 != 0,
        code,
        server_keep_alive,
    }))
}

fn decode_publish(flags: u8, body: &[u8], v5: bool) -> Result<Packet> {
    let qos = QoS::try_from((flags >> 1) & 0x03)?;
    let mut dec = Decoder::new(body);

    let topic = dec.read_string()?;
    let packet_id = match qos {
        QoS::AtMostOnce => None,
        _ => Some(dec.read_packet_id()?),
    };
    if v5 {
        dec.read_properties()?;
    }
    let payload = dec.read_bytes(dec.remaining())?;

    Ok(Packet::Publish(Publish {
        dup: flags & 0x08 != 0,
        qos,
        retain: flags & 0x01 != 0,
        topic,
        packet_id,
        payload: Bytes::copy_from_slice(payload),
    }))
}

/// PUBACK/PUBREC/PUBREL/PUBCOMP: packet id, then (MQTT 5) an optional
/// reason code and properties that a QoS 0 session has no use for.
fn decode_ack_id(body: &[u8]) -> Result<u16> {
    Decoder::new(body).read_packet_id()
}

fn decode_subscribe(body: &[u8], v5: bool) -> Result<Packet> {
    let mut dec = Decoder::new(body);
    let packet_id = dec.read_packet_id()?;
    if v5 {
        dec.read_properties()?;
    }

    let mut topics = Vec::new();
    while dec.remaining() > 0 {
        let topic = dec.read_string()?;
        if topic.is_empty() {
            return Err(ProtocolError::MalformedPacket(
                "Topic filter must be at least 1 character".into(),
            ));
        }
        let options = dec.read_u8()?;
        topics.push((topic, QoS::try_from(options & 0x03)?));
    }

    if topics.is_empty() {
        return Err(ProtocolError::MalformedPacket(
            "SUBSCRIBE with no topics".into(),
        ));
    }

    Ok(Packet::Subscribe(Subscribe { packet_id, topics }))
}

fn decode_suback(body: &[u8], v5: bool) -> Result<Packet> {
    let mut dec = Decoder::new(body);
    let packet_id = dec.read_packet_id()?;
    if v5 {
        dec.read_properties()?;
    }
    let return_codes = dec.read_bytes(dec.remaining())?.to_vec();
    if return_codes.is_empty() {
        return Err(ProtocolError::MalformedPacket(
            "SUBACK with no return codes".into(),
        ));
    }
    Ok(Packet::Suback(Suback {
        packet_id,
        return_codes,
    }))
}

fn decode_unsubscribe(body: &[u8], v5: bool) -> Result<Packet> {
    let mut dec = Decoder::new(body);
    let packet_id = dec.read_packet_id()?;
    if v5 {
        dec.read_properties()?;
    }

    let mut topics = Vec::new();
    while dec.remaining() > 0 {
        topics.push(dec.read_string()?);
    }
    if topics.is_empty() {
        return Err(ProtocolError::MalformedPacket(
            "UNSUBSCRIBE with no topics".into(),
        ));
    }

    Ok(Packet::Unsubscribe(Unsubscribe { packet_id, topics }))
}

fn decode_unsuback(body: &[u8], v5: bool) -> Result<Packet> {
    let mut dec = Decoder::new(body);
    let packet_id = dec.read_packet_id()?;
    let reason_codes = if v5 {
        dec.read_properties()?;
        dec.read_bytes(dec.remaining())?.to_vec()
    } else {
        Vec::new()
    };
    Ok(Packet::Unsuback(Unsuback {
        packet_id,
        reason_codes,
    }))
}

fn decode_disconnect(body: &[u8], v5: bool) -> Result<Packet> {
    if !v5 || body.is_empty() {
        return Ok(Packet::Disconnect { reason_code: 0x00 });
    }
    let mut dec = Decoder::new(body);
    let reason_code = dec.read_u8()?;
    if dec.remaining() > 0 {
        dec.read_properties()?;
    }
    Ok(Packet::Disconnect { reason_code })
}

// === Encoding ===

/// Encode any packet for the given protocol level.
///
/// Nothing is appended to `buf` when the packet cannot be represented.
pub fn encode_packet(packet: &Packet, protocol_version: u8, buf: &mut Vec<u8>) -> Result<()> {
    match packet {
        Packet::Connect(connect) => encode_connect(connect, buf),
        Packet::Connack(connack) => encode_connack(connack, protocol_version, buf),
        Packet::Publish(publish) => encode_publish(publish, protocol_version, buf),
        Packet::Puback { packet_id } => {
            encode_ack(PacketType::Puback, *packet_id, buf);
            Ok(())
        }
        Packet::Pubrec { packet_id } => {
            encode_ack(PacketType::Pubrec, *packet_id, buf);
            Ok(())
        }
        Packet::Pubrel { packet_id } => {
            encode_ack(PacketType::Pubrel, *packet_id, buf);
            Ok(())
        }
        Packet::Pubcomp { packet_id } => {
            encode_ack(PacketType::Pubcomp, *packet_id, buf);
            Ok(())
        }
        Packet::Subscribe(subscribe) => encode_subscribe(subscribe, protocol_version, buf),
        Packet::Suback(suback) => encode_suback(suback, protocol_version, buf),
        Packet::Unsubscribe(unsubscribe) => {
            encode_unsubscribe(unsubscribe, protocol_version, buf)
        }
        Packet::Unsuback(unsuback) => encode_unsuback(unsuback, protocol_version, buf),
        Packet::Pingreq => {
            encode_pingreq(buf);
            Ok(())
        }
        Packet::Pingresp => {
            encode_pingresp(buf);
            Ok(())
        }
        Packet::Disconnect { reason_code } => {
            encode_disconnect(*reason_code, protocol_version, buf);
            Ok(())
        }
    }
}

fn put_str(buf: &mut Vec<u8>, value: &str) -> Result<()> {
    put_bin(buf, value.as_bytes())
}

fn put_bin(buf: &mut Vec<u8>, value: &[u8]) -> Result<()> {
    let len = u16::try_from(value.len()).map_err(|_| ProtocolError::StringTooLong {
        len: value.len(),
        max: MAX_STRING_LEN,
    })?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(value);
    Ok(())
}

/// Write the fixed header for `body` followed by the body itself.
fn finish(first_byte: u8, body: &[u8], buf: &mut Vec<u8>) -> Result<()> {
    let too_large = || ProtocolError::PacketTooLarge {
        size: body.len(),
        max: MAX_REMAINING_LENGTH,
    };
    let len = u32::try_from(body.len()).map_err(|_| too_large())?;
    if len > varint::MAX_VALUE {
        return Err(too_large());
    }
    buf.push(first_byte);
    varint::encode(len, buf)?;
    buf.extend_from_slice(body);
    Ok(())
}

/// Encode a CONNECT packet. MQTT 5 CONNECTs carry an empty property block.
pub fn encode_connect(connect: &Connect, buf: &mut Vec<u8>) -> Result<()> {
    let mut body = Vec::with_capacity(32 + connect.client_id.len());
    put_str(&mut body, "MQTT")?;
    body.push(connect.protocol_version);

    let mut flags = 0u8;
    if connect.clean_session {
        flags |= 0x02;
    }
    if connect.password.is_some() {
        flags |= 0x40;
    }
    if connect.username.is_some() {
        flags |= 0x80;
    }
    body.push(flags);
    body.extend_from_slice(&connect.keep_alive.to_be_bytes());

    if connect.protocol_version == PROTOCOL_V5 {
        body.push(0);
    }

    put_str(&mut body, &connect.client_id)?;
    if let Some(ref username) = connect.username {
        put_str(&mut body, username)?;
    }
    if let Some(ref password) = connect.password {
        put_bin(&mut body, password)?;
    }

    finish((PacketType::Connect as u8) << 4, &body, buf)
}

/// Encode a CONNACK packet (broker side; used by test brokers).
pub fn encode_connack(connack: &Connack, protocol_version: u8, buf: &mut Vec<u8>) -> Result<()> {
    let mut body = vec![u8::from(connack.session_present), connack.code];
    if protocol_version == PROTOCOL_V5 {
        let mut props = Vec::new();
        if let Some(keep_alive) = connack.server_keep_alive {
            props.push(PROP_SERVER_KEEP_ALIVE as u8);
            props.extend_from_slice(&keep_alive.to_be_bytes());
        }
        varint::encode(props.len() as u32, &mut body)?;
        body.extend_from_slice(&props);
    }
    finish((PacketType::Connack as u8) << 4, &body, buf)
}

/// Encode a PUBLISH packet.
pub fn encode_publish(publish: &Publish, protocol_version: u8, buf: &mut Vec<u8>) -> Result<()> {
    let mut first = (PacketType::Publish as u8) << 4;
    if publish.dup {
        first |= 0x08;
    }
    first |= (publish.qos as u8) << 1;
    if publish.retain {
        first |= 0x01;
    }

    let mut body = Vec::with_capacity(2 + publish.topic.len() + 3 + publish.payload.len());
    put_str(&mut body, &publish.topic)?;
    if publish.qos != QoS::AtMostOnce {
        if let Some(id) = publish.packet_id {
            body.extend_from_slice(&id.to_be_bytes());
        }
    }
    if protocol_version == PROTOCOL_V5 {
        body.push(0);
    }
    body.extend_from_slice(&publish.payload);

    finish(first, &body, buf)
}

/// Encode a PUBACK, PUBREC, PUBREL or PUBCOMP.
pub fn encode_ack(packet_type: PacketType, packet_id: u16, buf: &mut Vec<u8>) {
    let flags = if packet_type == PacketType::Pubrel {
        0x02
    } else {
        0x00
    };
    buf.extend_from_slice(&[((packet_type as u8) << 4) | flags, 2]);
    buf.extend_from_slice(&packet_id.to_be_bytes());
}

/// Encode a SUBSCRIBE packet.
pub fn encode_subscribe(
    subscribe: &Subscribe,
    protocol_version: u8,
    buf: &mut Vec<u8>,
) -> Result<()> {
    let mut body = Vec::new();
    body.extend_from_slice(&subscribe.packet_id.to_be_bytes());
    if protocol_version == PROTOCOL_V5 {
        body.push(0);
    }
    for (topic, qos) in &subscribe.topics {
        put_str(&mut body, topic)?;
        body.push(*qos as u8);
    }
    finish(((PacketType::Subscribe as u8) << 4) | 0x02, &body, buf)
}

/// Encode a SUBACK packet (broker side; used by test brokers).
pub fn encode_suback(suback: &Suback, protocol_version: u8, buf: &mut Vec<u8>) -> Result<()> {
    let mut body = Vec::new();
    body.extend_from_slice(&suback.packet_id.to_be_bytes());
    if protocol_version == PROTOCOL_V5 {
        body.push(0);
    }
    body.extend_from_slice(&suback.return_codes);
    finish((PacketType::Suback as u8) << 4, &body, buf)
}

/// Encode an UNSUBSCRIBE packet.
pub fn encode_unsubscribe(
    unsubscribe: &Unsubscribe,
    protocol_version: u8,
    buf: &mut Vec<u8>,
) -> Result<()> {
    let mut body = Vec::new();
    body.extend_from_slice(&unsubscribe.packet_id.to_be_bytes());
    if protocol_version == PROTOCOL_V5 {
        body.push(0);
    }
    for topic in &unsubscribe.topics {
        put_str(&mut body, topic)?;
    }
    finish(((PacketType::Unsubscribe as u8) << 4) | 0x02, &body, buf)
}

/// Encode an UNSUBACK packet (broker side; used by test brokers).
pub fn encode_unsuback(
    unsuback: &Unsuback,
    protocol_version: u8,
    buf: &mut Vec<u8>,
) -> Result<()> {
    let mut body = Vec::new();
    body.extend_from_slice(&unsuback.packet_id.to_be_bytes());
    if protocol_version == PROTOCOL_V5 {
        body.push(0);
        body.extend_from_slice(&unsuback.reason_codes);
    }
    finish((PacketType::Unsuback as u8) << 4, &body, buf)
}

/// Encode a PINGREQ packet.
pub fn encode_pingreq(buf: &mut Vec<u8>) {
    buf.extend_from_slice(&[(PacketType::Pingreq as u8) << 4, 0]);
}

/// Encode a PINGRESP packet.
pub fn encode_pingresp(buf: &mut Vec<u8>) {
    buf.extend_from_slice(&[(PacketType::Pingresp as u8) << 4, 0]);
}

/// Encode a DISCONNECT packet. A normal (0x00) disconnect has no body.
pub fn encode_disconnect(reason_code: u8, protocol_version: u8, buf: &mut Vec<u8>) {
    let first = (PacketType::Disconnect as u8) << 4;
    if reason_code == 0 || protocol_version != PROTOCOL_V5 {
        buf.extend_from_slice(&[first, 0]);
    } else {
        buf.extend_from_slice(&[first, 1, reason_code]);
    }
}
