//! MQTT v3.1.1 packet codec
//!
//! Client-side encoder and decoder. The encoder covers the packets the
//! gateway sends (CONNECT, PUBLISH, PUBACK, SUBSCRIBE, PINGREQ,
//! DISCONNECT); the decoder covers what a broker sends back. Both operate
//! on plain byte slices / `BytesMut` so the connection task can accumulate
//! partial reads and decode packet by packet.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use super::packet::{ConnAck, Connect, Packet, PubAck, Publish, QoS, SubAck, Subscribe};

/// Maximum remaining length the variable-length header can express
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Errors that can occur during packet decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Not enough data in buffer
    InsufficientData,
    /// Invalid packet type
    InvalidPacketType(u8),
    /// Packet type a broker should never send to a client
    UnexpectedPacket(u8),
    /// Invalid remaining length encoding
    InvalidRemainingLength,
    /// Invalid QoS value
    InvalidQoS(u8),
    /// Invalid UTF-8 string
    InvalidUtf8,
    /// Invalid packet flags
    InvalidFlags,
    /// Malformed packet
    MalformedPacket(&'static str),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientData => write!(f, "insufficient data in buffer"),
            Self::InvalidPacketType(t) => write!(f, "invalid packet type: {}", t),
            Self::UnexpectedPacket(t) => write!(f, "unexpected packet type from broker: {}", t),
            Self::InvalidRemainingLength => write!(f, "invalid remaining length encoding"),
            Self::InvalidQoS(q) => write!(f, "invalid QoS value: {}", q),
            Self::InvalidUtf8 => write!(f, "invalid UTF-8 string"),
            Self::InvalidFlags => write!(f, "invalid packet flags"),
            Self::MalformedPacket(msg) => write!(f, "malformed packet: {}", msg),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Errors that can occur during packet encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// Packet too large
    PacketTooLarge,
    /// String too long
    StringTooLong,
    /// PUBLISH with QoS > 0 requires a packet id
    MissingPacketId,
    /// SUBSCRIBE requires at least one filter
    EmptySubscription,
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PacketTooLarge => write!(f, "packet too large"),
            Self::StringTooLong => write!(f, "string too long"),
            Self::MissingPacketId => write!(f, "publish with QoS > 0 requires a packet id"),
            Self::EmptySubscription => write!(f, "subscribe requires at least one filter"),
        }
    }
}

impl std::error::Error for EncodeError {}

/// Read a Variable Byte Integer from buffer.
/// Returns (value, bytes_consumed) or error.
#[inline]
fn read_variable_int(buf: &[u8]) -> Result<(u32, usize), DecodeError> {
    let mut multiplier: u32 = 1;
    let mut value: u32 = 0;
    let mut pos = 0;

    loop {
        if pos >= buf.len() {
            return Err(DecodeError::InsufficientData);
        }
        if pos >= 4 {
            return Err(DecodeError::InvalidRemainingLength);
        }

        let byte = buf[pos];
        value += ((byte & 0x7F) as u32) * multiplier;
        pos += 1;

        if (byte & 0x80) == 0 {
            break;
        }

        multiplier *= 128;
    }

    Ok((value, pos))
}

/// Write a Variable Byte Integer to buffer
#[inline]
fn write_variable_int(buf: &mut BytesMut, mut value: u32) -> Result<(), EncodeError> {
    if value > MAX_REMAINING_LENGTH as u32 {
        return Err(EncodeError::PacketTooLarge);
    }

    loop {
        let mut byte = (value % 128) as u8;
        value /= 128;
        if value > 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if value == 0 {
            break;
        }
    }
    Ok(())
}

/// Read a UTF-8 encoded string.
/// Returns (string, bytes_consumed) or error.
#[inline]
fn read_string(buf: &[u8]) -> Result<(&str, usize), DecodeError> {
    if buf.len() < 2 {
        return Err(DecodeError::InsufficientData);
    }

    let len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
    let total_len = 2 + len;

    if buf.len() < total_len {
        return Err(DecodeError::InsufficientData);
    }

    let s = std::str::from_utf8(&buf[2..total_len]).map_err(|_| DecodeError::InvalidUtf8)?;
    Ok((s, total_len))
}

/// Write a UTF-8 encoded string
#[inline]
fn write_string(buf: &mut BytesMut, s: &str) -> Result<(), EncodeError> {
    if s.len() > 65535 {
        return Err(EncodeError::StringTooLong);
    }
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
    Ok(())
}

/// Encode a packet to the buffer
pub fn encode(packet: &Packet, buf: &mut BytesMut) -> Result<(), EncodeError> {
    match packet {
        Packet::Connect(p) => encode_connect(p, buf),
        Packet::ConnAck(p) => {
            buf.put_u8(0x20);
            buf.put_u8(0x02);
            buf.put_u8(if p.session_present { 0x01 } else { 0x00 });
            buf.put_u8(p.return_code);
            Ok(())
        }
        Packet::Publish(p) => encode_publish(p, buf),
        Packet::PubAck(p) => {
            buf.put_u8(0x40);
            buf.put_u8(0x02);
            buf.put_u16(p.packet_id);
            Ok(())
        }
        Packet::Subscribe(p) => encode_subscribe(p, buf),
        Packet::SubAck(p) => {
            buf.put_u8(0x90);
            write_variable_int(buf, (2 + p.return_codes.len()) as u32)?;
            buf.put_u16(p.packet_id);
            buf.put_slice(&p.return_codes);
            Ok(())
        }
        Packet::PingReq => {
            buf.put_u8(0xC0);
            buf.put_u8(0x00);
            Ok(())
        }
        Packet::PingResp => {
            buf.put_u8(0xD0);
            buf.put_u8(0x00);
            Ok(())
        }
        Packet::Disconnect => {
            buf.put_u8(0xE0);
            buf.put_u8(0x00);
            Ok(())
        }
    }
}

fn encode_connect(packet: &Connect, buf: &mut BytesMut) -> Result<(), EncodeError> {
    // Protocol name + level + flags + keep alive
    let mut remaining_length = 6 + 1 + 1 + 2;
    remaining_length += 2 + packet.client_id.len();
    if let Some(ref username) = packet.username {
        remaining_length += 2 + username.len();
    }
    if let Some(ref password) = packet.password {
        remaining_length += 2 + password.len();
    }

    buf.put_u8(0x10);
    write_variable_int(buf, remaining_length as u32)?;

    write_string(buf, "MQTT")?;
    buf.put_u8(0x04); // protocol level 4 = v3.1.1

    let mut connect_flags: u8 = 0;
    if packet.clean_session {
        connect_flags |= 0x02;
    }
    if packet.password.is_some() {
        connect_flags |= 0x40;
    }
    if packet.username.is_some() {
        connect_flags |= 0x80;
    }
    buf.put_u8(connect_flags);

    buf.put_u16(packet.keep_alive);

    write_string(buf, &packet.client_id)?;
    if let Some(ref username) = packet.username {
        write_string(buf, username)?;
    }
    if let Some(ref password) = packet.password {
        write_string(buf, password)?;
    }

    Ok(())
}

fn encode_publish(packet: &Publish, buf: &mut BytesMut) -> Result<(), EncodeError> {
    let packet_id = match (packet.qos, packet.packet_id) {
        (QoS::AtMostOnce, _) => None,
        (_, Some(id)) => Some(id),
        (_, None) => return Err(EncodeError::MissingPacketId),
    };

    let mut remaining_length = 2 + packet.topic.len() + packet.payload.len();
    if packet_id.is_some() {
        remaining_length += 2;
    }

    let header = 0x30
        | ((packet.dup as u8) << 3)
        | ((packet.qos as u8) << 1)
        | (packet.retain as u8);
    buf.put_u8(header);
    write_variable_int(buf, remaining_length as u32)?;

    write_string(buf, &packet.topic)?;
    if let Some(id) = packet_id {
        buf.put_u16(id);
    }
    buf.put_slice(&packet.payload);

    Ok(())
}

fn encode_subscribe(packet: &Subscribe, buf: &mut BytesMut) -> Result<(), EncodeError> {
    if packet.subscriptions.is_empty() {
        return Err(EncodeError::EmptySubscription);
    }

    let mut remaining_length = 2;
    for (filter, _) in &packet.subscriptions {
        remaining_length += 2 + filter.len() + 1;
    }

    buf.put_u8(0x82); // SUBSCRIBE with mandatory flags 0b0010
    write_variable_int(buf, remaining_length as u32)?;
    buf.put_u16(packet.packet_id);

    for (filter, qos) in &packet.subscriptions {
        write_string(buf, filter)?;
        buf.put_u8(*qos as u8);
    }

    Ok(())
}

/// Decode a packet from the buffer.
///
/// Returns `Ok(None)` when the buffer holds only a partial packet, else
/// `(packet, bytes_consumed)` so the caller can advance its read buffer.
pub fn decode(buf: &[u8]) -> Result<Option<(Packet, usize)>, DecodeError> {
    if buf.len() < 2 {
        return Ok(None);
    }

    let first_byte = buf[0];
    let packet_type = first_byte >> 4;
    let flags = first_byte & 0x0F;

    let (remaining_length, len_bytes) = match read_variable_int(&buf[1..]) {
        Ok(r) => r,
        Err(DecodeError::InsufficientData) => return Ok(None),
        Err(e) => return Err(e),
    };

    let total_len = 1 + len_bytes + remaining_length as usize;
    if buf.len() < total_len {
        return Ok(None);
    }

    let payload = &buf[1 + len_bytes..total_len];

    let packet = match packet_type {
        2 => decode_connack(flags, payload)?,
        3 => decode_publish(flags, payload)?,
        4 => {
            require_flags(flags, 0)?;
            Packet::PubAck(PubAck {
                packet_id: read_packet_id(payload)?,
            })
        }
        9 => decode_suback(flags, payload)?,
        12 => {
            require_flags(flags, 0)?;
            Packet::PingReq
        }
        13 => {
            require_flags(flags, 0)?;
            Packet::PingResp
        }
        14 => {
            require_flags(flags, 0)?;
            Packet::Disconnect
        }
        1 | 5..=8 | 10 | 11 => return Err(DecodeError::UnexpectedPacket(packet_type)),
        _ => return Err(DecodeError::InvalidPacketType(packet_type)),
    };

    Ok(Some((packet, total_len)))
}

fn require_flags(flags: u8, expected: u8) -> Result<(), DecodeError> {
    if flags == expected {
        Ok(())
    } else {
        Err(DecodeError::InvalidFlags)
    }
}

fn read_packet_id(payload: &[u8]) -> Result<u16, DecodeError> {
    if payload.len() < 2 {
        return Err(DecodeError::MalformedPacket("truncated packet id"));
    }
    Ok(u16::from_be_bytes([payload[0], payload[1]]))
}

fn decode_connack(flags: u8, payload: &[u8]) -> Result<Packet, DecodeError> {
    require_flags(flags, 0)?;
    if payload.len() != 2 {
        return Err(DecodeError::MalformedPacket("connack length must be 2"));
    }
    if payload[0] & !0x01 != 0 {
        return Err(DecodeError::MalformedPacket("reserved connack flags set"));
    }
    Ok(Packet::ConnAck(ConnAck {
        session_present: payload[0] & 0x01 != 0,
        return_code: payload[1],
    }))
}

fn decode_publish(flags: u8, payload: &[u8]) -> Result<Packet, DecodeError> {
    let dup = (flags & 0x08) != 0;
    let retain = (flags & 0x01) != 0;
    let qos_bits = (flags >> 1) & 0x03;
    let qos = QoS::from_u8(qos_bits).ok_or(DecodeError::InvalidQoS(qos_bits))?;

    let (topic, mut pos) = read_string(payload)?;
    let topic = topic.to_string();

    let packet_id = if qos != QoS::AtMostOnce {
        let id = read_packet_id(&payload[pos..])?;
        pos += 2;
        Some(id)
    } else {
        None
    };

    Ok(Packet::Publish(Publish {
        dup,
        qos,
        retain,
        topic,
        packet_id,
        payload: Bytes::copy_from_slice(&payload[pos..]),
    }))
}

fn decode_suback(flags: u8, payload: &[u8]) -> Result<Packet, DecodeError> {
    require_flags(flags, 0)?;
    let packet_id = read_packet_id(payload)?;
    let return_codes = payload[2..].to_vec();
    if return_codes.is_empty() {
        return Err(DecodeError::MalformedPacket("suback without return codes"));
    }
    Ok(Packet::SubAck(SubAck {
        packet_id,
        return_codes,
    }))
}
