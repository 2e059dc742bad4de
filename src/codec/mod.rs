//! CAN Frame ⇄ MQTT Message Codec
//!
//! Pure, stateless translation between bus frames and topic/body pairs.
//!
//! # Wire format (v2, canonical)
//!
//! Earlier deployments of this gateway drifted across several payload
//! layouts (timestamp prefixes, origin-host suffixes, prefix-only topics).
//! This crate speaks exactly one format:
//!
//! - Topic: `<prefix>/<rx|tx>/<hex id>` — lowercase hex, no `0x`. The `rx`
//!   segment carries frames read from the bus (telemetry), `tx` carries
//!   frames to be written onto it (commands).
//! - Data frame body: `<dlc> <hex payload>` — the dlc digit, a space, then
//!   exactly `dlc * 2` lowercase hex digits, one zero-padded pair per byte.
//!   A dlc of 0 renders as `0` alone.
//! - Remote request body: `<dlc> RTR` — literal, case-sensitive marker.
//!
//! Extended (29-bit) ids are distinguished from standard (11-bit) ids only
//! by magnitude, never by a reserved bit in the text. Error frames are
//! never encoded.

use std::fmt;
use std::fmt::Write as _;

use crate::bus::{BusFrame, EFF_MASK, MAX_DATA_LEN, SFF_MASK};

#[cfg(test)]
mod tests;

/// Literal body marker for remote transmission requests
pub const RTR_MARKER: &str = "RTR";

/// Direction of a translated frame, as rendered in the topic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Bus → broker: frames observed on the bus
    Telemetry,
    /// Broker → bus: frames to inject onto the bus
    Command,
}

impl Direction {
    /// Topic path segment for this direction
    pub fn tag(self) -> &'static str {
        match self {
            Direction::Telemetry => "rx",
            Direction::Command => "tx",
        }
    }
}

/// A frame rendered for publish: topic and ASCII body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayMessage {
    pub topic: String,
    pub body: String,
}

/// Errors produced when translating an inbound message back to a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The trailing topic segment is not a valid hex frame id
    MalformedTopic(String),
    /// The body matches neither the data-frame nor the remote-request grammar
    MalformedPayload(String),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::MalformedTopic(seg) => write!(f, "malformed topic id segment: {:?}", seg),
            CodecError::MalformedPayload(msg) => write!(f, "malformed payload: {}", msg),
        }
    }
}

impl std::error::Error for CodecError {}

/// Frame codec bound to a topic namespace prefix
#[derive(Debug, Clone)]
pub struct FrameCodec {
    prefix: String,
}

impl FrameCodec {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// The configured namespace prefix
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Subscription filter matching all command topics under the prefix
    pub fn command_filter(&self) -> String {
        format!("{}/{}/+", self.prefix, Direction::Command.tag())
    }

    /// Render a frame for publish in the given direction.
    ///
    /// Returns `None` for error frames, which carry no payload semantics
    /// in this format and are dropped at the boundary.
    pub fn encode(&self, frame: &BusFrame, direction: Direction) -> Option<GatewayMessage> {
        if frame.is_error() {
            return None;
        }

        let mask = if frame.is_extended() { EFF_MASK } else { SFF_MASK };
        let topic = format!("{}/{}/{:x}", self.prefix, direction.tag(), frame.id() & mask);

        let body = if frame.is_remote() {
            format!("{} {}", frame.dlc(), RTR_MARKER)
        } else if frame.dlc() == 0 {
            "0".to_string()
        } else {
            let mut body = String::with_capacity(2 + frame.dlc() as usize * 2);
            let _ = write!(body, "{} ", frame.dlc());
            for byte in frame.payload() {
                let _ = write!(body, "{:02x}", byte);
            }
            body
        };

        Some(GatewayMessage { topic, body })
    }

    /// Parse an inbound message back into a frame.
    ///
    /// The frame id is taken from the trailing topic segment; the parsed
    /// value is masked to 29 bits to discard any flag bits embedded in the
    /// numeric encoding, and the extended flag follows from magnitude.
    /// The body must match the encoder's grammar exactly — a wrong token
    /// count is always a hard failure, never a partial frame.
    pub fn decode(&self, topic: &str, payload: &[u8]) -> Result<BusFrame, CodecError> {
        let segment = topic.rsplit('/').next().unwrap_or(topic);
        let id = u32::from_str_radix(segment, 16)
            .map_err(|_| CodecError::MalformedTopic(segment.to_string()))?
            & EFF_MASK;

        let body = std::str::from_utf8(payload)
            .map_err(|_| CodecError::MalformedPayload("body is not valid UTF-8".to_string()))?;

        let mut tokens = body.split_ascii_whitespace();
        let dlc = match tokens.next() {
            Some(tok) if tok.len() == 1 => tok
                .parse::<u8>()
                .ok()
                .filter(|dlc| *dlc as usize <= MAX_DATA_LEN)
                .ok_or_else(|| {
                    CodecError::MalformedPayload(format!("dlc out of range: {:?}", tok))
                })?,
            Some(tok) => {
                return Err(CodecError::MalformedPayload(format!(
                    "dlc out of range: {:?}",
                    tok
                )))
            }
            None => return Err(CodecError::MalformedPayload("empty body".to_string())),
        };

        let second = tokens.next();
        if tokens.next().is_some() {
            return Err(CodecError::MalformedPayload(
                "trailing tokens after payload".to_string(),
            ));
        }

        let frame = match second {
            None if dlc == 0 => BusFrame::new(id, &[]),
            None => {
                return Err(CodecError::MalformedPayload(
                    "missing payload token".to_string(),
                ))
            }
            Some(RTR_MARKER) => BusFrame::new_remote(id, dlc),
            Some(hex) => {
                if hex.len() != dlc as usize * 2 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
                    return Err(CodecError::MalformedPayload(format!(
                        "expected {} hex digits, got {:?}",
                        dlc * 2,
                        hex
                    )));
                }
                let mut data = [0u8; MAX_DATA_LEN];
                for (i, byte) in data.iter_mut().enumerate().take(dlc as usize) {
                    // Slice bounds are safe: the token is all-ASCII and
                    // exactly dlc * 2 bytes long.
                    *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).map_err(|_| {
                        CodecError::MalformedPayload(format!("invalid hex pair in {:?}", hex))
                    })?;
                }
                BusFrame::new(id, &data[..dlc as usize])
            }
        };

        // Id and dlc are range-checked above, so construction cannot fail.
        frame.ok_or_else(|| CodecError::MalformedTopic(segment.to_string()))
    }
}
