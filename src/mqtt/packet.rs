//! MQTT v3.1.1 packet types
//!
//! Only the packets a gateway-side client exchanges with a broker are
//! modeled: the connect handshake, publishes in both directions with their
//! QoS 1 acknowledgements, subscription setup, and keep-alive pings.

use bytes::Bytes;

/// Quality of Service levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum QoS {
    /// At most once delivery
    #[default]
    AtMostOnce = 0,
    /// At least once delivery
    AtLeastOnce = 1,
    /// Exactly once delivery
    ExactlyOnce = 2,
}

impl QoS {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(QoS::AtMostOnce),
            1 => Some(QoS::AtLeastOnce),
            2 => Some(QoS::ExactlyOnce),
            _ => None,
        }
    }
}

/// CONNECT — client request to connect to the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    pub client_id: String,
    pub clean_session: bool,
    pub keep_alive: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// CONNACK — broker response to CONNECT
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnAck {
    pub session_present: bool,
    pub return_code: u8,
}

impl ConnAck {
    /// Whether the broker accepted the connection
    pub fn is_accepted(&self) -> bool {
        self.return_code == 0
    }

    /// Human-readable reason for the v3.1.1 return code
    pub fn reason(&self) -> &'static str {
        match self.return_code {
            0 => "connection accepted",
            1 => "unacceptable protocol version",
            2 => "identifier rejected",
            3 => "server unavailable",
            4 => "bad username or password",
            5 => "not authorized",
            _ => "unknown return code",
        }
    }
}

/// PUBLISH — application message, either direction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
    pub topic: String,
    /// Present iff qos > 0
    pub packet_id: Option<u16>,
    pub payload: Bytes,
}

/// PUBACK — QoS 1 acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PubAck {
    pub packet_id: u16,
}

/// SUBSCRIBE — client subscription request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe {
    pub packet_id: u16,
    /// (topic filter, requested QoS) pairs
    pub subscriptions: Vec<(String, QoS)>,
}

/// SUBACK — broker response to SUBSCRIBE
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAck {
    pub packet_id: u16,
    /// One return code per requested filter; 0x80 signals failure
    pub return_codes: Vec<u8>,
}

/// Return code a broker uses in SUBACK to reject a single filter
pub const SUBACK_FAILURE: u8 = 0x80;

/// Any MQTT v3.1.1 packet this client sends or receives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Connect),
    ConnAck(ConnAck),
    Publish(Publish),
    PubAck(PubAck),
    Subscribe(Subscribe),
    SubAck(SubAck),
    PingReq,
    PingResp,
    Disconnect,
}
