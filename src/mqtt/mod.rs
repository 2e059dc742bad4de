//! MQTT v3.1.1 Client Stack
//!
//! Packet model, wire codec, and the broker connection task. The gateway
//! needs exactly one broker link, one subscription, and QoS 0/1, so this
//! stays a deliberately small v3.1.1 subset rather than a general client.

mod client;
mod codec;
mod packet;

pub use client::{ClientStatus, InboundCallback, MqttClient, MqttError, MqttHandle};
pub use codec::{decode, encode, DecodeError, EncodeError};
pub use packet::{
    ConnAck, Connect, Packet, PubAck, Publish, QoS, SubAck, Subscribe, SUBACK_FAILURE,
};
