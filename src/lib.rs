//! canmq - Bidirectional CAN ⇄ MQTT gateway
//!
//! Bridges a SocketCAN interface to an MQTT broker: every frame observed on
//! the bus is published as readable text under a per-host topic namespace,
//! and frames published under the command namespace are written back onto
//! the bus. A one-shot suppression registry keeps the gateway's own writes
//! from echoing back through the broker.
//!
//! Modules:
//! - [`bus`]: CAN frame model and the SocketCAN transport
//! - [`codec`]: frame ⇄ topic/body translation
//! - [`suppress`]: loopback suppression registry
//! - [`mqtt`]: minimal MQTT v3.1.1 client
//! - [`gateway`]: the orchestrator tying the contexts together
//! - [`config`]: TOML configuration with env overrides

pub mod bus;
pub mod codec;
pub mod config;
pub mod gateway;
pub mod mqtt;
pub mod suppress;

pub use bus::{BusFrame, BusTransport, SocketCanBus};
pub use codec::{CodecError, Direction, FrameCodec, GatewayMessage};
pub use config::{Config, ConfigError};
pub use gateway::{Gateway, GatewayCore, GatewayError};
pub use mqtt::{ClientStatus, MqttClient, MqttError, MqttHandle, QoS};
pub use suppress::SuppressionRegistry;
