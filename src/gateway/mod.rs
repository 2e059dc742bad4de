//! Gateway Orchestrator
//!
//! Wires the bus, the codec, the suppression registry, and the broker
//! client together. Two contexts run concurrently:
//!
//! - The telemetry loop: a blocking read-dispatch cycle on the CAN socket,
//!   running on the blocking thread pool. Each frame is rendered and
//!   published, unless the suppression registry marks it as our own echo.
//! - The command path: parsing and registration run inside the broker
//!   client's delivery context; the frame is then handed to a dedicated
//!   blocking writer task, so a full CAN TX queue stalls only the writer,
//!   never the client's socket reads or keep-alive.
//!
//! The two contexts share only the suppression registry. Bus errors are
//! fatal in both directions and stop the gateway; broker errors are handled
//! inside the client by reconnecting.

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::bus::{BusFrame, BusTransport, SocketCanBus};
use crate::codec::{CodecError, Direction, FrameCodec, GatewayMessage};
use crate::config::Config;
use crate::mqtt::{InboundCallback, MqttClient, MqttError, QoS};
use crate::suppress::SuppressionRegistry;


/// Depth of the queue feeding the blocking bus writer
const BUS_WRITE_QUEUE_DEPTH: usize = 1024;

/// Fatal gateway errors
#[derive(Debug)]
pub enum GatewayError {
    /// CAN socket error
    Bus(io::Error),
    /// Broker client error
    Broker(MqttError),
    /// Invalid runtime configuration
    Config(String),
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayError::Bus(e) => write!(f, "bus error: {}", e),
            GatewayError::Broker(e) => write!(f, "broker error: {}", e),
            GatewayError::Config(msg) => write!(f, "config error: {}", msg),
        }
    }
}

impl std::error::Error for GatewayError {}

impl From<io::Error> for GatewayError {
    fn from(e: io::Error) -> Self {
        GatewayError::Bus(e)
    }
}

impl From<MqttError> for GatewayError {
    fn from(e: MqttError) -> Self {
        GatewayError::Broker(e)
    }
}

/// Transport-independent gateway logic.
///
/// Owns the codec, the suppression registry, and the direction flags. Both
/// runtime contexts call into it; it performs no I/O itself, which keeps the
/// frame paths testable against an in-memory bus.
pub struct GatewayCore {
    codec: FrameCodec,
    registry: SuppressionRegistry,
    read_enabled: bool,
    write_enabled: bool,
}

impl GatewayCore {
    pub fn new(
        codec: FrameCodec,
        registry: SuppressionRegistry,
        read_enabled: bool,
        write_enabled: bool,
    ) -> Self {
        Self {
            codec,
            registry,
            read_enabled,
            write_enabled,
        }
    }

    /// Subscription filter for the command topics
    pub fn command_filter(&self) -> String {
        self.codec.command_filter()
    }

    /// Whether frames read from the bus are published
    pub fn read_enabled(&self) -> bool {
        self.read_enabled
    }

    /// Whether inbound commands are written onto the bus
    pub fn write_enabled(&self) -> bool {
        self.write_enabled
    }

    /// Process one inbound command message.
    ///
    /// Parses the frame, registers its echo rendering with the suppression
    /// registry, and returns the frame for the caller to write onto the bus.
    /// The registration happens before the caller can touch the bus, so the
    /// echo can never race past its suppression entry.
    ///
    /// Returns `Ok(None)` when writing is disabled or the payload is empty
    /// (brokers deliver empty retained payloads as tombstones).
    pub fn handle_command(
        &self,
        topic: &str,
        payload: &[u8],
    ) -> Result<Option<BusFrame>, CodecError> {
        if !self.write_enabled || payload.is_empty() {
            return Ok(None);
        }

        let frame = self.codec.decode(topic, payload)?;

        // Decoded frames are never error frames, so the echo rendering
        // always exists.
        if let Some(echo) = self.codec.encode(&frame, Direction::Telemetry) {
            self.registry.register(&echo.topic, &echo.body);
        }

        Ok(Some(frame))
    }

    /// Process one frame read from the bus.
    ///
    /// Returns the message to publish, or `None` when the frame is an error
    /// frame, a suppressed echo of our own write, or reading is disabled.
    pub fn handle_bus_frame(&self, frame: &BusFrame) -> Option<GatewayMessage> {
        let msg = match self.codec.encode(frame, Direction::Telemetry) {
            Some(msg) => msg,
            None => {
                trace!("Dropping error frame");
                return None;
            }
        };

        // Consume even when reading is disabled, so pending entries from
        // our own writes still drain.
        if self.registry.consume(&msg.topic, &msg.body) {
            debug!("Suppressed echo of our own write on {}", msg.topic);
            return None;
        }

        if !self.read_enabled {
            return None;
        }

        Some(msg)
    }

    #[cfg(test)]
    pub(crate) fn registry(&self) -> &SuppressionRegistry {
        &self.registry
    }
}

/// The running gateway
pub struct Gateway {
    config: Config,
}

impl Gateway {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run until a fatal error or shutdown signal.
    pub async fn run(self) -> Result<(), GatewayError> {
        let config = self.config;

        let qos = QoS::from_u8(config.gateway.qos)
            .filter(|q| *q != QoS::ExactlyOnce)
            .ok_or_else(|| {
                GatewayError::Config(format!("unsupported QoS {}", config.gateway.qos))
            })?;
        let retain = config.gateway.retain;

        let prefix = config.topic_prefix();
        let core = Arc::new(GatewayCore::new(
            FrameCodec::new(prefix.clone()),
            SuppressionRegistry::new(config.gateway.suppression_capacity),
            config.gateway.read,
            config.gateway.write,
        ));

        let bus = Arc::new(SocketCanBus::open(&config.can.interface)?);
        info!("Bound CAN interface {} (namespace {})", bus.interface(), prefix);

        // Either context can fail the whole gateway
        let (fatal_tx, mut fatal_rx) = mpsc::channel::<GatewayError>(1);

        // Dedicated blocking writer: keeps the client's delivery context
        // free of bus syscalls and preserves command order.
        let (writer_tx, writer_rx) = mpsc::channel::<BusFrame>(BUS_WRITE_QUEUE_DEPTH);
        {
            let bus = bus.clone();
            let fatal_tx = fatal_tx.clone();
            tokio::task::spawn_blocking(move || {
                if let Err(e) = run_bus_writer(bus.as_ref(), writer_rx) {
                    error!("Bus writer stopped: {}", e);
                    let _ = fatal_tx.try_send(e);
                }
            });
        }

        let callback = {
            let core = core.clone();
            let callback: InboundCallback = Arc::new(move |topic: String, payload: Bytes| {
                match core.handle_command(&topic, &payload) {
                    Ok(Some(frame)) => match writer_tx.try_send(frame) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(frame)) => {
                            // The stale registry entry this leaves behind is
                            // reclaimed by the bounded registry's eviction.
                            warn!("Bus write queue full, dropping command {}", frame);
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            // Writer already reported the fatal error
                        }
                    },
                    Ok(None) => {}
                    Err(e) => {
                        warn!("Dropping malformed command on {}: {}", topic, e);
                    }
                }
            });
            callback
        };

        let subscribe_filter = if core.write_enabled() {
            Some(core.command_filter())
        } else {
            None
        };

        let handle = MqttClient::spawn(config.broker.clone(), subscribe_filter, Some(callback));

        // Telemetry loop: blocking read-dispatch cycle on the CAN socket
        let reader = {
            let core = core.clone();
            let bus = bus.clone();
            let handle = handle.clone();
            tokio::task::spawn_blocking(move || loop {
                let frame = match bus.read_frame() {
                    Ok(frame) => frame,
                    Err(e) => return GatewayError::Bus(e),
                };

                let msg = match core.handle_bus_frame(&frame) {
                    Some(msg) => msg,
                    None => continue,
                };

                trace!("Publishing {} -> {}", frame, msg.topic);
                match handle.try_publish(msg.topic, Bytes::from(msg.body), qos, retain) {
                    Ok(()) => {}
                    Err(MqttError::QueueFull) => {
                        warn!("Publish queue full, dropping frame {}", frame);
                    }
                    Err(e) => return GatewayError::Broker(e),
                }
            })
        };

        tokio::select! {
            result = reader => {
                let err = result.map_err(|e| {
                    GatewayError::Config(format!("telemetry loop panicked: {}", e))
                })?;
                error!("Telemetry loop stopped: {}", err);
                handle.shutdown();
                Err(err)
            }
            Some(err) = fatal_rx.recv() => {
                error!("Command path stopped: {}", err);
                handle.shutdown();
                Err(err)
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                handle.shutdown();
                Ok(())
            }
        }
    }
}

/// Drain the writer queue onto the bus, blocking per frame.
///
/// Exits cleanly when every sender is gone; a bus write failure is fatal
/// and surfaces to the orchestrator.
fn run_bus_writer<B: BusTransport + ?Sized>(
    bus: &B,
    mut rx: mpsc::Receiver<BusFrame>,
) -> Result<(), GatewayError> {
    while let Some(frame) = rx.blocking_recv() {
        trace!("Writing {} to bus", frame);
        bus.write_frame(&frame).map_err(GatewayError::Bus)?;
    }
    Ok(())
}
