//! MQTT Broker Client
//!
//! A minimal v3.1.1 client for one broker connection: connect, subscribe to
//! a single command filter, publish telemetry, answer pings. The connection
//! task owns the socket; the rest of the gateway talks to it through a
//! cloneable [`MqttHandle`].
//!
//! A lost connection is retried with exponential backoff. Messages queued
//! while disconnected stay in the command channel and flush on reconnect;
//! once the channel is full, [`MqttHandle::try_publish`] reports
//! [`MqttError::QueueFull`] and the caller decides what to drop.

use std::fmt;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::BrokerConfig;

use super::codec::{decode, encode};
use super::packet::{Connect, Packet, PubAck, Publish, QoS, Subscribe, SUBACK_FAILURE};

/// Depth of the outbound publish queue
const COMMAND_QUEUE_DEPTH: usize = 1000;

/// Errors surfaced by the broker connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MqttError {
    /// Connection to the broker was lost
    ConnectionLost(String),
    /// Connection attempt timed out
    Timeout,
    /// The broker rejected the handshake or subscription
    Rejected(String),
    /// The outbound queue is full
    QueueFull,
    /// The connection task has exited
    ChannelClosed,
}

impl fmt::Display for MqttError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "connection lost: {}", msg),
            Self::Timeout => write!(f, "connection timed out"),
            Self::Rejected(msg) => write!(f, "rejected by broker: {}", msg),
            Self::QueueFull => write!(f, "outbound queue full"),
            Self::ChannelClosed => write!(f, "connection task has exited"),
        }
    }
}

impl std::error::Error for MqttError {}

/// Connection status of the broker link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    /// Not connected
    Disconnected,
    /// Connection attempt in progress
    Connecting,
    /// Connected and ready
    Connected,
    /// Waiting before the next reconnect attempt
    Backoff,
}

/// Message to send to the connection task.
///
/// Shutdown is signalled out of band (a watch channel), never through this
/// queue: draining the queue to find a control message would throw away
/// publishes buffered across a reconnect.
#[derive(Debug)]
enum ClientCommand {
    /// Publish a message to the broker
    Publish {
        topic: String,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    },
}

/// Callback invoked for each PUBLISH received from the broker
pub type InboundCallback = Arc<dyn Fn(String, Bytes) + Send + Sync>;

/// Handle to a running broker connection task
#[derive(Clone)]
pub struct MqttHandle {
    command_tx: mpsc::Sender<ClientCommand>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    status: Arc<RwLock<ClientStatus>>,
}

impl MqttHandle {
    /// Queue a message for publish without blocking.
    pub fn try_publish(
        &self,
        topic: String,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<(), MqttError> {
        self.command_tx
            .try_send(ClientCommand::Publish {
                topic,
                payload,
                qos,
                retain,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => MqttError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => MqttError::ChannelClosed,
            })
    }

    /// Current connection status
    pub fn status(&self) -> ClientStatus {
        *self.status.read()
    }

    /// Request a clean disconnect. Takes effect even mid-backoff.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// MQTT v3.1.1 broker client
pub struct MqttClient;

impl MqttClient {
    /// Spawn the connection task.
    ///
    /// If `subscribe_filter` is set, it is subscribed on every (re)connect
    /// and matching publishes are delivered to `callback`.
    pub fn spawn(
        config: BrokerConfig,
        subscribe_filter: Option<String>,
        callback: Option<InboundCallback>,
    ) -> MqttHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let status = Arc::new(RwLock::new(ClientStatus::Disconnected));

        let loop_status = status.clone();
        tokio::spawn(async move {
            Self::connection_loop(
                config,
                subscribe_filter,
                loop_status,
                command_rx,
                shutdown_rx,
                callback,
            )
            .await;
        });

        MqttHandle {
            command_tx,
            shutdown_tx: Arc::new(shutdown_tx),
            status,
        }
    }

    /// Run the connection loop with exponential backoff.
    ///
    /// Commands queued while disconnected are left in the channel; only the
    /// shutdown watch is consulted between attempts, so no publish is lost
    /// to a reconnect cycle.
    async fn connection_loop(
        config: BrokerConfig,
        subscribe_filter: Option<String>,
        status: Arc<RwLock<ClientStatus>>,
        mut command_rx: mpsc::Receiver<ClientCommand>,
        mut shutdown_rx: watch::Receiver<bool>,
        callback: Option<InboundCallback>,
    ) {
        let mut retry_interval = config.reconnect_interval_duration();
        let max_retry = config.max_reconnect_interval_duration();

        loop {
            if *shutdown_rx.borrow() {
                *status.write() = ClientStatus::Disconnected;
                return;
            }

            *status.write() = ClientStatus::Connecting;
            debug!("Connecting to {}:{}", config.host, config.port);

            match Self::connect_and_run(
                &config,
                subscribe_filter.as_deref(),
                &status,
                &mut command_rx,
                &mut shutdown_rx,
                &callback,
            )
            .await
            {
                Ok(()) => {
                    info!("Disconnected from broker gracefully");
                    *status.write() = ClientStatus::Disconnected;
                    return;
                }
                Err(e) => {
                    error!("Broker connection failed: {}", e);
                    *status.write() = ClientStatus::Backoff;

                    debug!("Reconnecting in {:?}", retry_interval);

                    tokio::select! {
                        _ = tokio::time::sleep(retry_interval) => {}
                        // A closed watch (all handles dropped) also shuts down
                        _ = shutdown_rx.changed() => {
                            info!("Broker client shutdown requested");
                            *status.write() = ClientStatus::Disconnected;
                            return;
                        }
                    }
                    retry_interval = std::cmp::min(retry_interval * 2, max_retry);
                }
            }
        }
    }

    /// Connect to the broker and run the message loop
    async fn connect_and_run(
        config: &BrokerConfig,
        subscribe_filter: Option<&str>,
        status: &Arc<RwLock<ClientStatus>>,
        command_rx: &mut mpsc::Receiver<ClientCommand>,
        shutdown_rx: &mut watch::Receiver<bool>,
        callback: &Option<InboundCallback>,
    ) -> Result<(), MqttError> {
        let stream = timeout(
            config.connect_timeout_duration(),
            TcpStream::connect((config.host.as_str(), config.port)),
        )
        .await
        .map_err(|_| MqttError::Timeout)?
        .map_err(|e| MqttError::ConnectionLost(e.to_string()))?;

        debug!("TCP connected to {}:{}", config.host, config.port);

        let (mut read_half, mut write_half) = stream.into_split();

        let connect = Packet::Connect(Connect {
            client_id: config.effective_client_id(),
            clean_session: true,
            keep_alive: config.keepalive,
            username: config.username.clone(),
            password: config.password.clone(),
        });

        let mut buf = BytesMut::new();
        encode(&connect, &mut buf)
            .map_err(|e| MqttError::Rejected(format!("encode error: {}", e)))?;
        write_half
            .write_all(&buf)
            .await
            .map_err(|e| MqttError::ConnectionLost(e.to_string()))?;

        debug!("CONNECT sent");

        // Wait for CONNACK
        let mut read_buf = BytesMut::with_capacity(4096);
        let packet = loop {
            let n = timeout(
                config.connect_timeout_duration(),
                read_half.read_buf(&mut read_buf),
            )
            .await
            .map_err(|_| MqttError::Timeout)?
            .map_err(|e| MqttError::ConnectionLost(e.to_string()))?;
            if n == 0 {
                return Err(MqttError::ConnectionLost("connection closed".to_string()));
            }

            if let Some((packet, consumed)) = decode(&read_buf)
                .map_err(|e| MqttError::Rejected(format!("decode error: {}", e)))?
            {
                let _ = read_buf.split_to(consumed);
                break packet;
            }
        };

        match packet {
            Packet::ConnAck(connack) => {
                if !connack.is_accepted() {
                    return Err(MqttError::Rejected(connack.reason().to_string()));
                }
                info!(
                    "Connected to broker (session_present={})",
                    connack.session_present
                );
            }
            _ => return Err(MqttError::Rejected("expected CONNACK".to_string())),
        }

        *status.write() = ClientStatus::Connected;

        if let Some(filter) = subscribe_filter {
            let subscribe = Packet::Subscribe(Subscribe {
                packet_id: next_packet_id(),
                subscriptions: vec![(filter.to_string(), QoS::AtLeastOnce)],
            });

            buf.clear();
            encode(&subscribe, &mut buf)
                .map_err(|e| MqttError::Rejected(format!("encode error: {}", e)))?;
            write_half
                .write_all(&buf)
                .await
                .map_err(|e| MqttError::ConnectionLost(e.to_string()))?;

            debug!("Subscribed to {}", filter);
        }

        // Drain anything that arrived piggybacked on the CONNACK read
        while let Some((packet, consumed)) =
            decode(&read_buf).map_err(|e| MqttError::ConnectionLost(e.to_string()))?
        {
            let _ = read_buf.split_to(consumed);
            Self::handle_inbound(packet, &mut buf, &mut write_half, callback).await?;
        }

        let keepalive_interval = Duration::from_secs(config.keepalive.max(1) as u64);
        let mut keepalive_timer = tokio::time::interval(keepalive_interval);
        keepalive_timer.reset();

        loop {
            tokio::select! {
                cmd = command_rx.recv() => {
                    match cmd {
                        Some(ClientCommand::Publish { topic, payload, qos, retain }) => {
                            let packet_id = if qos != QoS::AtMostOnce {
                                Some(next_packet_id())
                            } else {
                                None
                            };

                            let publish = Packet::Publish(Publish {
                                dup: false,
                                qos,
                                retain,
                                topic,
                                packet_id,
                                payload,
                            });

                            buf.clear();
                            if encode(&publish, &mut buf).is_ok() {
                                if let Err(e) = write_half.write_all(&buf).await {
                                    return Err(MqttError::ConnectionLost(e.to_string()));
                                }
                            }
                        }
                        None => {
                            // All handles dropped
                            buf.clear();
                            if encode(&Packet::Disconnect, &mut buf).is_ok() {
                                let _ = write_half.write_all(&buf).await;
                            }
                            return Ok(());
                        }
                    }
                }

                _ = shutdown_rx.changed() => {
                    buf.clear();
                    if encode(&Packet::Disconnect, &mut buf).is_ok() {
                        let _ = write_half.write_all(&buf).await;
                    }
                    return Ok(());
                }

                result = read_half.read_buf(&mut read_buf) => {
                    let n = result.map_err(|e| MqttError::ConnectionLost(e.to_string()))?;
                    if n == 0 {
                        return Err(MqttError::ConnectionLost("connection closed".to_string()));
                    }

                    // Drain every complete packet from the buffer
                    loop {
                        let (packet, consumed) = match decode(&read_buf) {
                            Ok(Some(found)) => found,
                            Ok(None) => break,
                            Err(e) => {
                                return Err(MqttError::ConnectionLost(
                                    format!("protocol error: {}", e),
                                ));
                            }
                        };
                        let _ = read_buf.split_to(consumed);

                        Self::handle_inbound(packet, &mut buf, &mut write_half, callback).await?;
                    }
                }

                _ = keepalive_timer.tick() => {
                    buf.clear();
                    if encode(&Packet::PingReq, &mut buf).is_ok() {
                        if let Err(e) = write_half.write_all(&buf).await {
                            return Err(MqttError::ConnectionLost(e.to_string()));
                        }
                    }
                }
            }
        }
    }

    /// Dispatch one packet received from the broker
    async fn handle_inbound(
        packet: Packet,
        buf: &mut BytesMut,
        write_half: &mut tokio::net::tcp::OwnedWriteHalf,
        callback: &Option<InboundCallback>,
    ) -> Result<(), MqttError> {
        match packet {
            Packet::Publish(publish) => {
                // Acknowledge QoS 1 before handing off, the handler may block
                if publish.qos == QoS::AtLeastOnce {
                    if let Some(packet_id) = publish.packet_id {
                        buf.clear();
                        if encode(&Packet::PubAck(PubAck { packet_id }), buf).is_ok() {
                            let _ = write_half.write_all(buf).await;
                        }
                    }
                }

                if let Some(callback) = callback {
                    callback(publish.topic, publish.payload);
                }
            }
            Packet::SubAck(suback) => {
                if suback.return_codes.iter().any(|c| *c == SUBACK_FAILURE) {
                    return Err(MqttError::Rejected("subscription refused".to_string()));
                }
                debug!("SUBACK received");
            }
            Packet::PubAck(_) => {
                debug!("PUBACK received");
            }
            Packet::PingResp => {
                debug!("PINGRESP received");
            }
            Packet::Disconnect => {
                warn!("Broker sent DISCONNECT");
                return Err(MqttError::ConnectionLost("broker disconnected".to_string()));
            }
            other => {
                warn!("Ignoring unexpected packet: {:?}", other);
            }
        }
        Ok(())
    }
}

/// Next packet id, skipping 0 which the protocol forbids
fn next_packet_id() -> u16 {
    static NEXT: AtomicU16 = AtomicU16::new(1);
    let id = NEXT.fetch_add(1, Ordering::SeqCst);
    if id == 0 {
        NEXT.fetch_add(1, Ordering::SeqCst)
    } else {
        id
    }
}
