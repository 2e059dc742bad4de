//! CAN Bus Transport
//!
//! Defines the `BusFrame` value type and the `BusTransport` seam between
//! the gateway and the CAN socket. The production implementation
//! (`SocketCanBus`) wraps a raw SocketCAN socket; the socket's own
//! open/bind/ioctl handling lives in the `socketcan` crate.

use std::fmt;
use std::io;

use socketcan::{CanFrame, CanSocket, EmbeddedFrame, ExtendedId, Id, Socket, StandardId};

/// Maximum CAN payload length in bytes
pub const MAX_DATA_LEN: usize = 8;

/// Valid bits of a standard (11-bit) frame id
pub const SFF_MASK: u32 = 0x0000_07FF;

/// Valid bits of an extended (29-bit) frame id
pub const EFF_MASK: u32 = 0x1FFF_FFFF;

/// A single CAN frame, immutable once constructed.
///
/// The id is always stored masked to 29 bits; whether a frame is extended
/// is determined purely by magnitude (> 11 bits), matching the textual
/// wire format, which has no separate extended-id marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusFrame {
    id: u32,
    remote: bool,
    error: bool,
    len: u8,
    data: [u8; MAX_DATA_LEN],
}

impl BusFrame {
    /// Create a data frame. Returns `None` if the id exceeds 29 bits or the
    /// payload exceeds 8 bytes.
    pub fn new(id: u32, payload: &[u8]) -> Option<Self> {
        if id > EFF_MASK || payload.len() > MAX_DATA_LEN {
            return None;
        }
        let mut data = [0u8; MAX_DATA_LEN];
        data[..payload.len()].copy_from_slice(payload);
        Some(Self {
            id,
            remote: false,
            error: false,
            len: payload.len() as u8,
            data,
        })
    }

    /// Create a remote-request frame with the given dlc.
    pub fn new_remote(id: u32, dlc: u8) -> Option<Self> {
        if id > EFF_MASK || dlc as usize > MAX_DATA_LEN {
            return None;
        }
        Some(Self {
            id,
            remote: true,
            error: false,
            len: dlc,
            data: [0u8; MAX_DATA_LEN],
        })
    }

    /// Create an error frame, as produced by the bus on protocol errors.
    /// Error frames carry no payload semantics and are never encoded.
    pub fn new_error() -> Self {
        Self {
            id: 0,
            remote: false,
            error: true,
            len: 0,
            data: [0u8; MAX_DATA_LEN],
        }
    }

    /// Frame id, masked to 29 bits
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Whether the id falls outside the standard 11-bit range
    pub fn is_extended(&self) -> bool {
        self.id > SFF_MASK
    }

    /// Whether this is a remote transmission request
    pub fn is_remote(&self) -> bool {
        self.remote
    }

    /// Whether this is an error frame
    pub fn is_error(&self) -> bool {
        self.error
    }

    /// Data length code (0..=8)
    pub fn dlc(&self) -> u8 {
        self.len
    }

    /// Payload bytes (empty for remote and error frames)
    pub fn payload(&self) -> &[u8] {
        if self.remote || self.error {
            &[]
        } else {
            &self.data[..self.len as usize]
        }
    }

    fn from_can(frame: &CanFrame) -> Self {
        match frame {
            CanFrame::Data(f) => {
                let mut data = [0u8; MAX_DATA_LEN];
                let len = f.data().len().min(MAX_DATA_LEN);
                data[..len].copy_from_slice(&f.data()[..len]);
                Self {
                    id: raw_id(f.id()),
                    remote: false,
                    error: false,
                    len: len as u8,
                    data,
                }
            }
            CanFrame::Remote(f) => Self {
                id: raw_id(f.id()),
                remote: true,
                error: false,
                len: f.dlc().min(MAX_DATA_LEN) as u8,
                data: [0u8; MAX_DATA_LEN],
            },
            CanFrame::Error(_) => Self::new_error(),
        }
    }

    fn to_can(&self) -> Option<CanFrame> {
        let id: Id = if self.is_extended() {
            ExtendedId::new(self.id)?.into()
        } else {
            StandardId::new(self.id as u16)?.into()
        };
        if self.remote {
            CanFrame::new_remote(id, self.len as usize)
        } else {
            CanFrame::new(id, self.payload())
        }
    }
}

impl fmt::Display for BusFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.error {
            return write!(f, "ERR");
        }
        write!(f, "ID={:X} DLC={}", self.id, self.len)?;
        if self.remote {
            write!(f, " RTR")
        } else {
            for byte in self.payload() {
                write!(f, " {:02X}", byte)?;
            }
            Ok(())
        }
    }
}

fn raw_id(id: Id) -> u32 {
    match id {
        Id::Standard(id) => id.as_raw() as u32,
        Id::Extended(id) => id.as_raw(),
    }
}

/// Blocking bus transport, the gateway's view of the CAN socket
pub trait BusTransport: Send + Sync {
    /// Read the next frame, blocking until one is available
    fn read_frame(&self) -> io::Result<BusFrame>;

    /// Write a frame onto the bus
    fn write_frame(&self, frame: &BusFrame) -> io::Result<()>;
}

/// SocketCAN-backed bus transport
pub struct SocketCanBus {
    socket: CanSocket,
    interface: String,
}

impl SocketCanBus {
    /// Open a raw CAN socket bound to the named interface
    pub fn open(interface: &str) -> io::Result<Self> {
        let socket = CanSocket::open(interface)?;
        Ok(Self {
            socket,
            interface: interface.to_string(),
        })
    }

    /// Name of the bound interface
    pub fn interface(&self) -> &str {
        &self.interface
    }
}

impl BusTransport for SocketCanBus {
    fn read_frame(&self) -> io::Result<BusFrame> {
        let frame = self.socket.read_frame()?;
        Ok(BusFrame::from_can(&frame))
    }

    fn write_frame(&self, frame: &BusFrame) -> io::Result<()> {
        let can = frame
            .to_can()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "frame id out of range"))?;
        self.socket.write_frame(&can)
    }
}
