//! PBCP packet codec: 5-byte fixed header plus a typed payload.
//!
//! Wire layout (all multi-byte fields little-endian):
//!
//! ```text
//! offset  size  field
//! 0       1     preamble = 0x45
//! 1       1     magic    = 0xD5
//! 2       1     type
//! 3       2     length   (payload bytes, LE)
//! 5       N     payload
//! ```
//!
//! There is no checksum and no framing delimiter beyond preamble/magic.

use crate::error::{LinkError, Result};
use std::fmt;

/// Signals the start of a packet.
pub const PREAMBLE: u8 = 0x45;
/// Verifies the packet really is one of ours.
pub const MAGIC: u8 = 0xD5;
/// Fixed header size in bytes.
pub const HEADER_LEN: usize = 5;
/// Wire size of the INFO payload.
pub const INFO_PAYLOAD_LEN: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketKind {
    /// Transmitter requests communication.
    Sync = 0x01,
    /// Receiver acknowledges.
    Ack = 0x02,
    /// Receiver rejects or is not ready. Accepted and ignored; never sent.
    Nack = 0x03,
    /// Receiver details (ID, firmware version, capabilities).
    Info = 0x04,
    /// Standard data packet.
    Data = 0x10,
    /// End of transmission.
    End = 0x11,
    /// Error report.
    Err = 0x12,
}

impl PacketKind {
    pub fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Sync),
            0x02 => Some(Self::Ack),
            0x03 => Some(Self::Nack),
            0x04 => Some(Self::Info),
            0x10 => Some(Self::Data),
            0x11 => Some(Self::End),
            0x12 => Some(Self::Err),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u8 {
        self as u8
    }
}

/// Protocol-level error codes carried by ERR packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidCapabilities,
    InvalidPacket,
    LengthMismatch,
    Unknown,
}

impl ErrorCode {
    pub fn to_wire(self) -> u8 {
        match self {
            Self::InvalidCapabilities => 0x01,
            Self::InvalidPacket => 0x02,
            Self::LengthMismatch => 0x03,
            Self::Unknown => 0xFF,
        }
    }

    /// Unrecognized codes collapse to `Unknown`.
    pub fn from_wire(byte: u8) -> Self {
        match byte {
            0x01 => Self::InvalidCapabilities,
            0x02 => Self::InvalidPacket,
            0x03 => Self::LengthMismatch,
            _ => Self::Unknown,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            Self::InvalidCapabilities => "Invalid capabilities",
            Self::InvalidPacket => "Invalid packet",
            Self::LengthMismatch => "Length mismatch",
            Self::Unknown => "Unknown error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// INFO payload: the receiver identifies itself during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiverInfo {
    pub receiver_id: u32,
    pub firmware_major: u8,
    pub firmware_minor: u8,
    pub capabilities: u8,
}

impl ReceiverInfo {
    fn to_wire(self) -> [u8; INFO_PAYLOAD_LEN] {
        let id = self.receiver_id.to_le_bytes();
        [
            id[0],
            id[1],
            id[2],
            id[3],
            self.firmware_major,
            self.firmware_minor,
            self.capabilities,
        ]
    }

    /// Extra trailing bytes are tolerated (struct padding from foreign peers).
    fn from_wire(payload: &[u8]) -> Result<Self> {
        if payload.len() < INFO_PAYLOAD_LEN {
            return Err(LinkError::LengthMismatch);
        }
        Ok(Self {
            receiver_id: u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]),
            firmware_major: payload[4],
            firmware_minor: payload[5],
            capabilities: payload[6],
        })
    }
}

/// A decoded PBCP packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Sync,
    Ack,
    Nack,
    Info(ReceiverInfo),
    Data(Vec<u8>),
    End,
    Error(ErrorCode),
}

impl Packet {
    pub fn kind(&self) -> PacketKind {
        match self {
            Self::Sync => PacketKind::Sync,
            Self::Ack => PacketKind::Ack,
            Self::Nack => PacketKind::Nack,
            Self::Info(_) => PacketKind::Info,
            Self::Data(_) => PacketKind::Data,
            Self::End => PacketKind::End,
            Self::Error(_) => PacketKind::Err,
        }
    }

    /// Serialize header and payload into a contiguous byte buffer.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload: Vec<u8> = match self {
            Self::Sync | Self::Ack | Self::Nack | Self::End => Vec::new(),
            Self::Info(info) => info.to_wire().to_vec(),
            Self::Data(data) => data.clone(),
            Self::Error(code) => vec![code.to_wire()],
        };
        if payload.len() > usize::from(u16::MAX) {
            return Err(LinkError::LengthMismatch);
        }

        let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
        out.push(PREAMBLE);
        out.push(MAGIC);
        out.push(self.kind().to_wire());
        out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        out.extend_from_slice(&payload);
        Ok(out)
    }

    /// Parse the leading bytes of a receive window as a packet.
    ///
    /// Trailing bytes beyond the declared payload length are ignored, so a
    /// window larger than the packet parses cleanly.
    pub fn decode(buf: &[u8]) -> Result<Packet> {
        if buf.len() < HEADER_LEN {
            return Err(LinkError::ShortFrame(buf.len()));
        }
        if buf[0] != PREAMBLE || buf[1] != MAGIC {
            return Err(LinkError::InvalidPacket);
        }
        let kind = PacketKind::from_wire(buf[2]).ok_or(LinkError::InvalidPacket)?;
        let length = usize::from(u16::from_le_bytes([buf[3], buf[4]]));
        if HEADER_LEN + length > buf.len() {
            return Err(LinkError::LengthMismatch);
        }
        let payload = &buf[HEADER_LEN..HEADER_LEN + length];

        Ok(match kind {
            PacketKind::Sync => Packet::Sync,
            PacketKind::Ack => Packet::Ack,
            PacketKind::Nack => Packet::Nack,
            PacketKind::Info => Packet::Info(ReceiverInfo::from_wire(payload)?),
            PacketKind::Data => Packet::Data(payload.to_vec()),
            PacketKind::End => Packet::End,
            PacketKind::Err => {
                let code = payload.first().copied().ok_or(LinkError::LengthMismatch)?;
                Packet::Error(ErrorCode::from_wire(code))
            }
        })
    }
}
