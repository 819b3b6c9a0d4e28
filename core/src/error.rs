use crate::packet::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Invalid modem configuration: {0}")]
    InvalidConfig(String),

    #[error("Output buffer too small: need {needed} samples, have {have}")]
    BufferTooSmall { needed: usize, have: usize },

    #[error("Short frame ({0} bytes)")]
    ShortFrame(usize),

    #[error("Invalid packet header")]
    InvalidPacket,

    #[error("Payload length mismatch")]
    LengthMismatch,

    #[error("Receiver capabilities not supported: 0x{0:02X}")]
    InvalidCapabilities(u8),

    #[error("Failed to handshake with receiver after {0} attempts")]
    HandshakeFailed(u32),

    #[error("Peer reported error: {0}")]
    Peer(ErrorCode),

    #[error("Message buffer full ({0} bytes)")]
    MessageOverflow(usize),

    #[error("PCM buffer overrun: {needed} samples exceed channel capacity {capacity}")]
    ChannelFull { needed: usize, capacity: usize },

    #[error("Audio I/O error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, LinkError>;
