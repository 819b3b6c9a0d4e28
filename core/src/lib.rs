//! Point-to-point messaging over a PCM audio channel.
//!
//! Bits are modulated as two audio tones (AFSK) and framed into PBCP, a
//! small typed-packet protocol with a SYNC/ACK/INFO handshake, a DATA
//! stream, and END/ACK termination. The modem and the protocol engine are
//! hardware-free; audio I/O plugs in through [`PcmDuplex`].

pub mod afsk;
pub mod bits;
pub mod error;
pub mod io;
pub mod loopback;
pub mod packet;
pub mod session;

pub use afsk::{AfskConfig, AfskDecoder, AfskEncoder};
pub use bits::{bits_to_bytes, bytes_to_bits};
pub use error::{LinkError, Result};
pub use io::PcmDuplex;
pub use loopback::{loopback_pair, loopback_pair_with_capacity, LoopbackEnd, LOOPBACK_CAPACITY};
pub use packet::{ErrorCode, Packet, PacketKind, ReceiverInfo};
pub use session::{LinkConfig, Receiver, SessionState, Transmitter};

// Default channel parameters. Both peers must run the same modem settings:
// the decoder's Goertzel coefficients depend on the sample rate, so
// mismatched rates will not interoperate.
pub const DEFAULT_SAMPLE_RATE: f64 = 48_000.0;
pub const DEFAULT_BAUD: f64 = 1200.0;
pub const DEFAULT_MARK_HZ: f64 = 1200.0;
pub const DEFAULT_SPACE_HZ: f64 = 2200.0;
