//! Half-duplex PBCP session engine.
//!
//! A session owns one AFSK encoder, one AFSK decoder, and one PCM duplex
//! adapter. The transmitter initiates with SYNC, the receiver answers with
//! ACK and INFO, data flows as DATA packets, and END/ACK closes the link.
//! Every transition in the state diagram is an explicit method so the
//! sequencing is checkable at a glance.

use crate::afsk::{AfskConfig, AfskDecoder, AfskEncoder};
use crate::bits;
use crate::error::{LinkError, Result};
use crate::io::PcmDuplex;
use crate::packet::{ErrorCode, Packet, ReceiverInfo, HEADER_LEN};
use log::{debug, info, warn};
use std::thread::sleep;
use std::time::{Duration, Instant};

/// Where a session endpoint currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Syncing,
    Acked,
    InfoExchanged,
    Transferring,
    Closing,
    Closed,
    Failed,
}

/// Protocol-level knobs. The defaults mirror the channel constants both
/// roles were tuned against; peers only need to agree on the modem config.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// How long the transmitter waits for ACK after each SYNC.
    pub sync_timeout: Duration,
    /// SYNC attempts before giving up on the handshake.
    pub sync_max_retries: u32,
    /// Pause between consecutive DATA packets.
    pub data_gap: Duration,
    /// Largest DATA payload per packet; longer messages are chunked.
    pub data_chunk: usize,
    /// Receive-side message accumulator capacity in bytes.
    pub message_capacity: usize,
    /// PCM receive window in samples.
    pub pcm_window: usize,
    /// Failed receive attempts between decoder resets while idle.
    pub reset_interval: u32,
    /// Identity advertised in the INFO packet.
    pub receiver_id: u32,
    pub firmware_major: u8,
    pub firmware_minor: u8,
    /// Capability bitfield; must be 0x00 until capabilities exist.
    pub capabilities: u8,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            sync_timeout: Duration::from_millis(500),
            sync_max_retries: 20,
            data_gap: Duration::from_millis(200),
            data_chunk: 1024,
            message_capacity: 8192,
            pcm_window: 48_000,
            reset_interval: 5000,
            receiver_id: 0x1234_5678,
            firmware_major: 1,
            firmware_minor: 0,
            capabilities: 0x00,
        }
    }
}

/// Packet pump shared by both roles: packet ↔ bytes ↔ bits ↔ PCM.
///
/// Scratch buffers are allocated once and reused across receive attempts.
struct AudioLink<T: PcmDuplex> {
    audio: T,
    encoder: AfskEncoder,
    decoder: AfskDecoder,
    window: Vec<f32>,
    bit_buf: Vec<u8>,
    max_packet_bits: usize,
}

impl<T: PcmDuplex> AudioLink<T> {
    fn new(audio: T, modem: &AfskConfig, cfg: &LinkConfig) -> Result<Self> {
        Ok(Self {
            audio,
            encoder: AfskEncoder::new(modem)?,
            decoder: AfskDecoder::new(modem)?,
            window: vec![0.0; cfg.pcm_window],
            bit_buf: Vec::with_capacity((HEADER_LEN + cfg.data_chunk) * 8),
            max_packet_bits: (HEADER_LEN + cfg.data_chunk) * 8,
        })
    }

    fn send(&mut self, packet: &Packet) -> Result<()> {
        let bytes = packet.encode()?;
        let pcm = self.encoder.encode_bits(&bits::bytes_to_bits(&bytes));
        self.audio.write_pcm(&pcm)
    }

    /// One receive attempt over a single PCM window. Decode shortfalls
    /// (quiet channel, short frame, bad header, impossible length) are
    /// dropped to `Ok(None)`; only adapter failures surface as errors.
    fn recv(&mut self) -> Result<Option<Packet>> {
        let n = self.audio.read_pcm(&mut self.window)?;
        if n == 0 {
            return Ok(None);
        }

        self.bit_buf.clear();
        self.decoder
            .decode_pcm(&self.window[..n], &mut self.bit_buf, None, self.max_packet_bits);
        if self.bit_buf.len() < HEADER_LEN * 8 {
            return Ok(None);
        }

        match Packet::decode(&bits::bits_to_bytes(&self.bit_buf)) {
            Ok(packet) => Ok(Some(packet)),
            Err(LinkError::ShortFrame(_))
            | Err(LinkError::InvalidPacket)
            | Err(LinkError::LengthMismatch) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn reset_decoder(&mut self) {
        self.decoder.reset();
    }
}

/// Initiating role: SYNC, validate INFO, stream DATA, END.
pub struct Transmitter<T: PcmDuplex> {
    link: AudioLink<T>,
    cfg: LinkConfig,
    state: SessionState,
}

impl<T: PcmDuplex> Transmitter<T> {
    pub fn new(audio: T, modem: &AfskConfig, cfg: LinkConfig) -> Result<Self> {
        Ok(Self {
            link: AudioLink::new(audio, modem, &cfg)?,
            cfg,
            state: SessionState::Idle,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive a complete session: handshake, info validation, transfer,
    /// termination. An empty message sends zero DATA packets.
    pub fn run(&mut self, message: &[u8]) -> Result<()> {
        self.handshake()?;
        self.exchange_info()?;
        self.transfer(message)?;
        self.finish()
    }

    /// Idle → Syncing → Acked, retransmitting SYNC on a fixed cadence.
    fn handshake(&mut self) -> Result<()> {
        for attempt in 1..=self.cfg.sync_max_retries {
            self.state = SessionState::Syncing;
            self.link.send(&Packet::Sync)?;
            info!("[TX] Sent SYNC (try {})", attempt);

            let deadline = Instant::now() + self.cfg.sync_timeout;
            while Instant::now() < deadline {
                match self.link.recv()? {
                    Some(Packet::Ack) => {
                        info!("[TX] Received ACK");
                        self.state = SessionState::Acked;
                        return Ok(());
                    }
                    Some(Packet::Error(code)) => return Err(self.fail_peer(code)),
                    Some(other) => {
                        debug!("[TX] Dropping {:?} while waiting for ACK", other.kind())
                    }
                    None => {}
                }
            }
        }

        self.state = SessionState::Failed;
        warn!("[!] Failed to handshake with receiver");
        Err(LinkError::HandshakeFailed(self.cfg.sync_max_retries))
    }

    /// Acked → InfoExchanged → Transferring, or ERR out on bad
    /// capabilities. Only `capabilities == 0x00` is valid for now.
    fn exchange_info(&mut self) -> Result<()> {
        loop {
            match self.link.recv()? {
                Some(Packet::Info(peer)) => {
                    info!(
                        "[TX] Received INFO: id=0x{:08X}, fw={}.{}, capabilities=0x{:02X}",
                        peer.receiver_id, peer.firmware_major, peer.firmware_minor, peer.capabilities
                    );
                    self.state = SessionState::InfoExchanged;
                    if peer.capabilities != 0x00 {
                        self.link
                            .send(&Packet::Error(ErrorCode::InvalidCapabilities))?;
                        self.state = SessionState::Failed;
                        warn!("[!] Rejected receiver capabilities 0x{:02X}", peer.capabilities);
                        return Err(LinkError::InvalidCapabilities(peer.capabilities));
                    }
                    self.state = SessionState::Transferring;
                    return Ok(());
                }
                Some(Packet::Error(code)) => return Err(self.fail_peer(code)),
                Some(other) => debug!("[TX] Dropping {:?} while waiting for INFO", other.kind()),
                None => {}
            }
        }
    }

    /// Transferring → Closing: chunked DATA packets, then exactly one END.
    fn transfer(&mut self, message: &[u8]) -> Result<()> {
        let total = message.chunks(self.cfg.data_chunk).count();
        for (i, chunk) in message.chunks(self.cfg.data_chunk).enumerate() {
            self.link.send(&Packet::Data(chunk.to_vec()))?;
            info!("[TX] Sent DATA {}/{} ({} bytes)", i + 1, total, chunk.len());
            sleep(self.cfg.data_gap);
        }
        self.link.send(&Packet::End)?;
        info!("[TX] Sent END");
        self.state = SessionState::Closing;
        Ok(())
    }

    /// Closing → Closed once the receiver's final ACK arrives.
    fn finish(&mut self) -> Result<()> {
        loop {
            match self.link.recv()? {
                Some(Packet::Ack) => {
                    info!("[TX] Received final ACK");
                    self.state = SessionState::Closed;
                    return Ok(());
                }
                Some(Packet::Error(code)) => return Err(self.fail_peer(code)),
                Some(other) => debug!("[TX] Dropping {:?} while closing", other.kind()),
                None => {}
            }
        }
    }

    fn fail_peer(&mut self, code: ErrorCode) -> LinkError {
        self.state = SessionState::Failed;
        warn!("[!] Received ERR code 0x{:02X} ({})", code.to_wire(), code);
        LinkError::Peer(code)
    }
}

/// Listening role: answer SYNC, advertise INFO, accumulate DATA until END.
pub struct Receiver<T: PcmDuplex> {
    link: AudioLink<T>,
    cfg: LinkConfig,
    state: SessionState,
    message: Vec<u8>,
}

impl<T: PcmDuplex> Receiver<T> {
    pub fn new(audio: T, modem: &AfskConfig, cfg: LinkConfig) -> Result<Self> {
        Ok(Self {
            link: AudioLink::new(audio, modem, &cfg)?,
            cfg,
            state: SessionState::Idle,
            message: Vec::new(),
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive a complete session and return the accumulated message.
    pub fn run(&mut self) -> Result<Vec<u8>> {
        self.await_sync()?;
        self.send_info()?;
        self.collect()
    }

    /// Idle until a SYNC arrives. Anything else is dropped; the decoder is
    /// reset periodically so a desynchronized bit clock cannot wedge us.
    fn await_sync(&mut self) -> Result<()> {
        info!("[#] Waiting for SYNC packet...");
        let mut failures: u32 = 0;
        loop {
            match self.link.recv()? {
                Some(Packet::Sync) => {
                    info!("[RX] SYNC received");
                    self.state = SessionState::Syncing;
                    return Ok(());
                }
                Some(Packet::Error(code)) => return Err(self.fail_peer(code)),
                Some(other) => debug!("[RX] Dropping {:?} while idle", other.kind()),
                None => {
                    failures += 1;
                    if failures % self.cfg.reset_interval == 0 {
                        debug!("[RX] Still waiting for SYNC, resetting decoder");
                        self.link.reset_decoder();
                    }
                }
            }
        }
    }

    /// Syncing → Acked → InfoExchanged: ACK first, then our INFO.
    fn send_info(&mut self) -> Result<()> {
        self.link.send(&Packet::Ack)?;
        self.state = SessionState::Acked;
        info!("[RX] Sent ACK");

        let advertised = ReceiverInfo {
            receiver_id: self.cfg.receiver_id,
            firmware_major: self.cfg.firmware_major,
            firmware_minor: self.cfg.firmware_minor,
            capabilities: self.cfg.capabilities,
        };
        self.link.send(&Packet::Info(advertised))?;
        self.state = SessionState::InfoExchanged;
        info!(
            "[RX] Sent INFO: id=0x{:08X}, fw={}.{}, capabilities=0x{:02X}",
            advertised.receiver_id,
            advertised.firmware_major,
            advertised.firmware_minor,
            advertised.capabilities
        );
        Ok(())
    }

    /// Transferring → Closing → Closed: DATA in arrival order until END,
    /// then exactly one final ACK. Overfilling the message buffer is an
    /// explicit failure; an exact fill is accepted.
    fn collect(&mut self) -> Result<Vec<u8>> {
        self.state = SessionState::Transferring;
        loop {
            match self.link.recv()? {
                Some(Packet::Data(payload)) => {
                    if self.message.len() + payload.len() > self.cfg.message_capacity {
                        self.state = SessionState::Failed;
                        warn!("[!] Message buffer overflow, dropping session");
                        return Err(LinkError::MessageOverflow(self.cfg.message_capacity));
                    }
                    info!("[RX] Received DATA ({} bytes)", payload.len());
                    self.message.extend_from_slice(&payload);
                }
                Some(Packet::End) => {
                    info!("[RX] Received END");
                    self.state = SessionState::Closing;
                    self.link.send(&Packet::Ack)?;
                    info!("[RX] Sent final ACK");
                    self.state = SessionState::Closed;
                    return Ok(std::mem::take(&mut self.message));
                }
                Some(Packet::Error(code)) => return Err(self.fail_peer(code)),
                Some(Packet::Nack) => debug!("[RX] Ignoring NACK"),
                Some(other) => debug!("[RX] Dropping {:?} during transfer", other.kind()),
                None => {}
            }
        }
    }

    fn fail_peer(&mut self, code: ErrorCode) -> LinkError {
        self.state = SessionState::Failed;
        warn!("[!] Received ERR code 0x{:02X} ({})", code.to_wire(), code);
        LinkError::Peer(code)
    }
}
