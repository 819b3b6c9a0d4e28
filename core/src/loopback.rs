//! In-memory PCM channel for in-process end-to-end tests.
//!
//! Each direction is a single shared slot: a bounded sample buffer, a
//! ready flag, and a condvar. The writer copies PCM in, sets the flag and
//! signals; the reader waits on the flag, consumes the buffer and clears
//! it. Reads time out to `Ok(0)` so a silent peer never deadlocks the
//! receive loop.

use crate::error::{LinkError, Result};
use crate::io::PcmDuplex;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Default per-direction buffer capacity in samples (one second at 48 kHz).
pub const LOOPBACK_CAPACITY: usize = 48_000;

const DEFAULT_READ_WAIT: Duration = Duration::from_millis(20);
const DEFAULT_WRITE_WAIT: Duration = Duration::from_millis(200);

struct Slot {
    samples: Vec<f32>,
    ready: bool,
}

struct Channel {
    slot: Mutex<Slot>,
    cond: Condvar,
    capacity: usize,
}

impl Channel {
    fn new(capacity: usize) -> Self {
        Self {
            slot: Mutex::new(Slot {
                samples: Vec::with_capacity(capacity),
                ready: false,
            }),
            cond: Condvar::new(),
            capacity,
        }
    }

    fn write(&self, samples: &[f32], wait: Duration) -> Result<()> {
        if samples.len() > self.capacity {
            return Err(LinkError::ChannelFull {
                needed: samples.len(),
                capacity: self.capacity,
            });
        }
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| LinkError::Io("loopback lock poisoned".into()))?;
        // Give the reader a chance to drain a pending buffer; if nobody is
        // listening, overwrite it like a real air channel would.
        if slot.ready {
            let (guard, _timeout) = self
                .cond
                .wait_timeout_while(slot, wait, |s| s.ready)
                .map_err(|_| LinkError::Io("loopback lock poisoned".into()))?;
            slot = guard;
        }
        slot.samples.clear();
        slot.samples.extend_from_slice(samples);
        slot.ready = true;
        self.cond.notify_all();
        Ok(())
    }

    fn read(&self, buf: &mut [f32], wait: Duration) -> Result<usize> {
        let slot = self
            .slot
            .lock()
            .map_err(|_| LinkError::Io("loopback lock poisoned".into()))?;
        let (mut slot, timeout) = self
            .cond
            .wait_timeout_while(slot, wait, |s| !s.ready)
            .map_err(|_| LinkError::Io("loopback lock poisoned".into()))?;
        if timeout.timed_out() && !slot.ready {
            return Ok(0);
        }
        let n = slot.samples.len().min(buf.len());
        buf[..n].copy_from_slice(&slot.samples[..n]);
        slot.samples.clear();
        slot.ready = false;
        self.cond.notify_all();
        Ok(n)
    }
}

/// One endpoint of a bidirectional loopback pair.
pub struct LoopbackEnd {
    incoming: Arc<Channel>,
    outgoing: Arc<Channel>,
    read_wait: Duration,
    write_wait: Duration,
}

impl LoopbackEnd {
    /// How long a read blocks for a quiet channel before yielding `Ok(0)`.
    pub fn set_read_wait(&mut self, wait: Duration) {
        self.read_wait = wait;
    }

    /// How long a write waits for a pending buffer to drain before
    /// overwriting it.
    pub fn set_write_wait(&mut self, wait: Duration) {
        self.write_wait = wait;
    }
}

impl PcmDuplex for LoopbackEnd {
    fn read_pcm(&mut self, buf: &mut [f32]) -> Result<usize> {
        self.incoming.read(buf, self.read_wait)
    }

    fn write_pcm(&mut self, samples: &[f32]) -> Result<()> {
        self.outgoing.write(samples, self.write_wait)
    }
}

/// Two connected endpoints with the default per-direction capacity.
pub fn loopback_pair() -> (LoopbackEnd, LoopbackEnd) {
    loopback_pair_with_capacity(LOOPBACK_CAPACITY)
}

pub fn loopback_pair_with_capacity(capacity: usize) -> (LoopbackEnd, LoopbackEnd) {
    let a_to_b = Arc::new(Channel::new(capacity));
    let b_to_a = Arc::new(Channel::new(capacity));
    let a = LoopbackEnd {
        incoming: Arc::clone(&b_to_a),
        outgoing: Arc::clone(&a_to_b),
        read_wait: DEFAULT_READ_WAIT,
        write_wait: DEFAULT_WRITE_WAIT,
    };
    let b = LoopbackEnd {
        incoming: a_to_b,
        outgoing: b_to_a,
        read_wait: DEFAULT_READ_WAIT,
        write_wait: DEFAULT_WRITE_WAIT,
    };
    (a, b)
}
