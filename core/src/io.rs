//! Duplex PCM interface consumed by the session engine.
//!
//! Samples are mono `f32` in [-1, 1] at the session's configured rate.
//! Real audio hosts and the in-process loopback channel both implement
//! this, which keeps the session code deterministic to test.

use crate::error::Result;

pub trait PcmDuplex {
    /// Blocking read of up to `buf.len()` samples. `Ok(0)` means nothing
    /// arrived before the adapter's internal timeout; callers treat it as
    /// a quiet channel and retry.
    fn read_pcm(&mut self, buf: &mut [f32]) -> Result<usize>;

    /// Blocking write of all samples, or an error.
    fn write_pcm(&mut self, samples: &[f32]) -> Result<()>;
}
