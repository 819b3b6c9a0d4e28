//! Two-tone AFSK modem.
//!
//! The encoder produces phase-continuous PCM from bits; the decoder runs a
//! pair of Goertzel resonators over symbol-length windows and decides each
//! bit from the mark/space power difference. Symbol timing is open-loop on
//! both sides: a fractional-sample accumulator keeps the average symbol
//! length equal to the exact `sample_rate / baud` even when that ratio is
//! not an integer.

use crate::error::{LinkError, Result};
use std::f64::consts::PI;

/// Smallest symbol window the decoder will integrate over.
const MIN_SYMBOL_SAMPLES: usize = 4;

/// Phase magnitude above which the encoder reduces modulo 2π. Wrapping on
/// every sample costs more than the precision it buys at these magnitudes.
const PHASE_WRAP_LIMIT: f64 = 1e6;

/// Modem parameters, fixed for the lifetime of a session.
///
/// Both peers must agree on every field: the Goertzel coefficients are
/// derived from `sample_rate`, so mismatched rates do not interoperate.
#[derive(Debug, Clone, Copy)]
pub struct AfskConfig {
    pub sample_rate: f64,
    pub baud: f64,
    pub mark_hz: f64,
    pub space_hz: f64,
    /// Peak output level, clamped to [-1, 1] on encoder init.
    pub amplitude: f64,
    /// When true the decoder emits bits only; soft metrics are suppressed.
    pub hard_decisions: bool,
}

impl Default for AfskConfig {
    fn default() -> Self {
        Self {
            sample_rate: crate::DEFAULT_SAMPLE_RATE,
            baud: crate::DEFAULT_BAUD,
            mark_hz: crate::DEFAULT_MARK_HZ,
            space_hz: crate::DEFAULT_SPACE_HZ,
            amplitude: 0.8,
            hard_decisions: true,
        }
    }
}

impl AfskConfig {
    fn validate(&self) -> Result<()> {
        if self.sample_rate <= 0.0 || self.baud <= 0.0 || self.mark_hz <= 0.0 || self.space_hz <= 0.0
        {
            return Err(LinkError::InvalidConfig(format!(
                "sample rate, baud and tone frequencies must be positive \
                 (got {} Hz, {} Bd, {}/{} Hz)",
                self.sample_rate, self.baud, self.mark_hz, self.space_hz
            )));
        }
        Ok(())
    }

    fn samples_per_symbol(&self) -> f64 {
        self.sample_rate / self.baud
    }
}

fn goertzel_coeff(tone_hz: f64, sample_rate: f64) -> f64 {
    2.0 * (2.0 * PI * tone_hz / sample_rate).cos()
}

/// Round-to-nearest, matching the symbol clock on both sides.
fn round_symbol(exact: f64) -> usize {
    (exact + 0.5).floor() as usize
}

/// Bits → PCM. One tone per bit (1 → mark, 0 → space), sine phase carried
/// across symbols and across calls.
#[derive(Debug)]
pub struct AfskEncoder {
    amplitude: f64,
    phase: f64,
    phase_inc_mark: f64,
    phase_inc_space: f64,
    samples_per_symbol: f64,
    symbol_accum: f64,
}

impl AfskEncoder {
    pub fn new(cfg: &AfskConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self {
            amplitude: cfg.amplitude.clamp(-1.0, 1.0),
            phase: 0.0,
            phase_inc_mark: 2.0 * PI * cfg.mark_hz / cfg.sample_rate,
            phase_inc_space: 2.0 * PI * cfg.space_hz / cfg.sample_rate,
            samples_per_symbol: cfg.samples_per_symbol(),
            symbol_accum: 0.0,
        })
    }

    /// Number of samples the next `nbits` symbols will occupy, given the
    /// current fractional carry. Does not change encoder state.
    pub fn samples_for(&self, nbits: usize) -> usize {
        let mut accum = self.symbol_accum;
        let mut total = 0usize;
        for _ in 0..nbits {
            let exact = self.samples_per_symbol + accum;
            let n = round_symbol(exact);
            accum = exact - n as f64;
            total += n;
        }
        total
    }

    /// Modulate `bits` into freshly allocated PCM.
    pub fn encode_bits(&mut self, bits: &[u8]) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.samples_for(bits.len()));
        for &bit in bits {
            let inc = if bit != 0 {
                self.phase_inc_mark
            } else {
                self.phase_inc_space
            };
            for _ in 0..self.next_symbol_len() {
                out.push((self.amplitude * self.phase.sin()) as f32);
                self.phase += inc;
                if self.phase > PHASE_WRAP_LIMIT {
                    self.phase %= 2.0 * PI;
                }
            }
        }
        out
    }

    /// Modulate `bits` into a caller-supplied buffer.
    ///
    /// A buffer too small for the whole bit sequence is rejected before any
    /// state mutation; the encoder never truncates mid-symbol. Returns the
    /// number of samples written.
    pub fn encode_bits_into(&mut self, bits: &[u8], out: &mut [f32]) -> Result<usize> {
        let needed = self.samples_for(bits.len());
        if out.len() < needed {
            return Err(LinkError::BufferTooSmall {
                needed,
                have: out.len(),
            });
        }
        let mut produced = 0usize;
        for &bit in bits {
            let inc = if bit != 0 {
                self.phase_inc_mark
            } else {
                self.phase_inc_space
            };
            for _ in 0..self.next_symbol_len() {
                out[produced] = (self.amplitude * self.phase.sin()) as f32;
                produced += 1;
                self.phase += inc;
                if self.phase > PHASE_WRAP_LIMIT {
                    self.phase %= 2.0 * PI;
                }
            }
        }
        Ok(produced)
    }

    /// Length of the next symbol and the carried residual.
    fn next_symbol_len(&mut self) -> usize {
        let exact = self.samples_per_symbol + self.symbol_accum;
        let n = round_symbol(exact);
        self.symbol_accum = exact - n as f64;
        n
    }
}

/// One single-bin resonator: `s = x + coeff*s1 - s2`.
#[derive(Debug)]
struct Goertzel {
    coeff: f64,
    s1: f64,
    s2: f64,
}

impl Goertzel {
    fn new(tone_hz: f64, sample_rate: f64) -> Self {
        Self {
            coeff: goertzel_coeff(tone_hz, sample_rate),
            s1: 0.0,
            s2: 0.0,
        }
    }

    fn update(&mut self, x: f64) {
        let s = x + self.coeff * self.s1 - self.s2;
        self.s2 = self.s1;
        self.s1 = s;
    }

    fn power(&self) -> f64 {
        self.s1 * self.s1 + self.s2 * self.s2 - self.coeff * self.s1 * self.s2
    }

    fn clear(&mut self) {
        self.s1 = 0.0;
        self.s2 = 0.0;
    }
}

/// PCM → bits, symbol-synchronous.
///
/// Timing is open-loop: the first symbol boundary is assumed at sample
/// `n_target`, and drift against a non-integer `sample_rate / baud` is
/// absorbed by wobbling the window length by ±1 sample. There is no
/// preamble-based bit-timing recovery; callers that lose alignment
/// re-establish sync with [`AfskDecoder::reset`].
#[derive(Debug)]
pub struct AfskDecoder {
    samples_per_symbol: f64,
    n: usize,
    n_target: usize,
    frac_carry: f64,
    idx_in_symbol: usize,
    mark: Goertzel,
    space: Goertzel,
    hard_decisions: bool,
}

impl AfskDecoder {
    pub fn new(cfg: &AfskConfig) -> Result<Self> {
        cfg.validate()?;
        let exact = cfg.samples_per_symbol();
        let n = round_symbol(exact).max(MIN_SYMBOL_SAMPLES);
        Ok(Self {
            samples_per_symbol: exact,
            n,
            n_target: n,
            frac_carry: exact - n as f64,
            idx_in_symbol: 0,
            mark: Goertzel::new(cfg.mark_hz, cfg.sample_rate),
            space: Goertzel::new(cfg.space_hz, cfg.sample_rate),
            hard_decisions: cfg.hard_decisions,
        })
    }

    /// Process PCM in order, appending up to `max_bits` decisions to
    /// `bits_out` (and, when soft metrics are enabled and a sink is given,
    /// the signed mark-minus-space power per bit to `soft_out`). Returns
    /// the number of bits emitted.
    ///
    /// Once `max_bits` decisions have been emitted the resonators keep
    /// running but further decisions are discarded.
    pub fn decode_pcm(
        &mut self,
        pcm: &[f32],
        bits_out: &mut Vec<u8>,
        mut soft_out: Option<&mut Vec<f64>>,
        max_bits: usize,
    ) -> usize {
        let mut emitted = 0usize;
        for &sample in pcm {
            let x = f64::from(sample);
            self.mark.update(x);
            self.space.update(x);
            self.idx_in_symbol += 1;

            if self.idx_in_symbol >= self.n_target {
                let metric = self.mark.power() - self.space.power();
                if emitted < max_bits {
                    bits_out.push(u8::from(metric >= 0.0));
                    if !self.hard_decisions {
                        if let Some(soft) = soft_out.as_mut() {
                            soft.push(metric);
                        }
                    }
                    emitted += 1;
                }

                self.mark.clear();
                self.space.clear();
                self.idx_in_symbol = 0;
                self.advance_symbol_clock();
            }
        }
        emitted
    }

    /// Zero the resonators and the in-symbol index, keeping configuration
    /// and the fractional carry. Called when upstream declares loss of sync.
    pub fn reset(&mut self) {
        self.mark.clear();
        self.space.clear();
        self.idx_in_symbol = 0;
    }

    /// Fold the fractional residue into the next window length.
    fn advance_symbol_clock(&mut self) {
        self.frac_carry += self.samples_per_symbol - self.n as f64;
        self.n_target = if self.frac_carry >= 0.5 {
            self.frac_carry -= 1.0;
            self.n + 1
        } else if self.frac_carry <= -0.5 {
            self.frac_carry += 1.0;
            self.n - 1
        } else {
            self.n
        };
        if self.n_target < MIN_SYMBOL_SAMPLES {
            self.n_target = MIN_SYMBOL_SAMPLES;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn config(sample_rate: f64, baud: f64) -> AfskConfig {
        AfskConfig {
            sample_rate,
            baud,
            ..AfskConfig::default()
        }
    }

    fn random_bits(n: usize, seed: u64) -> Vec<u8> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n).map(|_| rng.gen_range(0..=1u8)).collect()
    }

    #[test]
    fn test_invalid_config_rejected() {
        for bad in [
            config(0.0, 1200.0),
            config(48_000.0, 0.0),
            AfskConfig {
                mark_hz: -1200.0,
                ..AfskConfig::default()
            },
            AfskConfig {
                space_hz: 0.0,
                ..AfskConfig::default()
            },
        ] {
            assert!(AfskEncoder::new(&bad).is_err());
            assert!(AfskDecoder::new(&bad).is_err());
        }
    }

    #[test]
    fn test_amplitude_clamped() {
        let cfg = AfskConfig {
            amplitude: 2.5,
            ..AfskConfig::default()
        };
        let mut enc = AfskEncoder::new(&cfg).unwrap();
        let pcm = enc.encode_bits(&[1, 0, 1, 0]);
        assert!(pcm.iter().all(|s| s.abs() <= 1.0 + 1e-6));
    }

    #[test]
    fn test_sample_count_integer_rate() {
        // 48000 / 1200 = 40 samples per bit, exactly.
        let mut enc = AfskEncoder::new(&config(48_000.0, 1200.0)).unwrap();
        let pcm = enc.encode_bits(&random_bits(250, 7));
        assert_eq!(pcm.len(), 250 * 40);
    }

    #[test]
    fn test_sample_count_fractional_rate() {
        // 44100 / 1200 = 36.75: total length must stay within 1 sample of
        // the exact product.
        let nbits = 1000;
        let mut enc = AfskEncoder::new(&config(44_100.0, 1200.0)).unwrap();
        let pcm = enc.encode_bits(&random_bits(nbits, 11));
        let exact = nbits as f64 * 44_100.0 / 1200.0;
        assert!(
            (pcm.len() as f64 - exact).abs() <= 1.0,
            "{} samples vs exact {}",
            pcm.len(),
            exact
        );
    }

    #[test]
    fn test_phase_continuity_across_calls() {
        let cfg = AfskConfig::default();
        let mut enc = AfskEncoder::new(&cfg).unwrap();
        let mut pcm = enc.encode_bits(&random_bits(100, 3));
        pcm.extend(enc.encode_bits(&random_bits(100, 4)));

        // |sin(p + inc) - sin(p)| <= inc, so any step larger than
        // amplitude * max(inc) is a phase discontinuity.
        let max_inc = 2.0 * PI * cfg.space_hz / cfg.sample_rate;
        let bound = (cfg.amplitude * max_inc) as f32 + 1e-5;
        for pair in pcm.windows(2) {
            assert!(
                (pair[1] - pair[0]).abs() <= bound,
                "step {} exceeds {}",
                (pair[1] - pair[0]).abs(),
                bound
            );
        }
    }

    #[test]
    fn test_noise_free_loopback_ber() {
        let cfg = AfskConfig::default();
        let bits = random_bits(6000, 0xA5A5);
        let mut enc = AfskEncoder::new(&cfg).unwrap();
        let mut dec = AfskDecoder::new(&cfg).unwrap();

        let pcm = enc.encode_bits(&bits);
        let mut decoded = Vec::with_capacity(bits.len());
        dec.decode_pcm(&pcm, &mut decoded, None, bits.len());

        assert_eq!(decoded.len(), bits.len());
        let errors = bits
            .iter()
            .zip(&decoded)
            .filter(|(a, b)| a != b)
            .count();
        let ber = errors as f64 / bits.len() as f64;
        assert!(ber <= 0.005, "BER {} over {} bits", ber, bits.len());
    }

    #[test]
    fn test_decoder_tracks_fractional_symbol_rate() {
        // 36.75 samples per symbol; over many symbols the emitted rate must
        // match to within 0.01 sample even when fed in awkward chunks.
        let cfg = config(44_100.0, 1200.0);
        let mut dec = AfskDecoder::new(&cfg).unwrap();

        let exact = 44_100.0 / 1200.0;
        let total_samples = (exact * 20_000.0) as usize;
        let silence = vec![0.0f32; 1000];

        let mut bits = Vec::new();
        let mut fed = 0usize;
        while fed < total_samples {
            let n = silence.len().min(total_samples - fed);
            dec.decode_pcm(&silence[..n], &mut bits, None, usize::MAX);
            fed += n;
        }

        let avg = total_samples as f64 / bits.len() as f64;
        assert!(
            (avg - exact).abs() <= 0.01,
            "average symbol length {} vs exact {}",
            avg,
            exact
        );
    }

    #[test]
    fn test_soft_metrics_follow_decisions() {
        let cfg = AfskConfig {
            hard_decisions: false,
            ..AfskConfig::default()
        };
        let bits = [1, 0, 1, 1, 0, 0, 1, 0];
        let mut enc = AfskEncoder::new(&cfg).unwrap();
        let mut dec = AfskDecoder::new(&cfg).unwrap();

        let pcm = enc.encode_bits(&bits);
        let mut decoded = Vec::new();
        let mut soft = Vec::new();
        dec.decode_pcm(&pcm, &mut decoded, Some(&mut soft), bits.len());

        assert_eq!(decoded.len(), soft.len());
        for (bit, metric) in decoded.iter().zip(&soft) {
            assert_eq!(*bit == 1, *metric >= 0.0, "metric {} for bit {}", metric, bit);
        }
    }

    #[test]
    fn test_hard_decisions_suppress_soft_output() {
        let cfg = AfskConfig::default();
        let mut enc = AfskEncoder::new(&cfg).unwrap();
        let mut dec = AfskDecoder::new(&cfg).unwrap();

        let pcm = enc.encode_bits(&[1, 0, 1]);
        let mut decoded = Vec::new();
        let mut soft = Vec::new();
        dec.decode_pcm(&pcm, &mut decoded, Some(&mut soft), 3);
        assert_eq!(decoded.len(), 3);
        assert!(soft.is_empty());
    }

    #[test]
    fn test_max_bits_caps_output() {
        let cfg = AfskConfig::default();
        let mut enc = AfskEncoder::new(&cfg).unwrap();
        let mut dec = AfskDecoder::new(&cfg).unwrap();

        let pcm = enc.encode_bits(&random_bits(10, 9));
        let mut decoded = Vec::new();
        let emitted = dec.decode_pcm(&pcm, &mut decoded, None, 4);
        assert_eq!(emitted, 4);
        assert_eq!(decoded.len(), 4);
    }

    #[test]
    fn test_reset_restores_symbol_alignment() {
        let cfg = AfskConfig::default();
        let bits = random_bits(64, 21);
        let mut enc = AfskEncoder::new(&cfg).unwrap();
        let mut dec = AfskDecoder::new(&cfg).unwrap();

        // Swallow a partial symbol of unrelated signal, then resynchronize.
        let stray: Vec<f32> = (0..17).map(|i| (i as f32 * 0.7).sin() * 0.3).collect();
        let mut scratch = Vec::new();
        dec.decode_pcm(&stray, &mut scratch, None, usize::MAX);
        dec.reset();

        let pcm = enc.encode_bits(&bits);
        let mut decoded = Vec::new();
        dec.decode_pcm(&pcm, &mut decoded, None, bits.len());
        assert_eq!(decoded, bits);
    }

    #[test]
    fn test_encode_into_rejects_short_buffer() {
        let cfg = AfskConfig::default();
        let bits = [1u8, 0, 1, 0];
        let mut enc = AfskEncoder::new(&cfg).unwrap();

        let mut short = vec![0.0f32; 10];
        match enc.encode_bits_into(&bits, &mut short) {
            Err(LinkError::BufferTooSmall { needed, have }) => {
                assert_eq!(needed, 160);
                assert_eq!(have, 10);
            }
            other => panic!("Expected BufferTooSmall, got {:?}", other),
        }

        // The failed call must not have advanced phase or carry: the next
        // encode matches a fresh encoder exactly.
        let mut fresh = AfskEncoder::new(&cfg).unwrap();
        assert_eq!(enc.encode_bits(&bits), fresh.encode_bits(&bits));
    }

    #[test]
    fn test_encode_into_matches_vec_output() {
        let cfg = AfskConfig::default();
        let bits = random_bits(32, 5);
        let mut enc_a = AfskEncoder::new(&cfg).unwrap();
        let mut enc_b = AfskEncoder::new(&cfg).unwrap();

        let expected = enc_a.encode_bits(&bits);
        let mut buf = vec![0.0f32; expected.len()];
        let written = enc_b.encode_bits_into(&bits, &mut buf).unwrap();
        assert_eq!(written, expected.len());
        assert_eq!(buf, expected);
    }
}
