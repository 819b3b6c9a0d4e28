//! Blocking duplex adapter over the system's default audio devices.
//!
//! cpal drives audio through callbacks on its own thread; the session
//! engine wants blocking reads and writes. Two bounded channels bridge the
//! gap: the input callback pushes captured samples, the output callback
//! drains queued playback samples and pads with silence when the queue
//! runs dry.
//!
//! Note: `cpal::Stream` is not `Send`, so the session using this adapter
//! must run on the thread that opened it.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, Stream, StreamConfig};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;
use tonelink_core::{LinkError, PcmDuplex};

/// Per-direction queue depth in samples (~1.4 s at 48 kHz).
const CHANNEL_DEPTH: usize = 1 << 16;

/// How long a read blocks on a quiet microphone before yielding 0 samples.
const READ_WAIT: Duration = Duration::from_millis(20);

pub struct CpalDuplex {
    capture: Receiver<f32>,
    playback: Sender<f32>,
    _input: Stream,
    _output: Stream,
}

impl CpalDuplex {
    /// Open the default input and output devices as mono f32 streams at
    /// the given rate.
    pub fn open(sample_rate: u32) -> Result<Self, LinkError> {
        let host = cpal::default_host();
        let input = host
            .default_input_device()
            .ok_or_else(|| LinkError::Io("no default input device".into()))?;
        let output = host
            .default_output_device()
            .ok_or_else(|| LinkError::Io("no default output device".into()))?;

        let config = StreamConfig {
            channels: 1,
            sample_rate: SampleRate(sample_rate),
            buffer_size: BufferSize::Default,
        };

        let (capture_tx, capture_rx) = bounded::<f32>(CHANNEL_DEPTH);
        let (playback_tx, playback_rx) = bounded::<f32>(CHANNEL_DEPTH);

        let input_stream = input
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    for &sample in data {
                        // Drop samples once the session falls behind rather
                        // than stalling the audio thread.
                        let _ = capture_tx.try_send(sample);
                    }
                },
                |err| log::error!("[!] Input stream error: {}", err),
                None,
            )
            .map_err(|e| LinkError::Io(e.to_string()))?;

        let output_stream = output
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for slot in data.iter_mut() {
                        *slot = playback_rx.try_recv().unwrap_or(0.0);
                    }
                },
                |err| log::error!("[!] Output stream error: {}", err),
                None,
            )
            .map_err(|e| LinkError::Io(e.to_string()))?;

        input_stream
            .play()
            .map_err(|e| LinkError::Io(e.to_string()))?;
        output_stream
            .play()
            .map_err(|e| LinkError::Io(e.to_string()))?;

        Ok(Self {
            capture: capture_rx,
            playback: playback_tx,
            _input: input_stream,
            _output: output_stream,
        })
    }
}

impl PcmDuplex for CpalDuplex {
    fn read_pcm(&mut self, buf: &mut [f32]) -> tonelink_core::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        buf[0] = match self.capture.recv_timeout(READ_WAIT) {
            Ok(sample) => sample,
            Err(RecvTimeoutError::Timeout) => return Ok(0),
            Err(RecvTimeoutError::Disconnected) => {
                return Err(LinkError::Io("capture stream closed".into()))
            }
        };
        let mut n = 1;
        while n < buf.len() {
            match self.capture.try_recv() {
                Ok(sample) => {
                    buf[n] = sample;
                    n += 1;
                }
                Err(_) => break,
            }
        }
        Ok(n)
    }

    fn write_pcm(&mut self, samples: &[f32]) -> tonelink_core::Result<()> {
        for &sample in samples {
            self.playback
                .send(sample)
                .map_err(|_| LinkError::Io("playback stream closed".into()))?;
        }
        Ok(())
    }
}
