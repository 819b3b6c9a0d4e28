mod audio;

use clap::{Parser, Subcommand};
use rand::Rng;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::thread;
use tonelink_core::{
    loopback_pair, AfskConfig, AfskDecoder, AfskEncoder, LinkConfig, Receiver, Transmitter,
};

#[derive(Parser)]
#[command(name = "tonelink")]
#[command(about = "Point-to-point messaging over an AFSK audio channel")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Transmit a message over the default audio devices
    Tx {
        /// Message to send
        #[arg(short, long, default_value = "Hello, World!")]
        message: String,
    },

    /// Listen on the default audio devices and print the received message
    Rx,

    /// In-process loopback: modem bit-error rate plus a full session transfer
    Loopback {
        /// Number of random bits for the bit-error-rate measurement
        #[arg(long, default_value = "6000")]
        bits: usize,

        /// Write the modulated test signal to a WAV file
        #[arg(long, value_name = "PATH")]
        wav: Option<PathBuf>,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Tx { message } => run_tx(&message),
        Commands::Rx => run_rx(),
        Commands::Loopback { bits, wav } => run_loopback(bits, wav.as_deref()),
    };

    if let Err(err) = result {
        eprintln!("[!] {}", err);
        std::process::exit(1);
    }
}

fn run_tx(message: &str) -> Result<(), Box<dyn Error>> {
    let modem = AfskConfig::default();
    println!(
        "[#] TX starting: sample_rate={}, baud={}",
        modem.sample_rate, modem.baud
    );

    let audio = audio::CpalDuplex::open(modem.sample_rate as u32)?;
    let mut transmitter = Transmitter::new(audio, &modem, LinkConfig::default())?;
    transmitter.run(message.as_bytes())?;

    println!("[#] Transfer complete");
    Ok(())
}

fn run_rx() -> Result<(), Box<dyn Error>> {
    let modem = AfskConfig::default();
    println!(
        "[#] RX starting: sample_rate={}, baud={}",
        modem.sample_rate, modem.baud
    );

    let audio = audio::CpalDuplex::open(modem.sample_rate as u32)?;
    let mut receiver = Receiver::new(audio, &modem, LinkConfig::default())?;
    let message = receiver.run()?;

    println!("[#] Full message received:");
    println!("{}", String::from_utf8_lossy(&message));
    Ok(())
}

fn run_loopback(nbits: usize, wav: Option<&Path>) -> Result<(), Box<dyn Error>> {
    let modem = AfskConfig::default();
    println!(
        "[#] AFSK stream initialized: {} bps, {}/{} Hz @ {} Hz",
        modem.baud, modem.mark_hz, modem.space_hz, modem.sample_rate
    );

    // Modem-level loopback over random bits.
    let mut rng = rand::thread_rng();
    let bits: Vec<u8> = (0..nbits).map(|_| rng.gen_range(0..=1u8)).collect();

    let mut encoder = AfskEncoder::new(&modem)?;
    let mut decoder = AfskDecoder::new(&modem)?;
    let pcm = encoder.encode_bits(&bits);
    let mut decoded = Vec::with_capacity(nbits);
    decoder.decode_pcm(&pcm, &mut decoded, None, nbits);

    let errors = bits.iter().zip(&decoded).filter(|(a, b)| a != b).count()
        + bits.len().saturating_sub(decoded.len());
    let ber = errors as f64 / nbits.max(1) as f64;
    println!(
        "[#] Modem loopback: {} bits, {} errors, BER={:.4}%",
        nbits,
        errors,
        ber * 100.0
    );

    if let Some(path) = wav {
        write_wav(path, &pcm, modem.sample_rate as u32)?;
        println!("[#] Wrote {} samples to {}", pcm.len(), path.display());
    }

    // Session-level loopback across two threads. A 7-byte chunk splits the
    // message into "Hello, " and "World!".
    let (t_end, r_end) = loopback_pair();
    let rx_thread = thread::spawn(move || -> tonelink_core::Result<Vec<u8>> {
        let mut receiver = Receiver::new(r_end, &AfskConfig::default(), LinkConfig::default())?;
        receiver.run()
    });

    let link_cfg = LinkConfig {
        data_chunk: 7,
        ..LinkConfig::default()
    };
    let mut transmitter = Transmitter::new(t_end, &modem, link_cfg)?;
    transmitter.run(b"Hello, World!")?;

    let message = match rx_thread.join() {
        Ok(result) => result?,
        Err(_) => return Err("receiver thread panicked".into()),
    };
    println!("[#] Session loopback message:");
    println!("------------------------");
    println!("{}", String::from_utf8_lossy(&message));
    println!("------------------------");
    Ok(())
}

/// 16-bit PCM mono RIFF/WAVE, clamped and scaled from f32.
fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<(), Box<dyn Error>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for &sample in samples {
        let clamped = sample.max(-1.0).min(1.0);
        writer.write_sample((clamped * 32767.0) as i16)?;
    }
    writer.finalize()?;
    Ok(())
}
