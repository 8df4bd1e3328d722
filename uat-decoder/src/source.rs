//! Sample sources — push (timestamp, block) pairs into the main loop.
//!
//! Each source delivers whole-sample blocks over an mpsc channel; ownership
//! of the block transfers on send. Closing the channel signals a clean end
//! of input, an `Err` item signals failure. The SDR source runs its
//! blocking reads on a dedicated OS thread and polls a cancellation flag on
//! every read timeout.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tracing::info;

use uat_core::config::SdrSettings;
use uat_core::protocol::SAMPLES_PER_SECOND;
use uat_core::SampleFormat;

/// Samples per dispatched block (~0.25 s of signal).
pub const SAMPLES_PER_BLOCK: usize = 524_288;

pub type BlockItem = std::io::Result<(u64, Vec<u8>)>;

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Wall-clock timestamp for the start of a block that ends now.
fn block_start_timestamp(samples: usize) -> u64 {
    now_millis().saturating_sub(samples as u64 * 1000 / SAMPLES_PER_SECOND)
}

fn block_duration(samples: usize) -> Duration {
    Duration::from_micros(samples as u64 * 1_000_000 / SAMPLES_PER_SECOND)
}

// ---------------------------------------------------------------------------
// stdin
// ---------------------------------------------------------------------------

/// Read sample data from stdin until EOF.
pub async fn run_stdin_source(format: SampleFormat, tx: mpsc::Sender<BlockItem>) {
    let alignment = format.bytes_per_sample();
    let block_bytes = SAMPLES_PER_BLOCK * alignment;

    let mut stdin = tokio::io::stdin();
    let mut pending: Vec<u8> = Vec::with_capacity(block_bytes + 65536);
    let mut chunk = vec![0u8; 65536];

    loop {
        match stdin.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                pending.extend_from_slice(&chunk[..n]);
                while pending.len() >= block_bytes {
                    let rest = pending.split_off(block_bytes);
                    let block = std::mem::replace(&mut pending, rest);
                    let timestamp = block_start_timestamp(SAMPLES_PER_BLOCK);
                    if tx.send(Ok((timestamp, block))).await.is_err() {
                        return;
                    }
                }
            }
            Err(error) => {
                let _ = tx.send(Err(error)).await;
                return;
            }
        }
    }

    // flush the trailing whole samples
    let usable = pending.len() - pending.len() % alignment;
    if usable > 0 {
        pending.truncate(usable);
        let timestamp = block_start_timestamp(usable / alignment);
        let _ = tx.send(Ok((timestamp, pending))).await;
    }
    info!("end of stdin sample data");
}

// ---------------------------------------------------------------------------
// file
// ---------------------------------------------------------------------------

/// Read sample data from a file, optionally throttled to realtime. Block
/// timestamps advance by sample count from the moment reading started.
pub async fn run_file_source(
    path: std::path::PathBuf,
    format: SampleFormat,
    throttle: bool,
    tx: mpsc::Sender<BlockItem>,
) {
    let alignment = format.bytes_per_sample();
    let block_bytes = SAMPLES_PER_BLOCK * alignment;

    let mut file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(error) => {
            let _ = tx.send(Err(error)).await;
            return;
        }
    };

    let start = now_millis();
    let mut samples_sent: u64 = 0;

    loop {
        let mut block = vec![0u8; block_bytes];
        let mut filled = 0usize;
        while filled < block_bytes {
            match file.read(&mut block[filled..]).await {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(error) => {
                    let _ = tx.send(Err(error)).await;
                    return;
                }
            }
        }

        let usable = filled - filled % alignment;
        if usable == 0 {
            break;
        }
        block.truncate(usable);

        let samples = (usable / alignment) as u64;
        let timestamp = start + samples_sent * 1000 / SAMPLES_PER_SECOND;
        if tx.send(Ok((timestamp, block))).await.is_err() {
            return;
        }
        samples_sent += samples;

        if throttle {
            tokio::time::sleep(block_duration(samples as usize)).await;
        }
        if usable < block_bytes {
            break; // short read means EOF
        }
    }
    info!("end of file sample data: {}", path.display());
}

// ---------------------------------------------------------------------------
// SDR (SoapySDR, feature-gated)
// ---------------------------------------------------------------------------

/// UAT center frequency in Hz.
#[cfg(feature = "sdr")]
const UAT_FREQUENCY: f64 = 978_000_000.0;

/// Read timeout; the cancellation flag is polled at this interval.
#[cfg(feature = "sdr")]
const SDR_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Start the SDR read thread. Blocks on hardware reads with a 1 s timeout
/// and exits when `stop` is set or the channel closes. Samples are
/// delivered as CS16H.
#[cfg(feature = "sdr")]
pub fn spawn_sdr_source(
    device: String,
    settings: SdrSettings,
    stop: Arc<AtomicBool>,
    tx: mpsc::Sender<BlockItem>,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("sdr-read".to_string())
        .spawn(move || {
            if let Err(error) = run_sdr_thread(&device, &settings, &stop, &tx) {
                let _ = tx.blocking_send(Err(std::io::Error::other(error.to_string())));
            }
        })
}

#[cfg(feature = "sdr")]
fn run_sdr_thread(
    device: &str,
    settings: &SdrSettings,
    stop: &AtomicBool,
    tx: &mpsc::Sender<BlockItem>,
) -> Result<(), soapysdr::Error> {
    use soapysdr::Direction::Rx;
    use std::sync::atomic::Ordering;

    let dev = soapysdr::Device::new(device)?;
    dev.set_sample_rate(Rx, 0, SAMPLES_PER_SECOND as f64)?;
    dev.set_frequency(Rx, 0, UAT_FREQUENCY, ())?;
    if let Some(gain) = settings.gain_db {
        dev.set_gain_mode(Rx, 0, false)?;
        dev.set_gain(Rx, 0, gain)?;
    } else {
        dev.set_gain_mode(Rx, 0, true)?;
    }
    if settings.ppm != 0.0 {
        dev.set_frequency_correction(Rx, 0, settings.ppm)?;
    }
    if let Some(antenna) = &settings.antenna {
        dev.set_antenna(Rx, 0, antenna.as_str())?;
    }

    let mut stream = dev.rx_stream::<num_complex::Complex<i16>>(&[0])?;
    stream.activate(None)?;
    info!("SDR stream running on {device}");

    let mut buffer = vec![num_complex::Complex::<i16>::new(0, 0); SAMPLES_PER_BLOCK];
    let timeout_us = SDR_READ_TIMEOUT.as_micros() as i64;

    while !stop.load(Ordering::Relaxed) {
        match stream.read(&mut [&mut buffer[..]], timeout_us) {
            Ok(n) => {
                let mut block = Vec::with_capacity(n * 4);
                for sample in &buffer[..n] {
                    block.extend_from_slice(&sample.re.to_le_bytes());
                    block.extend_from_slice(&sample.im.to_le_bytes());
                }
                let timestamp = block_start_timestamp(n);
                if tx.blocking_send(Ok((timestamp, block))).is_err() {
                    break; // main loop is gone
                }
            }
            Err(error) if error.code == soapysdr::ErrorCode::Timeout => {
                tracing::warn!("SDR read timeout");
            }
            Err(error) => {
                stream.deactivate(None).ok();
                return Err(error);
            }
        }
    }

    stream.deactivate(None).ok();
    info!("SDR read thread exiting");
    Ok(())
}

#[cfg(not(feature = "sdr"))]
pub fn spawn_sdr_source(
    _device: String,
    _settings: SdrSettings,
    _stop: Arc<AtomicBool>,
    _tx: mpsc::Sender<BlockItem>,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    Err(std::io::Error::other(
        "this build has no SDR support; rebuild with --features sdr",
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
