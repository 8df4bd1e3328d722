//! uat-decoder: 978 MHz UAT receiver binary.
//!
//! Reads raw I/Q samples from stdin, a file, or an SDR; demodulates UAT
//! frames; and serves them as raw text and decoded JSON on stdout and TCP
//! listeners.
//!
//! Exit codes: 0 on clean end of input, 1 on abnormal termination, 64 on
//! usage errors.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info};

use uat_core::config::{parse_stream_settings, Config, InputSource, ListenAddr, SdrSettings};
use uat_core::{Receiver, SampleFormat};

mod output;
mod source;

use output::{render_batch, spawn_listener, Dispatch, OutputFormat};

const EXIT_NO_RESTART: u8 = 64;

#[derive(Parser)]
#[command(name = "uat-decoder", version, about = "UAT 978 MHz receiver and decoder")]
struct Cli {
    /// Write raw messages to stdout
    #[arg(long)]
    raw_stdout: bool,

    /// Write decoded JSON to stdout
    #[arg(long)]
    json_stdout: bool,

    /// Sample format of the input data
    #[arg(long, default_value = "CU8")]
    format: String,

    /// Read sample data from stdin
    #[arg(long, group = "input")]
    stdin: bool,

    /// Read sample data from a file
    #[arg(long, group = "input")]
    file: Option<PathBuf>,

    /// Throttle file input to realtime
    #[arg(long, requires = "file")]
    file_throttle: bool,

    /// Read sample data from the named SDR device (CS16H)
    #[arg(long, group = "input")]
    sdr: Option<String>,

    /// Enable SDR hardware AGC
    #[arg(long)]
    sdr_auto_gain: bool,

    /// SDR gain in dB
    #[arg(long)]
    sdr_gain: Option<f64>,

    /// SDR frequency correction in PPM
    #[arg(long, default_value_t = 0.0)]
    sdr_ppm: f64,

    /// SDR antenna name
    #[arg(long)]
    sdr_antenna: Option<String>,

    /// SDR stream settings as key=value,key=value
    #[arg(long)]
    sdr_stream_settings: Option<String>,

    /// Listen for connections on [host:]port and provide raw messages
    #[arg(long = "raw-port", value_name = "[HOST:]PORT")]
    raw_port: Vec<ListenAddr>,

    /// Listen for connections on [host:]port and provide decoded JSON
    #[arg(long = "json-port", value_name = "[HOST:]PORT")]
    json_port: Vec<ListenAddr>,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<Config> {
        let input = match (self.stdin, &self.file, &self.sdr) {
            (true, None, None) => InputSource::Stdin,
            (false, Some(path), None) => InputSource::File {
                path: path.clone(),
                throttle: self.file_throttle,
            },
            (false, None, Some(device)) => InputSource::Sdr {
                device: device.clone(),
            },
            _ => return Err(anyhow!("exactly one of --stdin, --file, or --sdr must be used")),
        };

        // the SDR delivers CS16H regardless of the requested file format
        let sample_format = if matches!(input, InputSource::Sdr { .. }) {
            SampleFormat::Cs16H
        } else {
            self.format.parse::<SampleFormat>()?
        };

        let stream_settings = match &self.sdr_stream_settings {
            Some(settings) => parse_stream_settings(settings)?,
            None => Vec::new(),
        };

        let config = Config {
            sample_format,
            input,
            sdr: SdrSettings {
                gain_db: self.sdr_gain,
                auto_gain: self.sdr_auto_gain,
                ppm: self.sdr_ppm,
                antenna: self.sdr_antenna.clone(),
                stream_settings,
            },
            raw_listen: self.raw_port.clone(),
            json_listen: self.json_port.clone(),
            raw_stdout: self.raw_stdout,
            json_stdout: self.json_stdout,
            reconnect_interval: std::time::Duration::from_secs(30),
        };
        config.validate()?;
        Ok(config)
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => {
            let _ = error.print();
            return ExitCode::from(EXIT_NO_RESTART);
        }
    };

    let config = match cli.into_config() {
        Ok(config) => config,
        Err(error) => {
            error!("{error:#}");
            return ExitCode::from(EXIT_NO_RESTART);
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => {
            error!("failed to start runtime: {error}");
            return ExitCode::FAILURE;
        }
    };

    let local = tokio::task::LocalSet::new();
    match local.block_on(&runtime, run(config)) {
        Ok(()) => {
            info!("ran out of things to do, exiting");
            ExitCode::SUCCESS
        }
        Err(RunError::Usage(error)) => {
            error!("{error:#}");
            ExitCode::from(EXIT_NO_RESTART)
        }
        Err(RunError::Abnormal(error)) => {
            error!("{error:#}");
            ExitCode::FAILURE
        }
    }
}

enum RunError {
    /// Startup misconfiguration; the supervisor should not restart us.
    Usage(anyhow::Error),
    Abnormal(anyhow::Error),
}

async fn run(config: Config) -> Result<(), RunError> {
    let dispatch = Dispatch::new();

    // bind all listeners before any samples flow
    for (addrs, format) in [
        (&config.raw_listen, OutputFormat::Raw),
        (&config.json_listen, OutputFormat::Json),
    ] {
        for addr in addrs {
            let listener = TcpListener::bind((addr.host.as_str(), addr.port))
                .await
                .with_context(|| format!("could not listen on {addr}"))
                .map_err(RunError::Usage)?;
            info!("listening for connections on {addr}");
            spawn_listener(listener, dispatch.clone(), format);
        }
    }

    let (block_tx, mut block_rx) = mpsc::channel(2);
    let stop = Arc::new(AtomicBool::new(false));

    let mut sdr_thread = None;
    match config.input.clone() {
        InputSource::Stdin => {
            tokio::task::spawn_local(source::run_stdin_source(config.sample_format, block_tx));
        }
        InputSource::File { path, throttle } => {
            tokio::task::spawn_local(source::run_file_source(
                path,
                config.sample_format,
                throttle,
                block_tx,
            ));
        }
        InputSource::Sdr { device } => {
            let handle = source::spawn_sdr_source(device, config.sdr.clone(), stop.clone(), block_tx)
                .map_err(|error| RunError::Usage(error.into()))?;
            sdr_thread = Some(handle);
        }
    }

    let mut receiver = Receiver::new(config.sample_format);
    let raw_stdout = config.raw_stdout;
    let json_stdout = config.json_stdout;
    let consumer_dispatch = dispatch.clone();
    receiver.set_consumer(Box::new(move |messages| {
        let batch = Arc::new(messages);
        if raw_stdout {
            print!("{}", render_batch(&batch, OutputFormat::Raw));
        }
        if json_stdout {
            print!("{}", render_batch(&batch, OutputFormat::Json));
        }
        if raw_stdout || json_stdout {
            use std::io::Write;
            let _ = std::io::stdout().flush();
        }
        consumer_dispatch.dispatch(batch);
    }));

    let result = loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                match signal {
                    Ok(()) => break Err(RunError::Abnormal(anyhow!("interrupted by signal"))),
                    Err(error) => break Err(RunError::Abnormal(error.into())),
                }
            }
            block = block_rx.recv() => match block {
                Some(Ok((timestamp, bytes))) => receiver.handle_samples(timestamp, &bytes),
                Some(Err(error)) => {
                    break Err(RunError::Abnormal(
                        anyhow::Error::from(error).context("sample source failed"),
                    ));
                }
                None => {
                    info!("sample source reports end of stream");
                    break Ok(());
                }
            },
        }
    };

    // stop the SDR thread; it polls the flag on every read timeout
    stop.store(true, Ordering::Relaxed);
    if let Some(handle) = sdr_thread {
        let _ = handle.join();
    }

    result
}
