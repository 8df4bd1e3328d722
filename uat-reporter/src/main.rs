//! uat-reporter: consumes raw UAT messages from a TCP port, tracks
//! aircraft, and emits a periodic TSV report on stdout plus optional JSON
//! snapshots for dashboards.
//!
//! Tracker updates, purges, reports, and snapshot writes all run on one
//! task, so readers always observe a consistent aircraft map.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::anyhow;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use uat_core::config::ListenAddr;
use uat_core::{RawMessage, Tracker};

mod report;
mod snapshot;

use report::Reporter;
use snapshot::SnapshotWriter;

const EXIT_NO_RESTART: u8 = 64;

#[derive(Parser)]
#[command(name = "uat-reporter", version, about = "UAT aircraft tracker and reporter")]
struct Cli {
    /// Connect to [host:]port for raw UAT messages
    #[arg(long, value_name = "[HOST:]PORT")]
    connect: ListenAddr,

    /// Seconds between reconnect attempts; 0 exits on connection loss
    #[arg(long, default_value_t = 30)]
    reconnect_interval: u64,

    /// Seconds without messages before an aircraft is dropped
    #[arg(long, default_value_t = 300)]
    timeout: u64,

    /// Seconds between TSV report passes
    #[arg(long, default_value_t = 1)]
    report_interval: u64,

    /// Directory for aircraft.json snapshots (disabled when absent)
    #[arg(long)]
    json_dir: Option<PathBuf>,

    /// Seconds between snapshot writes
    #[arg(long, default_value_t = 1)]
    json_interval: u64,

    /// Number of rotating history files
    #[arg(long, default_value_t = 120)]
    history_count: usize,

    /// Seconds between history file writes
    #[arg(long, default_value_t = 30)]
    history_interval: u64,

    /// Receiver latitude for receiver.json
    #[arg(long, requires = "lon")]
    lat: Option<f64>,

    /// Receiver longitude for receiver.json
    #[arg(long, requires = "lat")]
    lon: Option<f64>,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
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
    match local.block_on(&runtime, run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!("{error:#}");
            ExitCode::FAILURE
        }
    }
}

/// Read raw message lines from the server, reconnecting on failure when
/// `reconnect` is set. Closing the channel signals end of input; an `Err`
/// item signals a connection failure with reconnection disabled.
async fn run_input(
    addr: ListenAddr,
    reconnect: Option<Duration>,
    tx: mpsc::Sender<anyhow::Result<String>>,
) {
    loop {
        match TcpStream::connect((addr.host.as_str(), addr.port)).await {
            Ok(stream) => {
                info!("connected to {addr}");
                let mut lines = BufReader::new(stream).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => {
                            if tx.send(Ok(line)).await.is_err() {
                                return;
                            }
                        }
                        Ok(None) => {
                            info!("{addr} closed the connection");
                            break;
                        }
                        Err(error) => {
                            warn!("read from {addr} failed: {error}");
                            break;
                        }
                    }
                }
            }
            Err(error) => {
                if reconnect.is_none() {
                    let _ = tx
                        .send(Err(anyhow!("connection to {addr} failed: {error}")))
                        .await;
                    return;
                }
                warn!("connection to {addr} failed: {error}");
            }
        }

        match reconnect {
            Some(interval) => tokio::time::sleep(interval).await,
            None => return, // clean end of input
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut tracker = Tracker::new(Duration::from_secs(cli.timeout));
    let mut reporter = Reporter::new();

    let mut snapshot = match &cli.json_dir {
        Some(dir) => {
            let writer = SnapshotWriter::new(
                dir.clone(),
                Duration::from_secs(cli.json_interval),
                cli.history_count,
                Duration::from_secs(cli.history_interval),
                cli.lat.zip(cli.lon),
            );
            writer.write_receiver_json()?;
            Some(writer)
        }
        None => None,
    };

    let reconnect = (cli.reconnect_interval > 0)
        .then(|| Duration::from_secs(cli.reconnect_interval));
    let (line_tx, mut line_rx) = mpsc::channel(64);
    tokio::task::spawn_local(run_input(cli.connect.clone(), reconnect, line_tx));

    println!("{}", report::start_banner());

    let mut purge_timer = tokio::time::interval(tracker.purge_interval());
    let mut report_timer = tokio::time::interval(Duration::from_secs(cli.report_interval));
    let snapshot_interval = snapshot
        .as_ref()
        .map(|writer| writer.interval())
        .unwrap_or(Duration::from_secs(3600));
    let mut snapshot_timer = tokio::time::interval(snapshot_interval);

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                return Err(anyhow!("interrupted by signal"));
            }
            _ = purge_timer.tick() => {
                tracker.purge_old(now_millis());
            }
            _ = report_timer.tick() => {
                for line in reporter.periodic_report(&tracker, now_millis()) {
                    println!("{line}");
                }
            }
            _ = snapshot_timer.tick(), if snapshot.is_some() => {
                if let Some(writer) = snapshot.as_mut() {
                    writer.periodic_write(&tracker, now_millis())?;
                }
            }
            line = line_rx.recv() => match line {
                Some(Ok(line)) => {
                    if let Some(message) = RawMessage::parse_line(&line) {
                        tracker.handle_messages(&[message]);
                    }
                }
                Some(Err(error)) => return Err(error),
                None => {
                    info!("input exhausted, exiting");
                    return Ok(());
                }
            },
        }
    }
}
