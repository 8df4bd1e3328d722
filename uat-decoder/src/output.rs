//! Message outputs — stdout writers and raw/JSON TCP listeners.
//!
//! Demodulated batches are fanned out over a broadcast channel. Every
//! connected client gets every batch; a client that cannot keep up is
//! disconnected rather than letting backpressure reach the DSP path.

use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use uat_core::{AdsbMessage, RawMessage};

/// Batches a slow client may fall behind before being dropped.
const CLIENT_QUEUE: usize = 64;

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Raw,
    Json,
}

/// Fan-out point for demodulated message batches.
#[derive(Clone)]
pub struct Dispatch {
    tx: broadcast::Sender<Arc<Vec<RawMessage>>>,
}

impl Dispatch {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CLIENT_QUEUE);
        Dispatch { tx }
    }

    /// Hand a batch to every connected client. Batches are dropped silently
    /// when nobody is listening.
    pub fn dispatch(&self, messages: Arc<Vec<RawMessage>>) {
        let _ = self.tx.send(messages);
    }

    fn subscribe(&self) -> broadcast::Receiver<Arc<Vec<RawMessage>>> {
        self.tx.subscribe()
    }
}

impl Default for Dispatch {
    fn default() -> Self {
        Dispatch::new()
    }
}

/// Render one batch in the given format, one message per line.
pub fn render_batch(messages: &[RawMessage], format: OutputFormat) -> String {
    let mut out = String::new();
    for message in messages {
        match format {
            OutputFormat::Raw => {
                out.push_str(&message.to_string());
                out.push('\n');
            }
            OutputFormat::Json => {
                if !message.is_downlink() {
                    continue;
                }
                let Some(decoded) = AdsbMessage::from_raw(message) else {
                    continue;
                };
                if let Ok(line) = serde_json::to_string(&decoded) {
                    out.push_str(&line);
                    out.push('\n');
                }
            }
        }
    }
    out
}

/// Accept clients on `listener` and serve them `format` output until the
/// process exits.
pub fn spawn_listener(listener: TcpListener, dispatch: Dispatch, format: OutputFormat) {
    tokio::task::spawn_local(async move {
        loop {
            match listener.accept().await {
                Ok((socket, peer)) => {
                    info!("connection from {peer}");
                    let rx = dispatch.subscribe();
                    tokio::task::spawn_local(serve_client(socket, rx, format));
                }
                Err(error) => {
                    warn!("accept failed: {error}");
                    break;
                }
            }
        }
    });
}

async fn serve_client(
    mut socket: TcpStream,
    mut rx: broadcast::Receiver<Arc<Vec<RawMessage>>>,
    format: OutputFormat,
) {
    let peer = socket.peer_addr().ok();
    loop {
        match rx.recv().await {
            Ok(batch) => {
                let text = render_batch(&batch, format);
                if text.is_empty() {
                    continue;
                }
                if let Err(error) = socket.write_all(text.as_bytes()).await {
                    debug!("client {peer:?} write failed: {error}");
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("client {peer:?} lagged by {skipped} batches, disconnecting");
                break;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn downlink() -> RawMessage {
        let mut payload = vec![0u8; 34];
        payload[0] = 0x08;
        payload[3] = 0x42;
        RawMessage::new(payload, 1_000, 1, 0.0)
    }

    fn uplink() -> RawMessage {
        RawMessage::new(vec![0u8; 432], 1_000, 0, 0.0)
    }

    #[test]
    fn test_render_raw_batch() {
        let text = render_batch(&[downlink(), uplink()], OutputFormat::Raw);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('-'));
        assert!(lines[1].starts_with('+'));
    }

    #[test]
    fn test_render_json_skips_uplink() {
        let text = render_batch(&[downlink(), uplink()], OutputFormat::Json);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 1);
        let value: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(value["address"], 0x42);
        assert_eq!(value["payload_type"], 1);
    }

    #[test]
    fn test_dispatch_without_clients_does_not_block() {
        let dispatch = Dispatch::new();
        dispatch.dispatch(Arc::new(vec![downlink()]));
    }
}
