use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use ar_core::ingest::{IngestBatch, decode_payload};

use crate::metrics::RuntimeMetrics;

/// Upper bound on a single ingest frame; larger prefixes are treated as a
/// protocol error and the connection drops.
const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Receiver
// ---------------------------------------------------------------------------

/// TCP ingest receiver: accepts connections, reads length-prefixed JSON
/// payloads (Alertmanager webhook bodies or bare alert arrays), decodes
/// them, and forwards batches to the pipeline channel.
///
/// The HTTP/REST surface lives outside the core; this framed listener is the
/// process's native ingress.
pub struct Receiver {
    listener: TcpListener,
    ingest_tx: mpsc::Sender<IngestBatch>,
    cancel: CancellationToken,
    metrics: Arc<RuntimeMetrics>,
}

impl Receiver {
    /// Parse `"tcp://host:port"` and bind. `cancel` stops the accept loop
    /// and every connection handler spawned from it.
    pub async fn bind(
        listen: &str,
        ingest_tx: mpsc::Sender<IngestBatch>,
        metrics: Arc<RuntimeMetrics>,
        cancel: CancellationToken,
    ) -> anyhow::Result<Self> {
        let addr = listen.strip_prefix("tcp://").unwrap_or(listen);
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            ingest_tx,
            cancel,
            metrics,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Clone of the cancellation token for external shutdown signaling.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Accept loop. Returns when the cancellation token fires; dropping
    /// `self` afterwards releases the pipeline channel sender.
    #[tracing::instrument(name = "receiver", skip_all)]
    pub async fn run(self) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    let (stream, peer) = result?;
                    ar_debug!(conn, peer = %peer, "accepted connection");
                    self.metrics.inc_connection();
                    let cancel = self.cancel.child_token();
                    let tx = self.ingest_tx.clone();
                    let metrics = Arc::clone(&self.metrics);
                    tokio::spawn(handle_connection(stream, tx, cancel, peer, metrics));
                }
                _ = self.cancel.cancelled() => break,
            }
        }
        Ok(())
    }
}

#[tracing::instrument(skip_all, fields(peer = %peer))]
async fn handle_connection(
    stream: TcpStream,
    ingest_tx: mpsc::Sender<IngestBatch>,
    cancel: CancellationToken,
    peer: SocketAddr,
    metrics: Arc<RuntimeMetrics>,
) {
    let (reader, _writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    loop {
        tokio::select! {
            result = read_frame(&mut reader) => {
                match result {
                    Ok(None) => break,
                    Ok(Some(payload)) => {
                        match decode_payload(&payload) {
                            Ok(batch) => {
                                metrics.inc_ingest_frame();
                                metrics.add_ingest_alerts(batch.alerts.len());
                                ar_trace!(pipe, alerts = batch.alerts.len(), "frame decoded");
                                if ingest_tx.send(batch).await.is_err() {
                                    ar_warn!(conn, peer = %peer, "ingest channel closed, dropping connection");
                                    break;
                                }
                            }
                            Err(e) => {
                                metrics.inc_decode_error();
                                ar_warn!(conn, peer = %peer, error = %e, "payload rejected");
                            }
                        }
                    }
                    Err(e) => {
                        metrics.inc_read_error();
                        ar_warn!(conn, peer = %peer, error = %e, "connection read error");
                        break;
                    }
                }
            }
            _ = cancel.cancelled() => break,
        }
    }
    ar_debug!(conn, peer = %peer, "connection closed");
}

/// Read a single length-prefixed frame: `[4B BE u32 len][payload]`.
///
/// Returns `Ok(None)` on clean EOF (connection closed).
async fn read_frame(reader: &mut (impl AsyncReadExt + Unpin)) -> io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let frame_len = u32::from_be_bytes(len_buf) as usize;
    if frame_len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame length {frame_len} exceeds {MAX_FRAME_LEN}"),
        ));
    }
    let mut payload = vec![0u8; frame_len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
