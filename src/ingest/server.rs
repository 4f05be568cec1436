use chrono::{Local, NaiveDateTime};
use dashmap::DashMap;
use serde_json::Value;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::config::IngestConfig;

pub const ACK: &[u8] = b"ACK";
pub const ERR: &[u8] = b"ERR";

/// Pause after a failed accept so persistent errors (EMFILE) do not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("payload exceeds {0} bytes")]
    PayloadTooLarge(usize),
    #[error("connection closed before any payload")]
    Empty,
    #[error("timed out waiting for payload")]
    Timeout,
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("payload must be a JSON object with a string `source`")]
    MissingSource,
    #[error("corpus writer has shut down")]
    WriterClosed,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Receive counters, shared by every connection task.
#[derive(Debug, Default)]
pub struct IngestStats {
    per_source: DashMap<String, u64>,
    rejected: AtomicU64,
}

impl IngestStats {
    fn record_accepted(&self, source: &str) {
        *self.per_source.entry(source.to_string()).or_insert(0) += 1;
    }

    fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[cfg(test)]
    pub fn accepted(&self, source: &str) -> u64 {
        self.per_source.get(source).map(|count| *count).unwrap_or(0)
    }

    pub fn total_accepted(&self) -> u64 {
        self.per_source.iter().map(|entry| *entry.value()).sum()
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Accepted counts per source tag, sorted by tag.
    pub fn by_source(&self) -> Vec<(String, u64)> {
        let mut counts: Vec<(String, u64)> = self
            .per_source
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        counts.sort();
        counts
    }
}

/// One line for the writer task plus a channel to report the append result.
struct AppendRequest {
    line: String,
    done: oneshot::Sender<io::Result<()>>,
}

/// Validate a raw payload and turn it into one corpus line stamped with its
/// receipt time. Returns the record's source tag alongside the line.
pub fn stamp_record(payload: &[u8], received_at: NaiveDateTime) -> Result<(String, String), IngestError> {
    let mut value: Value = serde_json::from_slice(payload)?;

    let object = value.as_object_mut().ok_or(IngestError::MissingSource)?;
    let source = object
        .get("source")
        .and_then(Value::as_str)
        .ok_or(IngestError::MissingSource)?
        .to_string();

    object.insert(
        "_received_at".to_string(),
        Value::String(received_at.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()),
    );

    Ok((source, serde_json::to_string(&value)?))
}

/// Accepts JSON records over TCP and appends them to the corpus file.
pub struct IngestServer {
    listener: TcpListener,
    corpus_path: PathBuf,
    config: IngestConfig,
    stats: Arc<IngestStats>,
}

impl IngestServer {
    pub async fn bind(config: IngestConfig, corpus_path: impl Into<PathBuf>) -> io::Result<Self> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        Ok(Self {
            listener,
            corpus_path: corpus_path.into(),
            config,
            stats: Arc::new(IngestStats::default()),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn stats(&self) -> Arc<IngestStats> {
        Arc::clone(&self.stats)
    }

    /// Serve until `shutdown` resolves, then drain the append queue.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> io::Result<()> {
        if let Some(parent) = self.corpus_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let (tx, rx) = mpsc::channel::<AppendRequest>(self.config.queue_capacity);
        let writer = tokio::spawn(append_loop(self.corpus_path.clone(), rx));

        info!(
            "Ingest server listening on {} -> {}",
            self.local_addr()?,
            self.corpus_path.display()
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!("Connection from {}", peer);
                            let tx = tx.clone();
                            let stats = Arc::clone(&self.stats);
                            let limit = self.config.max_payload_bytes;
                            let timeout = Duration::from_secs(self.config.read_timeout_secs);
                            tokio::spawn(async move {
                                handle_connection(stream, peer, tx, stats, limit, timeout).await;
                            });
                        }
                        Err(e) => accept_failed(e).await,
                    }
                }
                _ = &mut shutdown => {
                    info!("Shutdown requested, closing listener");
                    break;
                }
            }
        }

        // In-flight connections hold their own senders; the writer exits once
        // the last one is gone.
        drop(tx);
        if let Err(e) = writer.await {
            error!("Corpus writer task failed: {}", e);
        }

        info!(
            "Ingest server stopped: {} records accepted, {} rejected",
            self.stats.total_accepted(),
            self.stats.rejected()
        );
        for (source, count) in self.stats.by_source() {
            info!("  {}: {}", source, count);
        }
        Ok(())
    }
}

async fn accept_failed(e: io::Error) {
    warn!("Accept failed: {}", e);
    tokio::time::sleep(ACCEPT_BACKOFF).await;
}

/// Sole owner of the corpus file handle; appends one whole line per request.
async fn append_loop(path: PathBuf, mut rx: mpsc::Receiver<AppendRequest>) {
    let mut file = match OpenOptions::new().create(true).append(true).open(&path).await {
        Ok(file) => file,
        Err(e) => {
            error!("Cannot open corpus {} for append: {}", path.display(), e);
            while let Some(request) = rx.recv().await {
                let _ = request
                    .done
                    .send(Err(io::Error::new(e.kind(), e.to_string())));
            }
            return;
        }
    };

    while let Some(request) = rx.recv().await {
        let mut line = request.line.into_bytes();
        line.push(b'\n');
        let result = match file.write_all(&line).await {
            Ok(()) => file.flush().await,
            Err(e) => Err(e),
        };
        let _ = request.done.send(result);
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    tx: mpsc::Sender<AppendRequest>,
    stats: Arc<IngestStats>,
    limit: usize,
    timeout: Duration,
) {
    let outcome = match tokio::time::timeout(timeout, read_payload(&mut stream, limit)).await {
        Ok(Ok(payload)) => accept_payload(&payload, &tx).await,
        Ok(Err(e)) => Err(e),
        Err(_) => Err(IngestError::Timeout),
    };

    let oversized = matches!(outcome, Err(IngestError::PayloadTooLarge(_)));
    let reply = match outcome {
        Ok(source) => {
            info!("Stored record from {} (source {})", peer, source);
            stats.record_accepted(&source);
            ACK
        }
        Err(e) => {
            warn!("Rejected payload from {}: {}", peer, e);
            stats.record_rejected();
            ERR
        }
    };

    if let Err(e) = stream.write_all(reply).await {
        debug!("Could not reply to {}: {}", peer, e);
    }
    if oversized {
        // Closing with unread input resets the connection and can eat the reply.
        discard_input(&mut stream, timeout).await;
    }
    let _ = stream.shutdown().await;
}

async fn discard_input(stream: &mut TcpStream, timeout: Duration) {
    let mut sink = [0u8; 8192];
    let _ = tokio::time::timeout(timeout, async {
        while let Ok(n) = stream.read(&mut sink).await {
            if n == 0 {
                break;
            }
        }
    })
    .await;
}

async fn accept_payload(payload: &[u8], tx: &mpsc::Sender<AppendRequest>) -> Result<String, IngestError> {
    let (source, line) = stamp_record(payload, Local::now().naive_local())?;

    let (done, result) = oneshot::channel();
    tx.send(AppendRequest { line, done })
        .await
        .map_err(|_| IngestError::WriterClosed)?;
    result.await.map_err(|_| IngestError::WriterClosed)??;

    Ok(source)
}

/// Read until the peer half-closes or the buffer already holds one complete
/// JSON value, so senders that wait for the reply without closing still work.
async fn read_payload(stream: &mut TcpStream, limit: usize) -> Result<Vec<u8>, IngestError> {
    let mut payload = Vec::new();
    let mut chunk = [0u8; 8192];

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        if payload.len() + n > limit {
            return Err(IngestError::PayloadTooLarge(limit));
        }
        payload.extend_from_slice(&chunk[..n]);

        if serde_json::from_slice::<serde::de::IgnoredAny>(&payload).is_ok() {
            break;
        }
    }

    if payload.iter().all(u8::is_ascii_whitespace) {
        return Err(IngestError::Empty);
    }
    Ok(payload)
}
