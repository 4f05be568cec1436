use anyhow::{Context, Result};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use super::server::ACK;

/// Longest reply worth reading; the server only ever answers ACK or ERR.
const MAX_REPLY_BYTES: u64 = 64;

/// Send one `{"source", "data"}` record to an ingest server.
///
/// Returns `Ok(true)` when the server acknowledged the record and
/// `Ok(false)` for any other reply. Connection failures are errors.
pub async fn send_record(addr: &str, source: &str, data: Value) -> Result<bool> {
    let payload = serde_json::to_vec(&json!({ "source": source, "data": data }))?;

    let mut stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("Failed to connect to ingest server at {}", addr))?;

    stream.write_all(&payload).await.context("Failed to send record")?;
    stream.shutdown().await.context("Failed to finish sending record")?;

    let mut reply = Vec::new();
    (&mut stream)
        .take(MAX_REPLY_BYTES)
        .read_to_end(&mut reply)
        .await
        .context("Failed to read server reply")?;

    debug!("Server replied {:?} to {} record", String::from_utf8_lossy(&reply), source);
    Ok(reply == ACK)
}
