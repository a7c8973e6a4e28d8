//! Transport adapters for MCP server communication.
//!
//! All variants share one contract: outbound JSON values go through
//! [`Transport::send`], inbound messages arrive on a bounded channel the
//! owning client drains. Reader tasks never block on anything but the
//! channel, so a slow consumer cannot stall an adapter's read loop.

mod sse;
mod stdio;
mod streamable;

pub use sse::SseTransport;
pub use stdio::StdioTransport;
pub use streamable::StreamableHttpTransport;

use crate::config::{ServerEntry, TransportKind};
use crate::error::McpError;
use tokio::sync::mpsc;

/// Capacity of the inbound message channel.
pub(crate) const INBOUND_CAPACITY: usize = 64;

/// An event delivered by a transport to its owning client.
#[derive(Debug)]
pub enum TransportEvent {
    /// One inbound JSON-RPC frame.
    Message(serde_json::Value),
    /// The underlying channel is gone (process exit, stream end).
    Closed,
}

/// A connected transport of any variant.
pub enum Transport {
    Stdio(StdioTransport),
    Sse(SseTransport),
    StreamableHttp(StreamableHttpTransport),
}

impl Transport {
    /// Open the transport described by `entry` and hand back the inbound
    /// event channel alongside the handle.
    pub async fn connect(
        entry: &ServerEntry,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>), McpError> {
        match entry.kind {
            TransportKind::Stdio => {
                let (transport, rx) = StdioTransport::spawn(entry).await?;
                Ok((Transport::Stdio(transport), rx))
            }
            TransportKind::Sse => {
                let (transport, rx) = SseTransport::connect(entry).await?;
                Ok((Transport::Sse(transport), rx))
            }
            TransportKind::StreamableHttp => {
                let (transport, rx) = StreamableHttpTransport::connect(entry)?;
                Ok((Transport::StreamableHttp(transport), rx))
            }
        }
    }

    /// Send one JSON value over the transport.
    pub async fn send(&self, message: &serde_json::Value) -> Result<(), McpError> {
        match self {
            Transport::Stdio(t) => t.send(message).await,
            Transport::Sse(t) => t.send(message).await,
            Transport::StreamableHttp(t) => t.send(message).await,
        }
    }

    /// Record the negotiated protocol version for adapters that carry it
    /// on subsequent requests.
    pub fn set_protocol_version(&self, version: &str) {
        match self {
            Transport::Stdio(_) => {}
            Transport::Sse(t) => t.set_protocol_version(version),
            Transport::StreamableHttp(t) => t.set_protocol_version(version),
        }
    }

    /// Tear down the transport and release its OS-level resource.
    pub async fn close(&mut self) {
        match self {
            Transport::Stdio(t) => t.close().await,
            Transport::Sse(t) => t.close().await,
            Transport::StreamableHttp(t) => t.close().await,
        }
    }
}

/// Parse one inbound line. Blank lines are discarded; unparseable lines
/// are logged and dropped, never fatal.
pub(crate) fn parse_inbound_frame(server: &str, line: &str) -> Option<serde_json::Value> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Dropping unparseable frame from '{server}': {e}: {line}");
            None
        }
    }
}
