//! SSE transport: an event-stream subscription for inbound messages with
//! a POST sidecar for outbound ones.
//!
//! The first `endpoint` event on the stream names the POST target; its
//! query string carries the session id that binds the sidecar to this
//! subscription.

use super::{INBOUND_CAPACITY, TransportEvent, parse_inbound_frame};
use crate::config::ServerEntry;
use crate::error::McpError;
use crate::sse::SseParser;
use futures_util::StreamExt;
use reqwest::Url;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// How long to wait for the server to announce its message endpoint.
const ENDPOINT_TIMEOUT: Duration = Duration::from_secs(10);

/// Transport over a Server-Sent-Events subscription plus a POST channel.
pub struct SseTransport {
    name: String,
    http: reqwest::Client,
    /// The announced message endpoint, without its session id.
    post_endpoint: Url,
    session_id: String,
    protocol_version: Mutex<Option<String>>,
    reader_handle: JoinHandle<()>,
}

impl SseTransport {
    /// Subscribe to the event stream and wait for the `endpoint` event.
    pub async fn connect(
        entry: &ServerEntry,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>), McpError> {
        let base = Url::parse(entry.url.as_deref().unwrap_or(""))
            .map_err(|e| McpError::InvalidRequest(format!("invalid SSE url: {e}")))?;

        let http = reqwest::Client::new();
        let response = http
            .get(base.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| McpError::Http(e.to_string()))?;
        if !response.status().is_success() {
            return Err(McpError::Http(format!(
                "SSE subscription to {base} failed: HTTP {}",
                response.status()
            )));
        }

        let mut stream = response.bytes_stream();
        let mut parser = SseParser::new();

        // The endpoint announcement must arrive before anything else can
        // be sent; messages interleaved in the same chunks are kept.
        let wait = async {
            let mut endpoint = None;
            let mut early = Vec::new();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| McpError::Http(e.to_string()))?;
                for event in parser.feed(&String::from_utf8_lossy(&chunk)) {
                    match event.event.as_str() {
                        "endpoint" if endpoint.is_none() => endpoint = Some(event.data),
                        "message" => early.push(event.data),
                        other => tracing::debug!("Ignoring SSE event '{other}' before endpoint"),
                    }
                }
                if endpoint.is_some() {
                    break;
                }
            }
            Ok::<_, McpError>((endpoint, early))
        };
        let (endpoint, early) = tokio::time::timeout(ENDPOINT_TIMEOUT, wait)
            .await
            .map_err(|_| McpError::Http(format!("timed out waiting for endpoint event from {base}")))??;
        let endpoint = endpoint.ok_or_else(|| {
            McpError::Http(format!("event stream from {base} ended before the endpoint event"))
        })?;

        let (post_endpoint, session_id) = split_endpoint(&base, &endpoint)?;
        tracing::debug!(
            "SSE server '{}' announced endpoint {post_endpoint} (session {session_id})",
            entry.name
        );

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let reader_name = entry.name.clone();
        let reader_handle = tokio::spawn(async move {
            for data in early {
                if let Some(frame) = parse_inbound_frame(&reader_name, &data) {
                    if inbound_tx.send(TransportEvent::Message(frame)).await.is_err() {
                        return;
                    }
                }
            }
            while let Some(chunk) = stream.next().await {
                let Ok(chunk) = chunk else { break };
                for event in parser.feed(&String::from_utf8_lossy(&chunk)) {
                    if event.event != "message" {
                        tracing::debug!("Ignoring SSE event '{}' from '{reader_name}'", event.event);
                        continue;
                    }
                    if let Some(frame) = parse_inbound_frame(&reader_name, &event.data) {
                        if inbound_tx.send(TransportEvent::Message(frame)).await.is_err() {
                            return;
                        }
                    }
                }
            }
            let _ = inbound_tx.send(TransportEvent::Closed).await;
        });

        Ok((
            Self {
                name: entry.name.clone(),
                http,
                post_endpoint,
                session_id,
                protocol_version: Mutex::new(None),
                reader_handle,
            },
            inbound_rx,
        ))
    }

    /// POST one JSON value to the announced endpoint.
    pub async fn send(&self, message: &serde_json::Value) -> Result<(), McpError> {
        let mut url = self.post_endpoint.clone();
        url.query_pairs_mut().append_pair("sessionId", &self.session_id);

        let mut request = self
            .http
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(serde_json::to_string(message)?);
        if let Some(version) = self.protocol_version.lock().unwrap().clone() {
            request = request.header("MCP-Protocol-Version", version);
        }

        let response = request
            .send()
            .await
            .map_err(|e| McpError::Http(e.to_string()))?;
        if !response.status().is_success() {
            return Err(McpError::Http(format!(
                "POST to message endpoint of '{}' failed: HTTP {}",
                self.name,
                response.status()
            )));
        }
        Ok(())
    }

    pub fn set_protocol_version(&self, version: &str) {
        *self.protocol_version.lock().unwrap() = Some(version.to_string());
    }

    /// Tear down the event-stream subscription.
    pub async fn close(&mut self) {
        self.reader_handle.abort();
    }
}

/// Resolve the announced endpoint against the subscription URL and split
/// off its `sessionId` query parameter.
fn split_endpoint(base: &Url, endpoint: &str) -> Result<(Url, String), McpError> {
    let resolved = base
        .join(endpoint)
        .map_err(|e| McpError::Http(format!("bad endpoint '{endpoint}': {e}")))?;

    let mut session_id = None;
    let rest: Vec<(String, String)> = resolved
        .query_pairs()
        .filter_map(|(key, value)| {
            if key == "sessionId" {
                session_id = Some(value.into_owned());
                None
            } else {
                Some((key.into_owned(), value.into_owned()))
            }
        })
        .collect();
    let session_id = session_id
        .ok_or_else(|| McpError::Http(format!("endpoint '{endpoint}' carries no sessionId")))?;

    let mut post_endpoint = resolved;
    post_endpoint.set_query(None);
    if !rest.is_empty() {
        let mut pairs = post_endpoint.query_pairs_mut();
        for (key, value) in &rest {
            pairs.append_pair(key, value);
        }
    }

    Ok((post_endpoint, session_id))
}
