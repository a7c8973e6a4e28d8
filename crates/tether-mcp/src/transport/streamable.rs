//! Streamable-HTTP transport: every message is a POST to one endpoint.
//!
//! There is no persistent inbound channel. A POST answers with either a
//! single JSON-RPC response or a short `text/event-stream` sequence; both
//! are parsed and fed to the owning client through the inbound channel.
//! Session continuity rides on the `Mcp-Session-Id` header, and an expired
//! session (HTTP 404 while holding one) is recovered by replaying the
//! handshake and retrying the original request exactly once.

use super::{INBOUND_CAPACITY, TransportEvent, parse_inbound_frame};
use crate::config::ServerEntry;
use crate::error::McpError;
use crate::jsonrpc::JsonRpcNotification;
use crate::sse::SseParser;
use futures_util::StreamExt;
use reqwest::Url;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Transport over a unified HTTP endpoint.
pub struct StreamableHttpTransport {
    name: String,
    http: reqwest::Client,
    url: Url,
    inbound: Option<mpsc::Sender<TransportEvent>>,
    session_id: Mutex<Option<String>>,
    protocol_version: Mutex<Option<String>>,
    /// The serialized `initialize` request, kept for session recovery.
    last_initialize: Mutex<Option<String>>,
}

/// Why a POST did not complete.
enum PostError {
    /// HTTP 404 while holding a session id: the session expired.
    SessionExpired,
    Failed(McpError),
}

impl StreamableHttpTransport {
    /// Prepare the transport. No I/O happens until the first send.
    pub fn connect(
        entry: &ServerEntry,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>), McpError> {
        let url = Url::parse(entry.url.as_deref().unwrap_or(""))
            .map_err(|e| McpError::InvalidRequest(format!("invalid streamable-http url: {e}")))?;

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        Ok((
            Self {
                name: entry.name.clone(),
                http: reqwest::Client::new(),
                url,
                inbound: Some(inbound_tx),
                session_id: Mutex::new(None),
                protocol_version: Mutex::new(None),
                last_initialize: Mutex::new(None),
            },
            inbound_rx,
        ))
    }

    /// POST one JSON value, recovering an expired session once.
    pub async fn send(&self, message: &serde_json::Value) -> Result<(), McpError> {
        let payload = serde_json::to_string(message)?;
        if message.get("method").and_then(serde_json::Value::as_str) == Some("initialize") {
            *self.last_initialize.lock().unwrap() = Some(payload.clone());
        }

        match self.post(&payload, true).await {
            Ok(()) => Ok(()),
            Err(PostError::Failed(e)) => Err(e),
            Err(PostError::SessionExpired) => {
                tracing::debug!("Session for '{}' expired, re-running handshake", self.name);
                self.rehandshake().await?;
                match self.post(&payload, true).await {
                    Ok(()) => Ok(()),
                    Err(PostError::Failed(e)) => Err(e),
                    Err(PostError::SessionExpired) => Err(McpError::Http(format!(
                        "session for '{}' expired again after re-handshake",
                        self.name
                    ))),
                }
            }
        }
    }

    pub fn set_protocol_version(&self, version: &str) {
        *self.protocol_version.lock().unwrap() = Some(version.to_string());
    }

    /// Drop the inbound channel; there is no subscription to tear down.
    pub async fn close(&mut self) {
        self.inbound.take();
    }

    /// Replay the stored handshake against a fresh session. The replayed
    /// responses are consumed for their session header only.
    async fn rehandshake(&self) -> Result<(), McpError> {
        let init = self
            .last_initialize
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| McpError::Http("no initialize payload to replay".to_string()))?;
        *self.session_id.lock().unwrap() = None;

        self.post(&init, false).await.map_err(PostError::flatten)?;

        let initialized = serde_json::to_string(&JsonRpcNotification::new(
            "notifications/initialized",
            None,
        ))?;
        self.post(&initialized, false).await.map_err(PostError::flatten)?;
        Ok(())
    }

    /// One POST round trip. Inbound frames are delivered to the client
    /// only when `deliver` is set.
    async fn post(&self, payload: &str, deliver: bool) -> Result<(), PostError> {
        let held_session = self.session_id.lock().unwrap().clone();

        let mut request = self
            .http
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json, text/event-stream")
            .body(payload.to_string());
        if let Some(session) = &held_session {
            request = request.header("Mcp-Session-Id", session);
        }
        if let Some(version) = self.protocol_version.lock().unwrap().clone() {
            request = request.header("MCP-Protocol-Version", version);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PostError::Failed(McpError::Http(e.to_string())))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND && held_session.is_some() {
            return Err(PostError::SessionExpired);
        }
        if !response.status().is_success() {
            return Err(PostError::Failed(McpError::Http(format!(
                "POST to '{}' failed: HTTP {}",
                self.name,
                response.status()
            ))));
        }

        if let Some(session) = response
            .headers()
            .get("mcp-session-id")
            .and_then(|value| value.to_str().ok())
        {
            *self.session_id.lock().unwrap() = Some(session.to_string());
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.starts_with("text/event-stream") {
            let mut stream = response.bytes_stream();
            let mut parser = SseParser::new();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| PostError::Failed(McpError::Http(e.to_string())))?;
                for event in parser.feed(&String::from_utf8_lossy(&chunk)) {
                    if event.event != "message" {
                        continue;
                    }
                    if deliver {
                        if let Some(frame) = parse_inbound_frame(&self.name, &event.data) {
                            self.deliver(frame).await?;
                        }
                    }
                }
            }
        } else {
            let body = response
                .bytes()
                .await
                .map_err(|e| PostError::Failed(McpError::Http(e.to_string())))?;
            // Notifications come back as bodiless 202s; nothing to deliver.
            if deliver && !body.is_empty() {
                if let Some(frame) = parse_inbound_frame(&self.name, &String::from_utf8_lossy(&body))
                {
                    self.deliver(frame).await?;
                }
            }
        }

        Ok(())
    }

    async fn deliver(&self, frame: serde_json::Value) -> Result<(), PostError> {
        let tx = self
            .inbound
            .as_ref()
            .ok_or(PostError::Failed(McpError::ConnectionClosed))?;
        tx.send(TransportEvent::Message(frame))
            .await
            .map_err(|_| PostError::Failed(McpError::ConnectionClosed))
    }

    /// The session id currently in hand, if any.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().unwrap().clone()
    }
}

impl PostError {
    /// Collapse into an `McpError` where session expiry cannot recur.
    fn flatten(self) -> McpError {
        match self {
            PostError::SessionExpired => {
                McpError::Http("session expired with no session held".to_string())
            }
            PostError::Failed(e) => e,
        }
    }
}
