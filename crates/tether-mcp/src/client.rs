//! MCP client — manages one server connection.
//!
//! Drives the protocol over an owned transport: the initialize handshake,
//! request/response correlation by id, `tools/list` and `tools/call`, and
//! the wrapped-tool-result quirk. Inbound frames are consumed by a
//! dispatcher task fed from the transport's channel, so the transport's
//! read loop never waits on protocol work.

use crate::config::{ServerEntry, ToolDescriptor};
use crate::error::McpError;
use crate::jsonrpc::{JsonRpcMessage, JsonRpcNotification, JsonRpcRequest};
use crate::transport::{Transport, TransportEvent};
use crate::validate::{ArgumentValidator, StructuralValidator};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;

/// MCP protocol version we offer during the handshake.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Client name reported in `clientInfo`.
pub const CLIENT_NAME: &str = "tether";

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How long the best-effort `shutdown` request may take during close.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    New,
    Handshaking,
    Ready,
    /// Terminal: the server spoke a protocol version we rejected.
    Failed,
    /// Terminal: closed by request or by transport death.
    Closed,
}

/// Predicate deciding whether a server-reported protocol version is
/// acceptable. The default accepts everything.
pub type VersionPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Knobs for constructing a client.
#[derive(Clone)]
pub struct ClientOptions {
    pub accept_version: VersionPredicate,
    pub validator: Arc<dyn ArgumentValidator>,
    pub request_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            accept_version: Arc::new(|_| true),
            validator: Arc::new(StructuralValidator),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Per-request overrides.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Wall-clock deadline; the client default applies when absent.
    pub timeout: Option<Duration>,
    /// Conveyed to the server as `_meta.progressToken`.
    pub progress_token: Option<Value>,
}

struct Waiter {
    method: String,
    tx: oneshot::Sender<Result<Value, McpError>>,
}

/// State shared between the client handle and its dispatcher task.
struct Shared {
    name: String,
    state: StdMutex<ClientState>,
    pending: Mutex<HashMap<u64, Waiter>>,
}

impl Shared {
    fn state(&self) -> ClientState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, state: ClientState) {
        *self.state.lock().unwrap() = state;
    }

    /// Reject every in-flight request. Runs on teardown of any kind.
    async fn fail_pending(&self) {
        let mut pending = self.pending.lock().await;
        for (_, waiter) in pending.drain() {
            let _ = waiter.tx.send(Err(McpError::ConnectionClosed));
        }
    }
}

/// Client for a single MCP server.
pub struct McpClient {
    entry: ServerEntry,
    options: ClientOptions,
    shared: Arc<Shared>,
    transport: Mutex<Option<Transport>>,
    next_id: AtomicU64,
    closing: AtomicBool,
    server_capabilities: StdMutex<Option<Value>>,
    negotiated_version: StdMutex<Option<String>>,
    dispatcher: StdMutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl McpClient {
    /// Connect to an MCP server: open the transport and run the handshake.
    pub async fn connect(entry: ServerEntry, options: ClientOptions) -> Result<Self, McpError> {
        entry.validate()?;

        let shared = Arc::new(Shared {
            name: entry.name.clone(),
            state: StdMutex::new(ClientState::New),
            pending: Mutex::new(HashMap::new()),
        });

        let (transport, inbound) = Transport::connect(&entry).await?;
        shared.set_state(ClientState::Handshaking);
        let dispatcher = tokio::spawn(dispatch_loop(inbound, Arc::clone(&shared)));

        let client = Self {
            entry,
            options,
            shared,
            transport: Mutex::new(Some(transport)),
            next_id: AtomicU64::new(1),
            closing: AtomicBool::new(false),
            server_capabilities: StdMutex::new(None),
            negotiated_version: StdMutex::new(None),
            dispatcher: StdMutex::new(Some(dispatcher)),
        };

        match client.handshake().await {
            Ok(()) => Ok(client),
            Err(e) => {
                client.teardown().await;
                Err(e)
            }
        }
    }

    async fn handshake(&self) -> Result<(), McpError> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": CLIENT_NAME,
                "version": env!("CARGO_PKG_VERSION"),
            },
        });
        let result = self
            .request_raw("initialize", Some(params), RequestOptions::default())
            .await?;

        let version = result
            .get("protocolVersion")
            .and_then(Value::as_str)
            .unwrap_or(PROTOCOL_VERSION)
            .to_string();
        if !(self.options.accept_version)(&version) {
            self.shared.set_state(ClientState::Failed);
            return Err(McpError::UnsupportedProtocolVersion { version });
        }

        *self.server_capabilities.lock().unwrap() = result.get("capabilities").cloned();
        {
            let transport = self.transport.lock().await;
            if let Some(t) = transport.as_ref() {
                t.set_protocol_version(&version);
            }
        }
        *self.negotiated_version.lock().unwrap() = Some(version);

        // Fire-and-forget; a lost notification is not fatal to the session.
        if let Err(e) = self.notify("notifications/initialized", None).await {
            tracing::warn!(
                "Failed to send initialized notification to '{}': {e}",
                self.name()
            );
        }

        self.shared.set_state(ClientState::Ready);
        tracing::info!("MCP server '{}' connected", self.name());
        Ok(())
    }

    /// List the tools the server exposes.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        let result = self
            .request("tools/list", Some(serde_json::json!({})))
            .await?;
        match result.get("tools") {
            Some(tools) => serde_json::from_value(tools.clone())
                .map_err(|e| McpError::Parse(format!("bad tools/list result: {e}"))),
            None => Ok(Vec::new()),
        }
    }

    /// Validate `arguments` against `schema` and call the named tool.
    ///
    /// The returned value is the unwrapped tool result.
    pub async fn call_tool(
        &self,
        tool: &str,
        arguments: Value,
        schema: &Value,
    ) -> Result<Value, McpError> {
        self.options
            .validator
            .validate(&arguments, schema)
            .map_err(McpError::InvalidParams)?;
        self.request(
            "tools/call",
            Some(serde_json::json!({"name": tool, "arguments": arguments})),
        )
        .await
    }

    /// Send a request with default options.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, McpError> {
        self.request_raw(method, params, RequestOptions::default())
            .await
    }

    /// Send a request with explicit per-request options.
    pub async fn request_with(
        &self,
        method: &str,
        params: Option<Value>,
        options: RequestOptions,
    ) -> Result<Value, McpError> {
        self.request_raw(method, params, options).await
    }

    /// Send a notification (fire-and-forget, no response expected).
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let message = serde_json::to_value(JsonRpcNotification::new(method, params))?;
        let transport = self.transport.lock().await;
        match transport.as_ref() {
            Some(t) => t.send(&message).await,
            None => Err(McpError::ConnectionClosed),
        }
    }

    async fn request_raw(
        &self,
        method: &str,
        params: Option<Value>,
        options: RequestOptions,
    ) -> Result<Value, McpError> {
        self.check_sendable(method)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut request = JsonRpcRequest::new(id, method, params);
        if let Some(token) = options.progress_token {
            request = request.with_progress_token(token);
        }
        let message = serde_json::to_value(&request)?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.shared.pending.lock().await;
            pending.insert(
                id,
                Waiter {
                    method: method.to_string(),
                    tx,
                },
            );
        }

        let sent = {
            let transport = self.transport.lock().await;
            match transport.as_ref() {
                Some(t) => t.send(&message).await,
                None => Err(McpError::ConnectionClosed),
            }
        };
        if let Err(e) = sent {
            self.shared.pending.lock().await.remove(&id);
            return Err(e);
        }

        let timeout = options.timeout.unwrap_or(self.options.request_timeout);
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(McpError::ConnectionClosed),
            Err(_) => {
                // Expired: the waiter leaves the table, a late response
                // for this id will be logged and dropped.
                self.shared.pending.lock().await.remove(&id);
                Err(McpError::RequestTimeout {
                    method: method.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// READY guard; `initialize` and `shutdown` pass during the handshake.
    fn check_sendable(&self, method: &str) -> Result<(), McpError> {
        let bypass = matches!(method, "initialize" | "shutdown");
        match self.shared.state() {
            ClientState::Ready => Ok(()),
            ClientState::Handshaking if bypass => Ok(()),
            ClientState::Closed | ClientState::Failed => Err(McpError::ConnectionClosed),
            _ => Err(McpError::ServerNotRunning {
                name: self.name().to_string(),
            }),
        }
    }

    /// Close the connection. A no-op unless the client is READY.
    pub async fn close(&self) {
        if self.shared.state() != ClientState::Ready || self.closing.swap(true, Ordering::SeqCst) {
            return;
        }

        // Best-effort; many servers simply exit on EOF instead.
        let _ = self
            .request_with(
                "shutdown",
                None,
                RequestOptions {
                    timeout: Some(SHUTDOWN_TIMEOUT),
                    progress_token: None,
                },
            )
            .await;

        self.teardown().await;
        tracing::info!("MCP server '{}' disconnected", self.name());
    }

    async fn teardown(&self) {
        if self.shared.state() != ClientState::Failed {
            self.shared.set_state(ClientState::Closed);
        }
        if let Some(mut transport) = self.transport.lock().await.take() {
            transport.close().await;
        }
        if let Some(handle) = self.dispatcher.lock().unwrap().take() {
            handle.abort();
        }
        self.shared.fail_pending().await;
    }

    /// The server name.
    pub fn name(&self) -> &str {
        &self.entry.name
    }

    /// The configuration snapshot this client was built from.
    pub fn entry(&self) -> &ServerEntry {
        &self.entry
    }

    pub fn state(&self) -> ClientState {
        self.shared.state()
    }

    /// Capabilities the server reported during the handshake.
    pub fn capabilities(&self) -> Option<Value> {
        self.server_capabilities.lock().unwrap().clone()
    }

    pub fn negotiated_protocol_version(&self) -> Option<String> {
        self.negotiated_version.lock().unwrap().clone()
    }

    /// Number of requests currently awaiting a response.
    pub async fn in_flight(&self) -> usize {
        self.shared.pending.lock().await.len()
    }
}

/// Consume transport events until the channel ends, then fail whatever
/// is still pending.
async fn dispatch_loop(mut inbound: mpsc::Receiver<TransportEvent>, shared: Arc<Shared>) {
    while let Some(event) = inbound.recv().await {
        match event {
            TransportEvent::Message(frame) => handle_frame(&shared, frame).await,
            TransportEvent::Closed => break,
        }
    }

    if shared.state() != ClientState::Failed {
        shared.set_state(ClientState::Closed);
    }
    shared.fail_pending().await;
}

async fn handle_frame(shared: &Shared, frame: Value) {
    let message: JsonRpcMessage = match serde_json::from_value(frame) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!("Dropping malformed message from '{}': {e}", shared.name);
            return;
        }
    };

    if message.is_notification() {
        match message.method.as_deref() {
            Some("notifications/initialized") => {
                tracing::debug!("'{}' acknowledged initialization", shared.name);
            }
            Some(other) => {
                tracing::debug!("Ignoring notification '{other}' from '{}'", shared.name);
            }
            None => tracing::debug!("Ignoring id-less message from '{}'", shared.name),
        }
        return;
    }

    let id = message.id.expect("checked by is_notification");
    let Some(waiter) = shared.pending.lock().await.remove(&id) else {
        tracing::warn!(
            "Dropping response from '{}' for unknown request id {id}",
            shared.name
        );
        return;
    };

    let outcome = if let Some(err) = message.error {
        Err(McpError::Rpc {
            code: err.code,
            message: err.message,
            data: err.data,
        })
    } else {
        let result = message.result.unwrap_or(Value::Null);
        if waiter.method == "tools/call" {
            finish_tool_result(result)
        } else {
            Ok(result)
        }
    };
    let _ = waiter.tx.send(outcome);
}

/// Descend through single-key wrapper objects until a `content` field
/// appears or no further descent is possible.
///
/// Some servers wrap the canonical `{content: [...]}` payload in an
/// arbitrarily named object, e.g. `{toolResults: {content: [...]}}`.
pub fn unwrap_tool_result(value: Value) -> Value {
    let mut node = value;
    loop {
        if node.get("content").is_some() {
            return node;
        }
        let next = match &node {
            Value::Object(map) if map.len() == 1 => {
                let inner = map.values().next().expect("length checked");
                inner.is_object().then(|| inner.clone())
            }
            _ => None,
        };
        match next {
            Some(inner) => node = inner,
            None => return node,
        }
    }
}

/// Unwrap a `tools/call` result and surface `isError` payloads as errors.
fn finish_tool_result(result: Value) -> Result<Value, McpError> {
    let node = unwrap_tool_result(result);
    if node.get("isError").and_then(Value::as_bool) == Some(true) {
        let message = node
            .get("content")
            .and_then(Value::as_array)
            .and_then(|items| {
                items.iter().find_map(|item| {
                    if item.get("type").and_then(Value::as_str) == Some("text") {
                        item.get("text").and_then(Value::as_str)
                    } else {
                        None
                    }
                })
            })
            .unwrap_or("tool reported an error")
            .to_string();
        return Err(McpError::Internal {
            message,
            data: Some(node),
        });
    }
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportKind;
    use serde_json::json;

    fn offline_client(state: ClientState) -> McpClient {
        McpClient {
            entry: ServerEntry {
                name: "offline".to_string(),
                kind: TransportKind::Stdio,
                command: Some("unused".to_string()),
                args: vec![],
                env: std::collections::HashMap::new(),
                url: None,
            },
            options: ClientOptions::default(),
            shared: Arc::new(Shared {
                name: "offline".to_string(),
                state: StdMutex::new(state),
                pending: Mutex::new(HashMap::new()),
            }),
            transport: Mutex::new(None),
            next_id: AtomicU64::new(1),
            closing: AtomicBool::new(false),
            server_capabilities: StdMutex::new(None),
            negotiated_version: StdMutex::new(None),
            dispatcher: StdMutex::new(None),
        }
    }

    #[test]
    fn unwrap_passes_canonical_result_through() {
        let value = json!({"content": [{"type": "text", "text": "ok"}]});
        assert_eq!(unwrap_tool_result(value.clone()), value);
    }

    #[test]
    fn unwrap_strips_single_key_wrapper() {
        let wrapped = json!({"toolResults": {"content": [{"type": "text", "text": "ok"}]}});
        let expected = json!({"content": [{"type": "text", "text": "ok"}]});
        assert_eq!(unwrap_tool_result(wrapped), expected);
    }

    #[test]
    fn unwrap_descends_nested_wrappers() {
        let wrapped = json!({"a": {"b": {"content": []}}});
        assert_eq!(unwrap_tool_result(wrapped), json!({"content": []}));
    }

    #[test]
    fn unwrap_stops_when_descent_impossible() {
        let value = json!({"a": 5});
        assert_eq!(unwrap_tool_result(value.clone()), value);
        let value = json!({"a": 1, "b": 2});
        assert_eq!(unwrap_tool_result(value.clone()), value);
        let value = json!([1, 2, 3]);
        assert_eq!(unwrap_tool_result(value.clone()), value);
    }

    #[test]
    fn unwrap_is_idempotent() {
        let samples = vec![
            json!({"content": []}),
            json!({"toolResults": {"content": [{"type": "text", "text": "x"}]}}),
            json!({"a": {"b": {"c": 1}}}),
            json!({"a": 5}),
            json!(null),
            json!("plain"),
            json!({}),
        ];
        for sample in samples {
            let once = unwrap_tool_result(sample.clone());
            let twice = unwrap_tool_result(once.clone());
            assert_eq!(once, twice, "unwrap not idempotent for {sample}");
        }
    }

    #[test]
    fn error_results_become_internal_errors() {
        let result = json!({
            "content": [{"type": "text", "text": "disk on fire"}],
            "isError": true
        });
        match finish_tool_result(result) {
            Err(McpError::Internal { message, data }) => {
                assert_eq!(message, "disk on fire");
                assert_eq!(data.unwrap()["isError"], true);
            }
            other => panic!("expected Internal error, got {other:?}"),
        }
    }

    #[test]
    fn error_result_without_text_gets_fallback_message() {
        let result = json!({"content": [], "isError": true});
        match finish_tool_result(result) {
            Err(McpError::Internal { message, .. }) => {
                assert_eq!(message, "tool reported an error");
            }
            other => panic!("expected Internal error, got {other:?}"),
        }
    }

    #[test]
    fn wrapped_error_result_is_detected_after_unwrapping() {
        let result = json!({"output": {"content": [{"type": "text", "text": "no"}], "isError": true}});
        assert!(finish_tool_result(result).is_err());
    }

    #[test]
    fn default_version_predicate_accepts_anything() {
        let options = ClientOptions::default();
        assert!((options.accept_version)("2024-11-05"));
        assert!((options.accept_version)("1999-01-01"));
        assert!((options.accept_version)("nonsense"));
    }

    #[tokio::test]
    async fn requests_rejected_before_handshake() {
        let client = offline_client(ClientState::New);
        let result = client.request("tools/list", None).await;
        assert!(matches!(result, Err(McpError::ServerNotRunning { .. })));
    }

    #[tokio::test]
    async fn requests_rejected_after_close() {
        let client = offline_client(ClientState::Closed);
        let result = client.request("tools/list", None).await;
        assert!(matches!(result, Err(McpError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn handshake_methods_bypass_ready_guard() {
        let client = offline_client(ClientState::Handshaking);
        // Passes the state guard, then fails at the missing transport —
        // a non-bypassing method would fail the guard instead.
        let result = client.request("initialize", None).await;
        assert!(matches!(result, Err(McpError::ConnectionClosed)));
        let result = client.request("tools/list", None).await;
        assert!(matches!(result, Err(McpError::ServerNotRunning { .. })));
    }

    #[tokio::test]
    async fn close_is_noop_when_not_ready() {
        let client = offline_client(ClientState::New);
        client.close().await;
        assert_eq!(client.state(), ClientState::New);

        let client = offline_client(ClientState::Closed);
        client.close().await;
        assert_eq!(client.state(), ClientState::Closed);
    }
}
