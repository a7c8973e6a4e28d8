//! End-to-end tests for the stdio transport and client against inline
//! python mock MCP servers.
//!
//! Each test spawns `python3 -c <script>` as the server; tests skip
//! silently when python3 is not installed.

use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tether_mcp::{
    ClientOptions, ClientState, McpClient, McpError, McpRegistry, RequestOptions, ServerEntry,
    TransportKind,
};

/// A well-behaved echo server: initialize, tools/list, tools/call.
const ECHO_SERVER: &str = r#"
import json, sys

def send(obj):
    sys.stdout.write(json.dumps(obj) + "\n")
    sys.stdout.flush()

for line in sys.stdin:
    line = line.strip()
    if not line:
        continue
    msg = json.loads(line)
    method = msg.get("method")
    rid = msg.get("id")
    if method == "initialize":
        send({"jsonrpc": "2.0", "id": rid, "result": {"protocolVersion": "2024-11-05", "capabilities": {"tools": {}}, "serverInfo": {"name": "echo", "version": "0.1.0"}}})
    elif method == "tools/list":
        send({"jsonrpc": "2.0", "id": rid, "result": {"tools": [{"name": "echo", "description": "Echo a message", "inputSchema": {"type": "object", "properties": {"msg": {"type": "string"}}, "required": ["msg"]}}]}})
    elif method == "tools/call":
        text = msg["params"]["arguments"].get("msg", "")
        send({"jsonrpc": "2.0", "id": rid, "result": {"content": [{"type": "text", "text": text}]}})
    elif rid is not None:
        send({"jsonrpc": "2.0", "id": rid, "result": {}})
"#;

/// Wraps tool results in a nonstandard single-key envelope.
const WRAPPING_SERVER: &str = r#"
import json, sys

def send(obj):
    sys.stdout.write(json.dumps(obj) + "\n")
    sys.stdout.flush()

for line in sys.stdin:
    line = line.strip()
    if not line:
        continue
    msg = json.loads(line)
    method = msg.get("method")
    rid = msg.get("id")
    if method == "initialize":
        send({"jsonrpc": "2.0", "id": rid, "result": {"protocolVersion": "2024-11-05", "capabilities": {}}})
    elif method == "tools/call":
        send({"jsonrpc": "2.0", "id": rid, "result": {"toolResults": {"content": [{"type": "text", "text": "ok"}]}}})
    elif rid is not None:
        send({"jsonrpc": "2.0", "id": rid, "result": {}})
"#;

/// Answers the handshake, then goes quiet.
const SILENT_SERVER: &str = r#"
import json, sys

for line in sys.stdin:
    line = line.strip()
    if not line:
        continue
    msg = json.loads(line)
    if msg.get("method") == "initialize":
        sys.stdout.write(json.dumps({"jsonrpc": "2.0", "id": msg["id"], "result": {"protocolVersion": "2024-11-05", "capabilities": {}}}) + "\n")
        sys.stdout.flush()
"#;

/// Exits immediately after the handshake.
const EXIT_AFTER_INIT: &str = r#"
import json, sys

for line in sys.stdin:
    line = line.strip()
    if not line:
        continue
    msg = json.loads(line)
    if msg.get("method") == "initialize":
        sys.stdout.write(json.dumps({"jsonrpc": "2.0", "id": msg["id"], "result": {"protocolVersion": "2024-11-05", "capabilities": {}}}) + "\n")
        sys.stdout.flush()
        sys.exit(0)
"#;

/// Echoes the request id back in the result.
const ID_ECHO_SERVER: &str = r#"
import json, sys

def send(obj):
    sys.stdout.write(json.dumps(obj) + "\n")
    sys.stdout.flush()

for line in sys.stdin:
    line = line.strip()
    if not line:
        continue
    msg = json.loads(line)
    rid = msg.get("id")
    if msg.get("method") == "initialize":
        send({"jsonrpc": "2.0", "id": rid, "result": {"protocolVersion": "2024-11-05", "capabilities": {}}})
    elif rid is not None:
        send({"jsonrpc": "2.0", "id": rid, "result": {"seen": rid}})
"#;

/// Rejects tool calls with a JSON-RPC error, or an isError result.
const FAILING_SERVER: &str = r#"
import json, sys

def send(obj):
    sys.stdout.write(json.dumps(obj) + "\n")
    sys.stdout.flush()

for line in sys.stdin:
    line = line.strip()
    if not line:
        continue
    msg = json.loads(line)
    method = msg.get("method")
    rid = msg.get("id")
    if method == "initialize":
        send({"jsonrpc": "2.0", "id": rid, "result": {"protocolVersion": "2024-11-05", "capabilities": {}}})
    elif method == "tools/call":
        name = msg["params"]["name"]
        if name == "broken":
            send({"jsonrpc": "2.0", "id": rid, "error": {"code": -32000, "message": "boom", "data": {"name": name}}})
        else:
            send({"jsonrpc": "2.0", "id": rid, "result": {"content": [{"type": "text", "text": "bad input"}], "isError": True}})
    elif rid is not None:
        send({"jsonrpc": "2.0", "id": rid, "result": {}})
"#;

fn python_entry(name: &str, script: &str) -> ServerEntry {
    ServerEntry {
        name: name.to_string(),
        kind: TransportKind::Stdio,
        command: Some("python3".to_string()),
        args: vec!["-c".to_string(), script.to_string()],
        env: HashMap::new(),
        url: None,
    }
}

/// Connect, or skip the test when python3 is unavailable.
async fn connect(name: &str, script: &str) -> Option<McpClient> {
    connect_with(name, script, ClientOptions::default()).await
}

async fn connect_with(name: &str, script: &str, options: ClientOptions) -> Option<McpClient> {
    match McpClient::connect(python_entry(name, script), options).await {
        Ok(client) => Some(client),
        Err(McpError::SpawnFailed { .. }) => None,
        Err(other) => panic!("connect failed: {other}"),
    }
}

fn free_schema() -> serde_json::Value {
    json!({"type": "object", "properties": {}})
}

#[tokio::test]
async fn handshake_reaches_ready_and_stores_capabilities() {
    let Some(client) = connect("echo", ECHO_SERVER).await else { return };
    assert_eq!(client.state(), ClientState::Ready);
    assert!(client.capabilities().unwrap().get("tools").is_some());
    assert_eq!(
        client.negotiated_protocol_version().as_deref(),
        Some("2024-11-05")
    );
    client.close().await;
    assert_eq!(client.state(), ClientState::Closed);
}

#[tokio::test]
async fn list_tools_returns_descriptors() {
    let Some(client) = connect("echo", ECHO_SERVER).await else { return };
    let tools = client.list_tools().await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "echo");
    assert_eq!(tools[0].description.as_deref(), Some("Echo a message"));
    assert_eq!(tools[0].input_schema["required"][0], "msg");
    client.close().await;
}

#[tokio::test]
async fn call_tool_round_trips() {
    let Some(client) = connect("echo", ECHO_SERVER).await else { return };
    let schema = json!({
        "type": "object",
        "properties": {"msg": {"type": "string"}},
        "required": ["msg"]
    });
    let result = client
        .call_tool("echo", json!({"msg": "hi"}), &schema)
        .await
        .unwrap();
    assert_eq!(result["content"][0]["type"], "text");
    assert_eq!(result["content"][0]["text"], "hi");
    client.close().await;
}

#[tokio::test]
async fn call_tool_strips_single_key_wrapper() {
    let Some(client) = connect("wrapper", WRAPPING_SERVER).await else { return };
    let result = client
        .call_tool("anything", json!({}), &free_schema())
        .await
        .unwrap();
    assert_eq!(result, json!({"content": [{"type": "text", "text": "ok"}]}));
    client.close().await;
}

#[tokio::test]
async fn schema_mismatch_is_rejected_before_sending() {
    let Some(client) = connect("echo", ECHO_SERVER).await else { return };
    let schema = json!({
        "type": "object",
        "properties": {"msg": {"type": "string"}},
        "required": ["msg"]
    });
    let err = client
        .call_tool("echo", json!({"msg": 42}), &schema)
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::InvalidParams(_)));
    assert_eq!(err.code(), -32602);
    assert_eq!(client.in_flight().await, 0);
    client.close().await;
}

#[tokio::test]
async fn request_ids_strictly_increase() {
    let Some(client) = connect("ids", ID_ECHO_SERVER).await else { return };
    let mut last = 0;
    for _ in 0..3 {
        let result = client.request("anything/else", None).await.unwrap();
        let seen = result["seen"].as_u64().unwrap();
        assert!(seen > last, "id {seen} not greater than {last}");
        last = seen;
    }
    client.close().await;
}

#[tokio::test]
async fn timed_out_request_leaves_no_waiter_behind() {
    let Some(client) = connect("silent", SILENT_SERVER).await else { return };
    let err = client
        .request_with(
            "tools/list",
            None,
            RequestOptions {
                timeout: Some(Duration::from_millis(100)),
                progress_token: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::RequestTimeout { .. }));
    assert_eq!(err.code(), -32001);
    assert_eq!(client.in_flight().await, 0);
    client.close().await;
}

#[tokio::test]
async fn server_exit_closes_the_client() {
    let Some(client) = connect("flaky", EXIT_AFTER_INIT).await else { return };
    // Let the exit propagate through the reader task
    tokio::time::sleep(Duration::from_millis(300)).await;
    let err = client.request("tools/list", None).await.unwrap_err();
    assert!(matches!(err, McpError::ConnectionClosed));
    assert_eq!(client.state(), ClientState::Closed);
    assert_eq!(client.in_flight().await, 0);
}

#[tokio::test]
async fn rpc_error_responses_reject_the_waiter() {
    let Some(client) = connect("failing", FAILING_SERVER).await else { return };
    let err = client
        .call_tool("broken", json!({}), &free_schema())
        .await
        .unwrap_err();
    match err {
        McpError::Rpc { code, message, data } => {
            assert_eq!(code, -32000);
            assert_eq!(message, "boom");
            assert_eq!(data.unwrap()["name"], "broken");
        }
        other => panic!("expected Rpc error, got {other:?}"),
    }
    client.close().await;
}

#[tokio::test]
async fn is_error_results_become_internal_errors() {
    let Some(client) = connect("failing", FAILING_SERVER).await else { return };
    let err = client
        .call_tool("touchy", json!({}), &free_schema())
        .await
        .unwrap_err();
    match err {
        McpError::Internal { message, data } => {
            assert_eq!(message, "bad input");
            assert_eq!(data.unwrap()["isError"], true);
        }
        other => panic!("expected Internal error, got {other:?}"),
    }
    client.close().await;
}

#[tokio::test]
async fn pending_table_empty_after_mixed_outcomes() {
    let Some(client) = connect("echo", ECHO_SERVER).await else { return };
    let schema = free_schema();
    for i in 0..4 {
        let _ = client
            .call_tool("echo", json!({"msg": format!("m{i}")}), &schema)
            .await;
    }
    let _ = client.request("unknown/method", None).await;
    assert_eq!(client.in_flight().await, 0);
    client.close().await;
}

#[tokio::test]
async fn version_predicate_can_reject_the_handshake() {
    let options = ClientOptions {
        accept_version: Arc::new(|version| version == "2199-01-01"),
        ..ClientOptions::default()
    };
    match McpClient::connect(python_entry("echo", ECHO_SERVER), options).await {
        Err(McpError::UnsupportedProtocolVersion { version }) => {
            assert_eq!(version, "2024-11-05");
        }
        Err(McpError::SpawnFailed { .. }) => {} // python3 unavailable
        Err(other) => panic!("expected UnsupportedProtocolVersion, got {other:?}"),
        Ok(_) => panic!("handshake should have been rejected"),
    }
}

// ---------------------------------------------------------------------------
// Registry lifecycle against real child processes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn registry_enforces_one_client_per_name() {
    let registry = McpRegistry::new(ClientOptions::default());
    let entry = python_entry("echo", ECHO_SERVER);
    let client = match registry.start(entry.clone()).await {
        Ok(client) => client,
        Err(McpError::SpawnFailed { .. }) => return,
        Err(other) => panic!("start failed: {other}"),
    };
    assert!(registry.is_running("echo").await);

    let err = registry.start(entry).await.unwrap_err();
    assert!(matches!(err, McpError::AlreadyRunning { .. }));

    let snapshot = registry.snapshot().await;
    assert_eq!(snapshot.iter().filter(|e| e.name == "echo").count(), 1);
    assert!(snapshot[0].running);

    assert!(registry.stop("echo").await);
    assert!(!registry.stop("echo").await);
    assert!(!registry.is_running("echo").await);
    assert_eq!(client.state(), ClientState::Closed);
}

#[tokio::test]
async fn temporary_connect_stops_what_it_started() {
    let registry = McpRegistry::new(ClientOptions::default());
    let entry = python_entry("echo", ECHO_SERVER);
    let tools = match registry
        .temporary_connect(entry, |client| async move { client.list_tools().await })
        .await
    {
        Ok(tools) => tools,
        Err(McpError::SpawnFailed { .. }) => return,
        Err(other) => panic!("temporary connect failed: {other}"),
    };
    assert_eq!(tools.len(), 1);
    assert!(!registry.is_running("echo").await);
}

#[tokio::test]
async fn temporary_connect_leaves_running_client_alone() {
    let registry = McpRegistry::new(ClientOptions::default());
    let entry = python_entry("echo", ECHO_SERVER);
    if matches!(
        registry.start(entry.clone()).await,
        Err(McpError::SpawnFailed { .. })
    ) {
        return;
    }

    let tools = registry
        .temporary_connect(entry, |client| async move { client.list_tools().await })
        .await
        .unwrap();
    assert_eq!(tools.len(), 1);
    // Still running: temporary_connect did not start it, so it must not stop it
    assert!(registry.is_running("echo").await);
    registry.teardown().await;
    assert!(!registry.is_running("echo").await);
}
