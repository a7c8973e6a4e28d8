//! Error types for MCP operations.
//!
//! Every variant maps onto the stable JSON-RPC error code taxonomy via
//! [`McpError::code`], so callers can surface a numeric code without
//! matching on the variant.

use thiserror::Error;

/// Errors from MCP server communication.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Failed to parse inbound frame: {0}")]
    Parse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("{message}")]
    Internal {
        message: String,
        data: Option<serde_json::Value>,
    },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Request '{method}' timed out after {timeout_ms}ms")]
    RequestTimeout { method: String, timeout_ms: u64 },

    #[error("Unsupported protocol version '{version}'")]
    UnsupportedProtocolVersion { version: String },

    /// An `error` object returned by the server, carried verbatim.
    #[error("Server error (code {code}): {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    #[error("Failed to spawn MCP server '{command}': {source}")]
    SpawnFailed {
        command: String,
        source: std::io::Error,
    },

    #[error("MCP server '{name}' is not running")]
    ServerNotRunning { name: String },

    #[error("MCP server '{name}' is already running")]
    AlreadyRunning { name: String },

    #[error("HTTP transport error: {0}")]
    Http(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// The stable numeric code for this error.
    pub fn code(&self) -> i64 {
        match self {
            McpError::Parse(_) | McpError::Json(_) => -32700,
            McpError::InvalidRequest(_) | McpError::AlreadyRunning { .. } => -32600,
            McpError::MethodNotFound(_) => -32601,
            McpError::InvalidParams(_) => -32602,
            McpError::Internal { .. }
            | McpError::SpawnFailed { .. }
            | McpError::Http(_)
            | McpError::Io(_) => -32603,
            McpError::ConnectionClosed | McpError::ServerNotRunning { .. } => -32000,
            McpError::RequestTimeout { .. } => -32001,
            McpError::UnsupportedProtocolVersion { .. } => -32002,
            McpError::Rpc { code, .. } => *code,
        }
    }

    /// The structured payload attached to the error, if any.
    pub fn data(&self) -> Option<&serde_json::Value> {
        match self {
            McpError::Internal { data, .. } | McpError::Rpc { data, .. } => data.as_ref(),
            _ => None,
        }
    }
}
