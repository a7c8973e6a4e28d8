//! Server catalogue entries and tool descriptors.

use crate::error::McpError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How to reach an MCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransportKind {
    Stdio,
    Sse,
    StreamableHttp,
}

impl TransportKind {
    /// Whether this kind reaches the server over HTTP.
    pub fn is_remote(&self) -> bool {
        matches!(self, TransportKind::Sse | TransportKind::StreamableHttp)
    }
}

/// A configured MCP server, as persisted in the settings document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: TransportKind,
    /// Command to run (stdio only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Arguments to pass to the command.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Environment variables overlaid onto the child's environment.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    /// Endpoint URL (sse and streamableHttp only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl ServerEntry {
    /// Check the entry's structural invariants.
    pub fn validate(&self) -> Result<(), McpError> {
        match self.kind {
            TransportKind::Stdio => {
                if self.command.as_deref().unwrap_or("").is_empty() {
                    return Err(McpError::InvalidRequest(format!(
                        "stdio server '{}' requires a command",
                        self.name
                    )));
                }
            }
            TransportKind::Sse | TransportKind::StreamableHttp => {
                let url = self.url.as_deref().unwrap_or("");
                if reqwest::Url::parse(url).is_err() {
                    return Err(McpError::InvalidRequest(format!(
                        "server '{}' requires an absolute url, got '{url}'",
                        self.name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// A tool exposed by an MCP server, stored verbatim from `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_schema", rename = "inputSchema")]
    pub input_schema: serde_json::Value,
    /// Any additional fields the server returned.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_schema() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}
