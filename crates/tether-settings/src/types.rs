//! The persisted settings document.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tether_mcp::{ServerEntry, ToolDescriptor};

/// Contents of `mcp_settings.json`.
///
/// Missing top-level keys deserialize as their empty defaults, which is
/// the entire forward-migration story: a document from an older version
/// reads cleanly and gains the new keys on its next rewrite. Top-level
/// keys we do not know about survive a read-modify-write round trip.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpSettings {
    #[serde(default)]
    pub mcp_servers: BTreeMap<String, ServerEntry>,
    #[serde(default)]
    pub disabled_servers: Vec<String>,
    #[serde(default)]
    pub disabled_tools: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub cached_tools: BTreeMap<String, Vec<ToolDescriptor>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl McpSettings {
    /// Remove a server and everything keyed by its name.
    ///
    /// `disabledServers` is deliberately left alone; stale names there
    /// are tolerated.
    pub fn remove_server(&mut self, name: &str) {
        self.mcp_servers.remove(name);
        self.disabled_tools.remove(name);
        self.cached_tools.remove(name);
    }

    /// Whether the named server is enabled (not on the disabled list).
    pub fn server_enabled(&self, name: &str) -> bool {
        !self.disabled_servers.iter().any(|n| n == name)
    }

    /// Whether the named tool on the named server is enabled.
    pub fn tool_enabled(&self, server: &str, tool: &str) -> bool {
        !self
            .disabled_tools
            .get(server)
            .is_some_and(|tools| tools.iter().any(|t| t == tool))
    }
}
