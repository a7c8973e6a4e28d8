//! Tool-cache coordinator.
//!
//! Sits between the registry and the store: refreshes the persisted
//! descriptor list from a live (or temporarily started) server, and
//! serves cached descriptors annotated with their enabled state.

use crate::PluginState;
use crate::error::ApiError;
use serde_json::Value;
use tether_mcp::ToolDescriptor;
use tether_settings::McpSettings;

/// Refresh the cached descriptors for `name`.
///
/// Starts the server temporarily when it is not already running. A
/// failing `tools/list` propagates and leaves the prior cache intact.
pub async fn reload_cache(state: &PluginState, name: &str) -> Result<Vec<ToolDescriptor>, ApiError> {
    let settings = state.store.load().await?;
    let entry = settings
        .mcp_servers
        .get(name)
        .cloned()
        .ok_or_else(|| ApiError::NotFound(format!("Unknown server: {name}")))?;

    let tools = state
        .registry
        .temporary_connect(entry, |client| async move { client.list_tools().await })
        .await?;

    let server = name.to_string();
    let cached = tools.clone();
    state
        .store
        .update(move |settings| {
            settings.cached_tools.insert(server, cached);
        })
        .await?;
    tracing::debug!("Cached {} tools for '{name}'", tools.len());
    Ok(tools)
}

/// Cached descriptors for `name`, each annotated with `_enabled`.
///
/// An empty cache triggers a single implicit reload.
pub async fn list_with_status(state: &PluginState, name: &str) -> Result<Vec<Value>, ApiError> {
    let settings = state.store.load().await?;
    if !settings.mcp_servers.contains_key(name) {
        return Err(ApiError::NotFound(format!("Unknown server: {name}")));
    }

    let cached = settings.cached_tools.get(name).cloned().unwrap_or_default();
    let tools = if cached.is_empty() {
        reload_cache(state, name).await?
    } else {
        cached
    };

    Ok(annotate(&settings, name, &tools))
}

/// Serialize descriptors with the `_enabled` flag derived from the
/// disabled-tools list.
pub(crate) fn annotate(settings: &McpSettings, server: &str, tools: &[ToolDescriptor]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            let mut value = serde_json::to_value(tool).expect("descriptor serializes");
            value["_enabled"] = Value::Bool(settings.tool_enabled(server, &tool.name));
            value
        })
        .collect()
}
