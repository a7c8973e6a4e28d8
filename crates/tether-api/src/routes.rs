//! The control-plane REST surface.
//!
//! Handlers validate bodies by hand where the contract promises a 400,
//! re-read the settings document per request, and drive the registry.

use crate::PluginState;
use crate::cache;
use crate::error::ApiError;
use axum::extract::{Path, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tether_mcp::ServerEntry;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the route set the embedding host mounts.
pub fn router(state: PluginState) -> Router {
    Router::new()
        .route("/servers", get(list_servers).post(add_server))
        .route("/servers/disabled", post(set_disabled_servers))
        .route("/servers/{name}", delete(delete_server))
        .route("/servers/{name}/start", post(start_server))
        .route("/servers/{name}/stop", post(stop_server))
        .route("/servers/{name}/list-tools", get(list_tools))
        .route("/servers/{name}/disabled-tools", post(set_disabled_tools))
        .route("/servers/{name}/reload-tools", post(reload_tools))
        .route("/servers/{name}/call-tool", post(call_tool))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn list_servers(State(state): State<PluginState>) -> Result<Json<Value>, ApiError> {
    let settings = state.store.load().await?;
    let mut rows = Vec::with_capacity(settings.mcp_servers.len());
    for (name, entry) in &settings.mcp_servers {
        let client = state.registry.get(name).await;
        // env stays server-side
        let mut row = json!({
            "name": name,
            "isRunning": client.is_some(),
            "config": {"command": entry.command, "args": entry.args},
            "enabled": settings.server_enabled(name),
            "disabledTools": settings.disabled_tools.get(name).cloned().unwrap_or_default(),
            "cachedTools": settings.cached_tools.get(name).cloned().unwrap_or_default(),
        });
        if let Some(capabilities) = client.and_then(|c| c.capabilities()) {
            row["capabilities"] = capabilities;
        }
        rows.push(row);
    }
    Ok(Json(Value::Array(rows)))
}

async fn add_server(
    State(state): State<PluginState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let name = body
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::BadRequest("'name' must be a string".to_string()))?;
    let config = body
        .get("config")
        .and_then(Value::as_object)
        .ok_or_else(|| ApiError::BadRequest("'config' must be an object".to_string()))?;

    let mut config = config.clone();
    config.insert("name".to_string(), json!(name));
    if !config.contains_key("type") {
        config.insert("type".to_string(), json!("stdio"));
    }
    let entry: ServerEntry = serde_json::from_value(Value::Object(config))
        .map_err(|e| ApiError::BadRequest(format!("invalid config: {e}")))?;
    entry
        .validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let mut settings = state.store.load().await?;
    if settings.mcp_servers.contains_key(name) {
        return Err(ApiError::Conflict(format!("server '{name}' already exists")));
    }
    settings.mcp_servers.insert(name.to_string(), entry);
    state.store.save(&settings).await?;
    Ok(Json(json!({})))
}

async fn delete_server(
    State(state): State<PluginState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    // Stop first, so a mid-flight client never outlives its entry
    state.registry.stop(&name).await;
    state.store.update(|settings| settings.remove_server(&name)).await?;
    Ok(Json(json!({})))
}

async fn set_disabled_servers(
    State(state): State<PluginState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let names = string_array(&body, "disabledServers")?;
    state
        .store
        .update(move |settings| settings.disabled_servers = names)
        .await?;
    Ok(Json(json!({})))
}

async fn start_server(
    State(state): State<PluginState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let settings = state.store.load().await?;
    let entry = settings
        .mcp_servers
        .get(&name)
        .cloned()
        .ok_or_else(|| ApiError::NotFound(format!("Unknown server: {name}")))?;
    if !settings.server_enabled(&name) {
        return Err(ApiError::Forbidden("This server is disabled".to_string()));
    }
    state.registry.start(entry).await?;
    Ok(Json(json!({})))
}

async fn stop_server(
    State(state): State<PluginState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if state.registry.stop(&name).await {
        Ok(Json(json!({})))
    } else {
        Err(ApiError::BadRequest(format!("Server '{name}' is not running")))
    }
}

async fn list_tools(
    State(state): State<PluginState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let tools = cache::list_with_status(&state, &name).await?;
    Ok(Json(Value::Array(tools)))
}

async fn set_disabled_tools(
    State(state): State<PluginState>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let tools = string_array(&body, "disabledTools")?;
    let settings = state.store.load().await?;
    if !settings.mcp_servers.contains_key(&name) {
        return Err(ApiError::NotFound(format!("Unknown server: {name}")));
    }
    state
        .store
        .update(move |settings| {
            settings.disabled_tools.insert(name, tools);
        })
        .await?;
    Ok(Json(json!({})))
}

async fn reload_tools(
    State(state): State<PluginState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let tools = cache::reload_cache(&state, &name).await?;
    let settings = state.store.load().await?;
    Ok(Json(Value::Array(cache::annotate(&settings, &name, &tools))))
}

async fn call_tool(
    State(state): State<PluginState>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let tool_name = body
        .get("toolName")
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::BadRequest("'toolName' must be a string".to_string()))?;
    let arguments = body.get("arguments").cloned().unwrap_or_else(|| json!({}));

    let client = state
        .registry
        .get(&name)
        .await
        .ok_or_else(|| ApiError::BadRequest(format!("Server '{name}' is not running")))?;

    let settings = state.store.load().await?;
    if !settings.tool_enabled(&name, tool_name) {
        return Err(ApiError::Forbidden("This tool is disabled".to_string()));
    }

    let mut cached = settings.cached_tools.get(&name).cloned().unwrap_or_default();
    if cached.is_empty() {
        // Cache miss with the server already running: refresh in place
        cached = client.list_tools().await?;
        let server = name.clone();
        let tools = cached.clone();
        state
            .store
            .update(move |settings| {
                settings.cached_tools.insert(server, tools);
            })
            .await?;
    }
    let descriptor = cached
        .iter()
        .find(|tool| tool.name == tool_name)
        .ok_or_else(|| ApiError::NotFound(format!("Unknown tool: {tool_name}")))?;

    let data = client
        .call_tool(tool_name, arguments, &descriptor.input_schema)
        .await?;
    Ok(Json(json!({
        "result": {"toolName": tool_name, "status": "executed", "data": data}
    })))
}

/// Extract `key` as an array of strings, or fail with a 400.
fn string_array(body: &Value, key: &str) -> Result<Vec<String>, ApiError> {
    let items = body
        .get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| ApiError::BadRequest(format!("'{key}' must be an array")))?;
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| ApiError::BadRequest(format!("'{key}' must contain only strings")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_array_accepts_strings() {
        let body = json!({"disabledServers": ["a", "b"]});
        let names = string_array(&body, "disabledServers").unwrap();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn string_array_rejects_non_array() {
        let body = json!({"disabledServers": "a"});
        assert!(string_array(&body, "disabledServers").is_err());
    }

    #[test]
    fn string_array_rejects_mixed_items() {
        let body = json!({"disabledServers": ["a", 1]});
        assert!(string_array(&body, "disabledServers").is_err());
    }
}
