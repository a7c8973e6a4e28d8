//! Error-to-response mapping for the control plane.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tether_mcp::McpError;
use tether_settings::SettingsError;
use thiserror::Error;

/// Errors a handler can surface to the HTTP client.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Mcp(#[from] McpError),

    #[error(transparent)]
    Settings(#[from] SettingsError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, json!({"error": message}))
            }
            ApiError::Forbidden(message) => (StatusCode::FORBIDDEN, json!({"error": message})),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, json!({"error": message})),
            ApiError::Conflict(message) => (StatusCode::CONFLICT, json!({"error": message})),
            // Protocol-level failures carry their numeric code and payload
            ApiError::Mcp(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({"error": e.to_string(), "code": e.code(), "data": e.data()}),
            ),
            ApiError::Settings(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({"error": e.to_string()}),
            ),
        };
        if status.is_server_error() {
            tracing::warn!("Control-plane error: {self}");
        }
        (status, Json(body)).into_response()
    }
}
