//! Control-plane API for Tether.
//!
//! A stateless set of handlers over the connection registry and the
//! settings store. The embedding host owns the HTTP server; this crate
//! only hands it a router.

pub mod cache;
pub mod error;
pub mod routes;

use std::sync::Arc;
use tether_mcp::McpRegistry;
use tether_settings::SettingsStore;

pub use error::ApiError;
pub use routes::router;

/// Shared state passed to every handler. Built once at plugin startup;
/// never an ambient singleton.
#[derive(Clone)]
pub struct PluginState {
    pub registry: Arc<McpRegistry>,
    pub store: Arc<SettingsStore>,
}

impl PluginState {
    pub fn new(registry: Arc<McpRegistry>, store: Arc<SettingsStore>) -> Self {
        Self { registry, store }
    }
}
