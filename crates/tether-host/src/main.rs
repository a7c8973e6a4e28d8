//! Tether host — serves the MCP control plane without an embedding
//! application. The plugin proper only hands routes to a host router;
//! this binary is that host, for development and standalone use.

use anyhow::{Context, Result};
use clap::Parser;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tether_api::{PluginState, router};
use tether_mcp::{ClientOptions, McpRegistry};
use tether_settings::SettingsStore;

#[derive(Parser)]
#[command(name = "tether", version, about = "MCP connection broker")]
struct Cli {
    /// Settings root directory (defaults to $TETHER_ROOT, then ~/.tether)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:8930")]
    addr: SocketAddr,

    /// Enable verbose/debug logging
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(io::stderr)
        .init();

    let root = cli.root.unwrap_or_else(settings_root);
    tracing::info!("Settings root: {}", root.display());

    let registry = Arc::new(McpRegistry::new(ClientOptions::default()));
    let store = Arc::new(SettingsStore::new(&root));
    let state = PluginState::new(Arc::clone(&registry), store);

    let app = axum::Router::new().nest("/mcp", router(state));

    let listener = tokio::net::TcpListener::bind(cli.addr)
        .await
        .with_context(|| format!("Failed to bind {}", cli.addr))?;
    tracing::info!("Control plane listening on http://{}", cli.addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Close every client so child processes do not linger
    registry.teardown().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutting down");
}

/// Resolve the per-user settings root: $TETHER_ROOT, then ~/.tether.
fn settings_root() -> PathBuf {
    if let Ok(dir) = std::env::var("TETHER_ROOT") {
        return PathBuf::from(dir);
    }
    dirs_next::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tether")
}
