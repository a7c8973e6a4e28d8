//! MCP (Model Context Protocol) client runtime for Tether.
//!
//! Brokers connections to external MCP servers over three transports:
//! local subprocesses speaking newline-delimited JSON-RPC 2.0, SSE
//! event streams with a POST sidecar, and unified streamable-HTTP
//! endpoints. A per-connection client runs the initialize handshake,
//! correlates requests to responses, and exposes `tools/list` and
//! `tools/call`; the registry holds at most one live client per server
//! name.

pub mod client;
pub mod config;
pub mod error;
pub mod jsonrpc;
pub mod registry;
pub mod sse;
pub mod transport;
pub mod validate;

pub use client::{ClientOptions, ClientState, McpClient, PROTOCOL_VERSION, RequestOptions};
pub use config::{ServerEntry, ToolDescriptor, TransportKind};
pub use error::McpError;
pub use registry::{McpRegistry, RegistryEntry};
pub use validate::{ArgumentValidator, StructuralValidator};
