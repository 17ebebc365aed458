//! MCP tool interface (spec §6): tool discovery and dispatch against
//! already-connected servers, namespaced as `serverId:toolName`.
//! Server transport and handshake are external collaborators.

pub mod client;
pub mod error;
pub mod manager;
pub mod protocol;

pub use client::McpServerClient;
pub use error::McpError;
pub use manager::McpManager;
pub use protocol::{McpContentItem, McpToolCallResult, McpToolDef};
