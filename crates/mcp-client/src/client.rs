//! The MCP tool interface (spec §6): `listTools` / `callTool`.
//!
//! A concrete implementation speaks JSON-RPC over a spawned server
//! process or an SSE connection — that transport is an external
//! collaborator (spec §1). The orchestration core only depends on this
//! trait, never on a concrete transport directly.

use serde_json::Value;

use crate::error::McpError;
use crate::protocol::{McpToolCallResult, McpToolDef};

#[async_trait::async_trait]
pub trait McpServerClient: Send + Sync {
    /// The server id this client speaks for, used to namespace tool
    /// names as `serverId:toolName`.
    fn server_id(&self) -> &str;

    /// Whether the underlying connection is still usable.
    fn is_alive(&self) -> bool;

    async fn list_tools(&self) -> Result<Vec<McpToolDef>, McpError>;

    async fn call_tool(&self, tool_name: &str, arguments: Value) -> Result<McpToolCallResult, McpError>;
}
