#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("mcp server {0} not found")]
    ServerNotFound(String),
    #[error("mcp server {0} is not connected")]
    ServerDown(String),
    #[error("mcp tool {0} not found")]
    ToolNotFound(String),
    #[error("mcp protocol error: {0}")]
    Protocol(String),
    #[error("mcp tools/list timed out after {0}ms")]
    ListTimeout(u64),
}
