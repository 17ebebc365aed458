//! Aggregates connected MCP servers and dispatches namespaced tool calls.
//!
//! Process-spawning and handshake steps belong to the transport, which
//! is out of scope here (spec §1). This manager only needs a list of
//! already-connected `McpServerClient`s.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::client::McpServerClient;
use crate::error::McpError;
use crate::protocol::{self, McpToolCallResult, McpToolDef};

pub struct McpManager {
    servers: HashMap<String, Arc<dyn McpServerClient>>,
    list_tools_timeout: Duration,
}

impl McpManager {
    pub fn new(servers: Vec<Arc<dyn McpServerClient>>, list_tools_timeout: Duration) -> Self {
        let servers = servers.into_iter().map(|s| (s.server_id().to_string(), s)).collect();
        Self { servers, list_tools_timeout }
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Lists every tool across every connected, live server, namespaced
    /// as `serverId:toolName`. A single server's `tools/list` timing
    /// out or erroring is logged and skipped, not fatal to the batch.
    pub async fn list_all_tools(&self) -> Vec<(String, McpToolDef)> {
        let mut out = Vec::new();
        for (server_id, server) in &self.servers {
            if !server.is_alive() {
                continue;
            }
            match tokio::time::timeout(self.list_tools_timeout, server.list_tools()).await {
                Ok(Ok(tools)) => {
                    for tool in tools {
                        out.push((server_id.clone(), tool));
                    }
                }
                Ok(Err(err)) => {
                    tracing::warn!(server_id = %server_id, error = %err, "mcp tools/list failed");
                }
                Err(_) => {
                    tracing::warn!(server_id = %server_id, "mcp tools/list timed out");
                }
            }
        }
        out
    }

    /// Calls a namespaced tool (`serverId:toolName`). Returns
    /// `McpError::ToolNotFound` if the name isn't namespaced at all —
    /// callers use that to distinguish MCP tools from built-ins.
    pub async fn call_tool(&self, namespaced_name: &str, arguments: Value) -> Result<McpToolCallResult, McpError> {
        let (server_id, tool_name) =
            protocol::split_namespaced(namespaced_name).ok_or_else(|| McpError::ToolNotFound(namespaced_name.to_string()))?;

        let server = self
            .servers
            .get(server_id)
            .ok_or_else(|| McpError::ServerNotFound(server_id.to_string()))?;

        if !server.is_alive() {
            return Err(McpError::ServerDown(server_id.to_string()));
        }

        server.call_tool(tool_name, arguments).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeServer {
        id: String,
        alive: AtomicBool,
        tools: Vec<McpToolDef>,
    }

    #[async_trait]
    impl McpServerClient for FakeServer {
        fn server_id(&self) -> &str {
            &self.id
        }

        fn is_alive(&self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }

        async fn list_tools(&self) -> Result<Vec<McpToolDef>, McpError> {
            Ok(self.tools.clone())
        }

        async fn call_tool(&self, tool_name: &str, _arguments: Value) -> Result<McpToolCallResult, McpError> {
            Ok(McpToolCallResult::text(format!("called {tool_name}")))
        }
    }

    fn tool(name: &str) -> McpToolDef {
        McpToolDef {
            name: name.to_string(),
            description: String::new(),
            input_schema: serde_json::json!({"type": "object", "properties": {}}),
        }
    }

    #[tokio::test]
    async fn list_all_tools_namespaces_by_server() {
        let server = Arc::new(FakeServer {
            id: "filesystem".into(),
            alive: AtomicBool::new(true),
            tools: vec![tool("read_file")],
        });
        let manager = McpManager::new(vec![server], Duration::from_secs(5));
        let tools = manager.list_all_tools().await;
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].0, "filesystem");
        assert_eq!(tools[0].1.name, "read_file");
    }

    #[tokio::test]
    async fn list_all_tools_skips_dead_servers() {
        let server = Arc::new(FakeServer {
            id: "filesystem".into(),
            alive: AtomicBool::new(false),
            tools: vec![tool("read_file")],
        });
        let manager = McpManager::new(vec![server], Duration::from_secs(5));
        assert!(manager.list_all_tools().await.is_empty());
    }

    #[tokio::test]
    async fn call_tool_dispatches_to_namespaced_server() {
        let server = Arc::new(FakeServer {
            id: "filesystem".into(),
            alive: AtomicBool::new(true),
            tools: vec![],
        });
        let manager = McpManager::new(vec![server], Duration::from_secs(5));
        let result = manager.call_tool("filesystem:read_file", serde_json::json!({})).await.unwrap();
        assert_eq!(result.as_text(), "called read_file");
    }

    #[tokio::test]
    async fn call_tool_rejects_bare_name() {
        let manager = McpManager::new(vec![], Duration::from_secs(5));
        let err = manager.call_tool("read_file", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::ToolNotFound(_)));
    }

    #[tokio::test]
    async fn call_tool_unknown_server_errors() {
        let manager = McpManager::new(vec![], Duration::from_secs(5));
        let err = manager.call_tool("ghost:ping", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::ServerNotFound(_)));
    }

    #[tokio::test]
    async fn call_tool_dead_server_errors() {
        let server = Arc::new(FakeServer {
            id: "filesystem".into(),
            alive: AtomicBool::new(false),
            tools: vec![],
        });
        let manager = McpManager::new(vec![server], Duration::from_secs(5));
        let err = manager.call_tool("filesystem:read_file", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::ServerDown(_)));
    }
}
