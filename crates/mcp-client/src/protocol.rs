//! Wire shapes for the MCP tool interface (spec §6).
//!
//! Actual JSON-RPC framing and server process transport are external
//! collaborators — this crate only defines what a connected server
//! hands back once one exists.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool definition as reported by a server's `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpToolDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_schema")]
    pub input_schema: Value,
}

fn default_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

/// A single content item in a `tools/call` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpContentItem {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default)]
    pub text: String,
}

/// The result of invoking a tool on a server.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct McpToolCallResult {
    pub content: Vec<McpContentItem>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

impl McpToolCallResult {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            content: vec![McpContentItem {
                content_type: "text".into(),
                text: body.into(),
            }],
            is_error: false,
        }
    }

    pub fn error(body: impl Into<String>) -> Self {
        Self {
            content: vec![McpContentItem {
                content_type: "text".into(),
                text: body.into(),
            }],
            is_error: true,
        }
    }

    /// Concatenate all text content items, the shape the dispatch loop
    /// (spec §4.8) folds into a tool-result message.
    pub fn as_text(&self) -> String {
        self.content
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Splits a namespaced tool name (`serverName:toolName`) into its parts.
/// Returns `None` if there's no `:` separator.
pub fn split_namespaced(name: &str) -> Option<(&str, &str)> {
    name.split_once(':')
}

pub fn namespaced(server_id: &str, tool_name: &str) -> String {
    format!("{server_id}:{tool_name}")
}
