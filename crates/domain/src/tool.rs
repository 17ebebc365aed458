//! Provider-agnostic message and tool-call shapes (spec §3, §6).
//!
//! [`AgentMessage`] is the shape agent memory stores and the shape sent
//! to chat-completion providers after passing through message
//! preparation (see `relaycore-core::message_prep`).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// The `function` payload of a tool call, per the OpenAI-style wire shape
/// named in spec §3: `{id, type='function', function:{name, arguments}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallFunction {
    pub name: String,
    /// JSON-encoded arguments string, not a parsed `Value` — matches the
    /// wire shape every provider adapter emits.
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: ToolCallFunction,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: "function".to_string(),
            function: ToolCallFunction {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    /// Parse `function.arguments` as JSON. Malformed arguments return `Null`,
    /// not an error — callers decide how to surface that (spec §4.8 step 6).
    pub fn parsed_arguments(&self) -> serde_json::Value {
        serde_json::from_str(&self.function.arguments).unwrap_or(serde_json::Value::Null)
    }
}

/// A single entry in an agent's memory, and the unit sent to/received
/// from an LLM provider (spec §3 `AgentMessage`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    /// Client-side-only marker, stripped before reaching a provider
    /// (spec §4.2 step 2). Never serialized to the wire.
    #[serde(skip)]
    pub client_only: bool,
}

impl AgentMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>, sender: impl Into<String>) -> Self {
        let mut m = Self::new(Role::User, content);
        m.sender = Some(sender.into());
        m
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut m = Self::new(Role::Tool, content);
        m.tool_call_id = Some(tool_call_id.into());
        m
    }

    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            sender: None,
            tool_call_id: None,
            tool_calls: None,
            created_at: Some(chrono::Utc::now()),
            chat_id: None,
            client_only: false,
        }
    }

    pub fn with_chat_id(mut self, chat_id: impl Into<String>) -> Self {
        self.chat_id = Some(chat_id.into());
        self
    }

    pub fn with_tool_calls(mut self, calls: Vec<ToolCall>) -> Self {
        self.tool_calls = if calls.is_empty() { None } else { Some(calls) };
        self
    }
}

/// A tool definition advertised to the LLM (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Parsed form of the `__type: "tool_result"` enhanced-string content
/// format handled by message preparation (spec §4.2 "Enhanced-string
/// parsing").
#[derive(Debug, Clone, Deserialize)]
pub struct EnhancedToolResult {
    pub tool_call_id: String,
    pub content: String,
    #[serde(default, rename = "agentId")]
    pub agent_id: Option<String>,
}

/// Attempt to parse `content` as an enhanced tool-result string. Returns
/// `None` for anything that isn't `{"__type":"tool_result",...}` JSON —
/// not an error, since most message content is plain text.
pub fn parse_enhanced_tool_result(content: &str) -> Option<EnhancedToolResult> {
    let value: serde_json::Value = serde_json::from_str(content).ok()?;
    if value.get("__type").and_then(|v| v.as_str()) != Some("tool_result") {
        return None;
    }
    serde_json::from_value(value).ok()
}
