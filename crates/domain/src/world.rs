//! World configuration and event payloads (spec §3 `World`, `WorldMessageEvent`,
//! `WorldSSEEvent`, `ActivityState`).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::Provider;

/// Persisted configuration for a world. Runtime state (event bus, agent
/// map, current chat) lives in `relaycore-core::world::WorldHandle`, kept
/// out of this crate because it owns no pure data — only collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldConfig {
    /// Kebab-case; stable for the world's lifetime.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_turn_limit")]
    pub turn_limit: u32,
    #[serde(default)]
    pub chat_llm_provider: Option<Provider>,
    #[serde(default)]
    pub chat_llm_model: Option<String>,
    #[serde(default)]
    pub mcp_config: Option<serde_json::Value>,
    /// `KEY=value` lines; used for trusted working-directory lookups
    /// (spec §4.1 `getEnvValueFromText`, §4.6 trusted cwd resolution).
    #[serde(default)]
    pub variables: String,
}

fn default_turn_limit() -> u32 {
    5
}

impl WorldConfig {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: crate::mentions::to_kebab_case(&name),
            name,
            description: None,
            turn_limit: default_turn_limit(),
            chat_llm_provider: None,
            chat_llm_model: None,
            mcp_config: None,
            variables: String::new(),
        }
    }

    pub fn working_directory(&self) -> Option<String> {
        crate::mentions::get_env_value_from_text(&self.variables, "working_directory")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldMessageEvent {
    pub content: String,
    pub sender: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub message_id: Uuid,
}

impl WorldMessageEvent {
    pub fn new(content: impl Into<String>, sender: Option<String>) -> Self {
        Self {
            content: content.into(),
            sender,
            timestamp: chrono::Utc::now(),
            message_id: Uuid::new_v4(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SseEventType {
    Start,
    Chunk,
    End,
    Error,
    ToolStream,
    ToolStart,
    ToolResult,
    ToolError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExecutionPayload {
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldSseEvent {
    pub agent_name: String,
    #[serde(rename = "type")]
    pub kind: SseEventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub message_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<crate::stream::Usage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_execution: Option<ToolExecutionPayload>,
}

/// Per-world activity state (spec §3 `ActivityState`, §4.9 C9).
#[derive(Debug, Default)]
pub struct ActivityState {
    pub pending_operations: u32,
    pub last_activity_id: u64,
    pub active_sources: HashMap<String, u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityChange {
    Start,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityLevel {
    Processing,
    Idle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldActivityEvent {
    pub world_id: String,
    pub change: ActivityChange,
    pub state: ActivityLevel,
    pub activity_id: u64,
    pub pending_operations: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn world_config_derives_kebab_id() {
        let w = WorldConfig::new("My Cool World");
        assert_eq!(w.id, "my-cool-world");
        assert_eq!(w.turn_limit, 5);
    }

    #[test]
    fn working_directory_reads_variables_block() {
        let mut w = WorldConfig::new("w");
        w.variables = "working_directory=/tmp/project\n".to_string();
        assert_eq!(w.working_directory().as_deref(), Some("/tmp/project"));
    }

    #[test]
    fn working_directory_absent_when_not_set() {
        let w = WorldConfig::new("w");
        assert_eq!(w.working_directory(), None);
    }
}
