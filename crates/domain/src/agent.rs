//! Agent data model (spec §3 `Agent`).

use serde::{Deserialize, Serialize};

use crate::tool::AgentMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provider {
    Openai,
    Anthropic,
    Google,
    Azure,
    Xai,
    OpenaiCompatible,
    Ollama,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    /// Kebab-case of `name`; uniquely addresses the agent within its world.
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub provider: Provider,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub auto_reply: bool,
    /// Monotonically increments across agent-triggered LLM calls until
    /// reset by a human/world sender (spec §3 invariant).
    #[serde(default)]
    pub llm_call_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_llm_call: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub memory: Vec<AgentMessage>,
}

impl Agent {
    pub fn new(name: impl Into<String>, provider: Provider, model: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: crate::mentions::to_kebab_case(&name),
            name,
            kind: "agent".to_string(),
            provider,
            model: model.into(),
            system_prompt: None,
            temperature: None,
            max_tokens: None,
            auto_reply: false,
            llm_call_count: 0,
            last_llm_call: None,
            memory: Vec::new(),
        }
    }

    /// Reset the call counter — fired whenever a human or world message
    /// reaches the agent (spec §4.10 step 2).
    pub fn reset_llm_call_count(&mut self) {
        self.llm_call_count = 0;
    }

    pub fn record_llm_call(&mut self) {
        self.llm_call_count += 1;
        self.last_llm_call = Some(chrono::Utc::now());
    }

    pub fn has_reached_turn_limit(&self, turn_limit: u32) -> bool {
        self.llm_call_count >= turn_limit
    }
}

/// Classification of a message's originator (spec §4.1 `determineSenderType`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderType {
    System,
    World,
    Human,
    Agent,
}

const HUMAN_ALIASES: [&str; 3] = ["human", "user", "HUMAN"];

pub fn determine_sender_type(sender: Option<&str>) -> SenderType {
    match sender {
        None => SenderType::Human,
        Some(s) if s == "system" => SenderType::System,
        Some(s) if s == "world" => SenderType::World,
        Some(s) if HUMAN_ALIASES.contains(&s) => SenderType::Human,
        Some(_) => SenderType::Agent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sender_type_classification() {
        assert_eq!(determine_sender_type(None), SenderType::Human);
        assert_eq!(determine_sender_type(Some("system")), SenderType::System);
        assert_eq!(determine_sender_type(Some("world")), SenderType::World);
        assert_eq!(determine_sender_type(Some("human")), SenderType::Human);
        assert_eq!(determine_sender_type(Some("HUMAN")), SenderType::Human);
        assert_eq!(determine_sender_type(Some("user")), SenderType::Human);
        assert_eq!(determine_sender_type(Some("alice")), SenderType::Agent);
    }

    #[test]
    fn new_agent_derives_kebab_id() {
        let agent = Agent::new("Research Bot", Provider::Openai, "gpt-4");
        assert_eq!(agent.id, "research-bot");
    }

    #[test]
    fn turn_limit_boundary() {
        let mut agent = Agent::new("a", Provider::Openai, "gpt-4");
        assert!(!agent.has_reached_turn_limit(5));
        agent.llm_call_count = 5;
        assert!(agent.has_reached_turn_limit(5));
    }

    #[test]
    fn reset_llm_call_count() {
        let mut agent = Agent::new("a", Provider::Openai, "gpt-4");
        agent.llm_call_count = 3;
        agent.reset_llm_call_count();
        assert_eq!(agent.llm_call_count, 0);
    }
}
