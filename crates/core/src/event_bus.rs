//! World event bus & auto-mention post-processing (spec §4.10,
//! component C10).
//!
//! A world publishes on eight named channels (`message`, `sse`, `tool`,
//! `system`, `world-activity`, `processing`, `idle`, `world`), each a
//! plain `tokio::sync::broadcast` pair.

use serde_json::Value;
use tokio::sync::broadcast;

use relaycore_domain::agent::{determine_sender_type, SenderType};
use relaycore_domain::mentions::{extract_mentions, extract_paragraph_beginning_mentions};
use relaycore_domain::world::WorldMessageEvent;

const CHANNEL_CAPACITY: usize = 256;

/// A world's eight named broadcast channels. `subscribe_*` clones a
/// receiver; publishing to a channel with no subscribers is a no-op
/// (broadcast semantics) — emitting is always fire-and-forget.
pub struct WorldEventBus {
    pub message: broadcast::Sender<WorldMessageEvent>,
    pub sse: broadcast::Sender<Value>,
    pub tool: broadcast::Sender<Value>,
    pub system: broadcast::Sender<Value>,
    pub world_activity: broadcast::Sender<Value>,
    pub processing: broadcast::Sender<Value>,
    pub idle: broadcast::Sender<Value>,
    pub world: broadcast::Sender<Value>,
}

impl Default for WorldEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl WorldEventBus {
    pub fn new() -> Self {
        Self {
            message: broadcast::channel(CHANNEL_CAPACITY).0,
            sse: broadcast::channel(CHANNEL_CAPACITY).0,
            tool: broadcast::channel(CHANNEL_CAPACITY).0,
            system: broadcast::channel(CHANNEL_CAPACITY).0,
            world_activity: broadcast::channel(CHANNEL_CAPACITY).0,
            processing: broadcast::channel(CHANNEL_CAPACITY).0,
            idle: broadcast::channel(CHANNEL_CAPACITY).0,
            world: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }
}

/// `hasAnyMentionAtBeginning`: true iff a paragraph-beginning mention exists.
pub fn has_any_mention_at_beginning(response: &str) -> bool {
    !extract_paragraph_beginning_mentions(response).is_empty()
}

/// `getValidMentions`: paragraph-beginning mentions that aren't the
/// responding agent itself (case-insensitive).
pub fn get_valid_mentions(response: &str, agent_id: &str) -> std::collections::HashSet<String> {
    let agent_id_lower = agent_id.to_lowercase();
    extract_paragraph_beginning_mentions(response)
        .into_iter()
        .filter(|m| *m != agent_id_lower)
        .collect()
}

/// `removeSelfMentions`: strips leading consecutive `@agentId` tokens,
/// preserving any leading whitespace and the remainder's original case.
pub fn remove_self_mentions(response: &str, agent_id: &str) -> String {
    let agent_id_lower = agent_id.to_lowercase();
    let leading_ws_len = response.len() - response.trim_start().len();
    let (leading_ws, mut rest) = response.split_at(leading_ws_len);

    loop {
        let Some(tail) = rest.strip_prefix('@') else { break };
        let token_len = tail.chars().take_while(|c| c.is_alphanumeric() || *c == '-' || *c == '_').count();
        if token_len == 0 || tail[..token_len].to_lowercase() != agent_id_lower {
            break;
        }
        rest = tail[token_len..].trim_start_matches(' ');
    }

    format!("{leading_ws}{rest}")
}

/// `shouldAutoMention`: non-empty response, sender isn't the agent
/// itself, sender is an agent (not human/system), and no valid mentions
/// remain in the response.
pub fn should_auto_mention(response: &str, sender: Option<&str>, agent_id: &str) -> bool {
    if response.trim().is_empty() {
        return false;
    }
    if sender.map(|s| s.eq_ignore_ascii_case(agent_id)).unwrap_or(false) {
        return false;
    }
    if determine_sender_type(sender) != SenderType::Agent {
        return false;
    }
    get_valid_mentions(response, agent_id).is_empty()
}

/// `addAutoMention`: prepends `@sender ` unless the response already
/// carries a paragraph-beginning mention.
pub fn add_auto_mention(response: &str, sender: &str) -> String {
    if has_any_mention_at_beginning(response) {
        response.to_string()
    } else {
        format!("@{sender} {response}")
    }
}

/// The final auto-mention pass the dispatch loop (C8) runs over a
/// finished assistant response before persisting/publishing it.
pub fn apply_auto_mention(response: &str, sender: Option<&str>, agent_id: &str) -> String {
    if should_auto_mention(response, sender, agent_id) {
        add_auto_mention(response, sender.unwrap_or("agent"))
    } else {
        response.to_string()
    }
}

/// The four outcomes `shouldAgentRespond` (spec §4.10 step 3) can reach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespondDecision {
    Respond,
    Skip,
    TurnLimitReached,
}

/// `shouldAgentRespond`: decides whether an agent responds to an
/// incoming message, independent of `llmCallCount`/`turnLimit` (checked
/// by the caller beforehand via [`RespondDecision::TurnLimitReached`]).
pub fn should_agent_respond(content: &str, sender: Option<&str>, agent_id: &str, llm_call_count: u32, turn_limit: u32) -> RespondDecision {
    if sender.map(|s| s.eq_ignore_ascii_case(agent_id)).unwrap_or(false) {
        return RespondDecision::Skip;
    }
    if content.contains("Turn limit reached") {
        return RespondDecision::Skip;
    }
    if llm_call_count >= turn_limit {
        return RespondDecision::TurnLimitReached;
    }

    let sender_type = determine_sender_type(sender);
    if sender_type == SenderType::System {
        return RespondDecision::Skip;
    }
    if sender_type == SenderType::World {
        return RespondDecision::Respond;
    }

    let paragraph_mentions = extract_paragraph_beginning_mentions(content);
    let any_mentions = extract_mentions(content);

    if sender_type == SenderType::Human {
        if paragraph_mentions.is_empty() && any_mentions.is_empty() {
            return RespondDecision::Respond;
        }
        if paragraph_mentions.is_empty() {
            return RespondDecision::Skip;
        }
        return if paragraph_mentions.contains(agent_id) { RespondDecision::Respond } else { RespondDecision::Skip };
    }

    // sender_type == Agent
    if paragraph_mentions.contains(agent_id) { RespondDecision::Respond } else { RespondDecision::Skip }
}

/// The turn-limit notice published when `shouldAgentRespond` returns
/// [`RespondDecision::TurnLimitReached`].
pub fn turn_limit_notice(llm_call_count: u32) -> String {
    format!("@human Turn limit reached ({llm_call_count} LLM calls). Please take control of the conversation.")
}
