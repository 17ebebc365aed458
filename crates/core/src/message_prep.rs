//! Message preparation (spec §4.2): turns an agent's raw memory into a
//! sequence safe to hand a chat-completion API.
//!
//! Generalizes a transcript-to-`Message` conversion with client-only
//! filtering into a two-pass tool-call prune: drop calls, drop their
//! now-orphaned results, then drop assistant turns left empty.

use std::collections::HashSet;

use relaycore_domain::tool::{AgentMessage, EnhancedToolResult, Role, parse_enhanced_tool_result};

pub const CLIENT_TOOL_PREFIX: &str = "client.";

/// Prepares a sequence of messages for an LLM call: drops client-only
/// messages, strips client-prefixed tool calls, and prunes any tool
/// call left unanswered (or any tool message answering a call that no
/// longer exists).
pub fn prepare_messages_for_llm(memory: &[AgentMessage]) -> Vec<AgentMessage> {
    let mut messages: Vec<AgentMessage> = memory.to_vec();
    messages.retain(|m| !m.client_only);

    let mut removed_call_ids: HashSet<String> = HashSet::new();
    for message in &mut messages {
        if message.role != Role::Assistant {
            continue;
        }
        if let Some(calls) = &mut message.tool_calls {
            let mut kept = Vec::with_capacity(calls.len());
            for call in calls.drain(..) {
                if call.function.name.starts_with(CLIENT_TOOL_PREFIX) {
                    removed_call_ids.insert(call.id.clone());
                } else {
                    kept.push(call);
                }
            }
            *calls = kept;
        }
    }

    let assistant_call_ids: HashSet<String> = messages
        .iter()
        .filter(|m| m.role == Role::Assistant)
        .flat_map(|m| m.tool_calls.iter().flatten())
        .map(|c| c.id.clone())
        .collect();

    messages.retain(|m| {
        if m.role != Role::Tool {
            return true;
        }
        match &m.tool_call_id {
            None => false,
            Some(id) => !removed_call_ids.contains(id) && assistant_call_ids.contains(id),
        }
    });

    let answered_call_ids: HashSet<String> = messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .filter_map(|m| m.tool_call_id.clone())
        .collect();

    messages.retain_mut(|m| {
        if m.role != Role::Assistant {
            return true;
        }
        if let Some(calls) = &mut m.tool_calls {
            calls.retain(|c| answered_call_ids.contains(&c.id));
            if calls.is_empty() {
                m.tool_calls = None;
            }
        }
        !(m.content.is_empty() && m.tool_calls.is_none())
    });

    messages
}

/// Parses the enhanced `{"__type":"tool_result",...}` wire shape out of
/// a plain-text message's content, if present (spec §4.2). Returns the
/// reshaped tool message plus the addressed `agentId`, if any.
pub fn parse_enhanced_content(content: &str) -> Option<(AgentMessage, Option<String>)> {
    let EnhancedToolResult { tool_call_id, content, agent_id } = parse_enhanced_tool_result(content)?;
    Some((AgentMessage::tool_result(tool_call_id, content), agent_id))
}
