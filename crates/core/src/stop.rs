//! `stopMessageProcessing` RPC (spec §6, §8 property 8): cancels LLM
//! dispatch for a `(worldId, chatId)` scope and SIGTERMs its active
//! shell executions.
//!
//! Built on `relaycore_domain::cancel::CancelMap`'s group-cascade plus
//! `relaycore_tools::registry::ShellProcessRegistry::stop_for_chat_scope`.

use std::sync::Arc;

use serde::Serialize;

use relaycore_domain::cancel::CancelMap;
use relaycore_tools::registry::{CancelOutcome, ShellProcessRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StopReason {
    Stopped,
    #[serde(rename = "no-active-process")]
    NoActiveProcess,
}

#[derive(Debug, Clone, Serialize)]
pub struct LlmStopSummary {
    pub canceled_pending: u32,
    pub aborted_active: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShellStopSummary {
    pub killed: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessingStopSummary {
    pub aborted_active: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct StopMessageProcessingResult {
    pub success: bool,
    pub stopped: bool,
    pub reason: StopReason,
    pub stopped_operations: u32,
    pub llm: LlmStopSummary,
    pub shell: ShellStopSummary,
    pub processing: ProcessingStopSummary,
}

fn chat_scope_key(world_id: &str, chat_id: &str) -> String {
    format!("{world_id}:{chat_id}")
}

/// `stopMessageProcessing(worldId, chatId)`: cancels the chat's
/// registered LLM cancellation token (cascading to any group children —
/// follow-up turns, tool-triggered calls) and every active shell
/// execution scoped to the same chat.
pub fn stop_message_processing(cancel_map: &CancelMap, shell_registry: &Arc<ShellProcessRegistry>, world_id: &str, chat_id: &str) -> StopMessageProcessingResult {
    let key = chat_scope_key(world_id, chat_id);
    let llm_aborted = cancel_map.cancel(&key);

    let shell_outcomes = shell_registry.stop_for_chat_scope(world_id, chat_id);
    let shell_killed = shell_outcomes.iter().filter(|(_, outcome)| matches!(outcome, CancelOutcome::CancelRequested)).count() as u32;

    let stopped = llm_aborted || shell_killed > 0;
    let reason = if stopped { StopReason::Stopped } else { StopReason::NoActiveProcess };
    let llm_aborted_count = u32::from(llm_aborted);

    StopMessageProcessingResult {
        success: true,
        stopped,
        reason,
        stopped_operations: llm_aborted_count + shell_killed,
        llm: LlmStopSummary { canceled_pending: 0, aborted_active: llm_aborted_count },
        shell: ShellStopSummary { killed: shell_killed },
        processing: ProcessingStopSummary { aborted_active: llm_aborted_count },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_active_process_when_nothing_registered() {
        let cancel_map = CancelMap::new();
        let shell_registry = Arc::new(ShellProcessRegistry::new(100));
        let result = stop_message_processing(&cancel_map, &shell_registry, "w1", "c1");
        assert!(!result.stopped);
        assert_eq!(result.reason, StopReason::NoActiveProcess);
        assert_eq!(result.stopped_operations, 0);
    }

    #[test]
    fn cancels_registered_llm_token_for_the_chat_scope() {
        let cancel_map = CancelMap::new();
        let shell_registry = Arc::new(ShellProcessRegistry::new(100));
        let token = cancel_map.register("w1:c1");

        let result = stop_message_processing(&cancel_map, &shell_registry, "w1", "c1");

        assert!(result.stopped);
        assert_eq!(result.reason, StopReason::Stopped);
        assert_eq!(result.llm.aborted_active, 1);
        assert!(token.is_cancelled());
    }

    #[test]
    fn does_not_touch_a_different_chat_scope() {
        let cancel_map = CancelMap::new();
        let shell_registry = Arc::new(ShellProcessRegistry::new(100));
        let other = cancel_map.register("w1:other-chat");

        let result = stop_message_processing(&cancel_map, &shell_registry, "w1", "c1");

        assert!(!result.stopped);
        assert!(!other.is_cancelled());
    }
}
