//! Built-in tools (spec §4.7, component C7): `create_agent`, `load_skill`,
//! `human_intervention.request`.
//!
//! Each built-in is a plain async function taking already-validated
//! arguments — the same contract `wrap_tool_call` (C3) produces for
//! MCP/dynamic tools.

use std::collections::HashSet;

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;

use relaycore_domain::agent::{Agent, Provider};
use relaycore_skills::source::SkillSource;

use crate::error::{Error, Result};
use crate::hitl::{HitlAnnouncement, HitlRuntime};

const DEFAULT_PROVIDER: Provider = Provider::Openai;
const DEFAULT_MODEL: &str = "gpt-4";

/// Tracks agent ids currently mid-creation, to reject a duplicate
/// concurrent `create_agent` call for the same `(worldId, agentId)`
/// before the HITL round-trip resolves.
#[derive(Default)]
pub struct AgentCreationSlots {
    claimed: Mutex<HashSet<(String, String)>>,
}

impl AgentCreationSlots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&self, world_id: &str, agent_id: &str) -> Result<()> {
        let key = (world_id.to_string(), agent_id.to_string());
        let mut guard = self.claimed.lock();
        if !guard.insert(key) {
            return Err(Error::AgentCreationInFlight(world_id.to_string(), agent_id.to_string()));
        }
        Ok(())
    }

    pub fn release(&self, world_id: &str, agent_id: &str) {
        self.claimed.lock().remove(&(world_id.to_string(), agent_id.to_string()));
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAgentArgs {
    pub name: String,
    #[serde(default)]
    pub auto_reply: bool,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default = "default_next_agent")]
    pub next_agent: String,
}

fn default_next_agent() -> String {
    "human".to_string()
}

fn build_system_prompt(name: &str, role: Option<&str>, next_agent: &str) -> String {
    let role_clause = role.map(|r| format!(" {r}.")).unwrap_or_default();
    format!("You are agent {name}.{role_clause} Always respond in exactly this structure:\n@{next_agent}\n{{Your response}}")
}

/// The effective outcome a caller (the dispatch loop, C8) applies after
/// `create_agent`'s HITL round-trip resolves.
pub enum CreateAgentOutcome {
    Created(Agent),
    Denied,
    TimedOut,
}

/// `create_agent` (spec §4.7): claims a creation slot, requests HITL
/// yes/no approval, and on approval builds the deterministic agent
/// config. Slot release and the HITL round-trip itself are the caller's
/// responsibility — this only validates and constructs.
pub fn build_pending_agent(
    slots: &AgentCreationSlots,
    world_id: &str,
    world_provider: Option<Provider>,
    world_model: Option<&str>,
    args: &CreateAgentArgs,
) -> Result<Agent> {
    let agent_id = relaycore_domain::mentions::to_kebab_case(&args.name);
    slots.claim(world_id, &agent_id)?;

    let provider = world_provider.unwrap_or(DEFAULT_PROVIDER);
    let model = world_model.unwrap_or(DEFAULT_MODEL).to_string();
    let system_prompt = build_system_prompt(&args.name, args.role.as_deref(), &args.next_agent);

    let mut agent = Agent::new(&args.name, provider, model);
    agent.system_prompt = Some(system_prompt);
    agent.auto_reply = args.auto_reply;
    Ok(agent)
}

/// Builds the yes/no HITL request `create_agent` issues before the
/// agent is actually materialized.
pub fn create_agent_hitl_request(world_id: &str, request_id: &str, name: &str) -> relaycore_domain::hitl::HitlOptionRequest {
    relaycore_domain::hitl::HitlOptionRequest {
        world_id: world_id.to_string(),
        request_id: request_id.to_string(),
        title: "Create agent?".to_string(),
        message: format!("Approve creating agent '{name}'?"),
        options: vec![
            relaycore_domain::hitl::HitlOption { id: "yes".into(), label: "Yes".into(), description: None },
            relaycore_domain::hitl::HitlOption { id: "no".into(), label: "No".into(), description: None },
        ],
        default_option_id: Some("no".to_string()),
        timeout_ms: None,
        chat_id: None,
        metadata: serde_json::json!({}),
    }
}

/// Issues the approval request and returns the announcement to publish
/// alongside a receiver that resolves to the final outcome.
pub async fn request_create_agent_approval(
    runtime: &HitlRuntime,
    world_id: &str,
    request_id: &str,
    name: &str,
) -> Result<(HitlAnnouncement, tokio::sync::oneshot::Receiver<relaycore_domain::hitl::HitlOptionResolution>)> {
    runtime.request_option(create_agent_hitl_request(world_id, request_id, name))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadSkillArgs {
    pub skill_id: String,
}

/// `load_skill` (spec §4.7): awaits initial registry sync, reads
/// content, and wraps it in an XML tag. Errors become an `<error>`
/// block rather than a propagated `Result::Err`, since the LLM reads
/// the tool result as plain text either way.
pub async fn load_skill(source: &dyn SkillSource, args: &LoadSkillArgs) -> String {
    source.wait_for_initial_sync().await;

    if !source.exists(&args.skill_id) {
        return format!("<error>skill '{}' not found</error>", args.skill_id);
    }

    match source.read_content(&args.skill_id).await {
        Ok(content) => format!("<skill_context>{content}</skill_context>"),
        Err(err) => format!("<error>failed to load skill '{}': {err}</error>", args.skill_id),
    }
}

#[derive(Debug, Deserialize)]
pub struct HumanInterventionArgs {
    pub prompt: String,
    pub options: Vec<String>,
}

/// `human_intervention.request` (spec §4.7): synthesizes a
/// `client.humanIntervention` tool call and a `_stopProcessing` pause
/// signal for the dispatch loop, rather than executing anything itself.
pub fn human_intervention_request(args: &HumanInterventionArgs) -> Result<Value> {
    if args.options.is_empty() {
        return Err(Error::ToolNotFound("human_intervention.request requires at least one option".to_string()));
    }
    Ok(serde_json::json!({
        "_stopProcessing": true,
        "_approvalMessage": {
            "name": "client.humanIntervention",
            "arguments": {
                "prompt": args.prompt,
                "options": args.options,
            },
        },
    }))
}

pub const CREATE_AGENT_TOOL_NAME: &str = "create_agent";
pub const LOAD_SKILL_TOOL_NAME: &str = "load_skill";
pub const HUMAN_INTERVENTION_TOOL_NAME: &str = "human_intervention.request";

pub fn is_builtin_tool(name: &str) -> bool {
    matches!(name, CREATE_AGENT_TOOL_NAME | LOAD_SKILL_TOOL_NAME | HUMAN_INTERVENTION_TOOL_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaycore_skills::memory::InMemorySkillSource;
    use std::collections::HashMap;

    #[test]
    fn system_prompt_matches_deterministic_template() {
        let prompt = build_system_prompt("researcher", Some("a careful analyst"), "human");
        assert_eq!(
            prompt,
            "You are agent researcher. a careful analyst. Always respond in exactly this structure:\n@human\n{Your response}"
        );
    }

    #[test]
    fn system_prompt_without_role_skips_clause() {
        let prompt = build_system_prompt("researcher", None, "human");
        assert!(prompt.starts_with("You are agent researcher. Always respond"));
    }

    #[test]
    fn build_pending_agent_uses_world_defaults() {
        let slots = AgentCreationSlots::new();
        let args = CreateAgentArgs {
            name: "Researcher".to_string(),
            auto_reply: true,
            role: None,
            next_agent: "human".to_string(),
        };
        let agent = build_pending_agent(&slots, "w1", Some(Provider::Anthropic), Some("claude-x"), &args).unwrap();
        assert_eq!(agent.id, "researcher");
        assert_eq!(agent.provider, Provider::Anthropic);
        assert_eq!(agent.model, "claude-x");
        assert!(agent.auto_reply);
    }

    #[test]
    fn build_pending_agent_falls_back_to_openai_gpt4() {
        let slots = AgentCreationSlots::new();
        let args = CreateAgentArgs {
            name: "Researcher".to_string(),
            auto_reply: false,
            role: None,
            next_agent: "human".to_string(),
        };
        let agent = build_pending_agent(&slots, "w1", None, None, &args).unwrap();
        assert_eq!(agent.provider, Provider::Openai);
        assert_eq!(agent.model, "gpt-4");
    }

    #[test]
    fn duplicate_creation_slot_is_rejected() {
        let slots = AgentCreationSlots::new();
        let args = CreateAgentArgs {
            name: "Researcher".to_string(),
            auto_reply: false,
            role: None,
            next_agent: "human".to_string(),
        };
        build_pending_agent(&slots, "w1", None, None, &args).unwrap();
        let err = build_pending_agent(&slots, "w1", None, None, &args).unwrap_err();
        assert!(matches!(err, Error::AgentCreationInFlight(_, _)));

        slots.release("w1", "researcher");
        build_pending_agent(&slots, "w1", None, None, &args).unwrap();
    }

    #[tokio::test]
    async fn load_skill_wraps_found_content_in_skill_context() {
        let mut content = HashMap::new();
        content.insert("writer".to_string(), "Write concise prose.".to_string());
        let source = InMemorySkillSource::new(content);
        let result = load_skill(&source, &LoadSkillArgs { skill_id: "writer".to_string() }).await;
        assert_eq!(result, "<skill_context>Write concise prose.</skill_context>");
    }

    #[tokio::test]
    async fn load_skill_returns_error_block_when_missing() {
        let source = InMemorySkillSource::new(HashMap::new());
        let result = load_skill(&source, &LoadSkillArgs { skill_id: "ghost".to_string() }).await;
        assert!(result.starts_with("<error>"));
        assert!(result.contains("ghost"));
    }

    #[test]
    fn human_intervention_request_builds_stop_processing_payload() {
        let args = HumanInterventionArgs {
            prompt: "Pick a direction".to_string(),
            options: vec!["a".to_string(), "b".to_string()],
        };
        let value = human_intervention_request(&args).unwrap();
        assert_eq!(value["_stopProcessing"], true);
        assert_eq!(value["_approvalMessage"]["name"], "client.humanIntervention");
    }

    #[test]
    fn human_intervention_request_rejects_empty_options() {
        let args = HumanInterventionArgs {
            prompt: "Pick a direction".to_string(),
            options: vec![],
        };
        assert!(human_intervention_request(&args).is_err());
    }

    #[test]
    fn is_builtin_tool_recognizes_all_three() {
        assert!(is_builtin_tool("create_agent"));
        assert!(is_builtin_tool("load_skill"));
        assert!(is_builtin_tool("human_intervention.request"));
        assert!(!is_builtin_tool("read_file"));
    }
}
