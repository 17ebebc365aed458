//! Production [`ToolCatalog`](crate::dispatch::ToolCatalog) wiring (spec
//! §6): unifies MCP tools, the three built-ins (C7), and the shell
//! command tool (C6) behind the one contract the dispatch loop (C8)
//! consumes.
//!
//! Fans a single `execute(name, args)` call out to either an MCP
//! client or a statically-known built-in by name.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use relaycore_domain::agent::Provider;
use relaycore_domain::tool::ToolDefinition;
use relaycore_mcp_client::{McpManager, McpToolDef};
use relaycore_skills::source::SkillSource;
use relaycore_tools::guard::TrustContext;
use relaycore_tools::registry::{ShellProcessRegistry, ShellStatus};
use relaycore_tools::shell_tool::{ShellCommandTool, ShellStreamSink, ShellToolRequest, StreamKind};

use crate::builtin_tools::{
    human_intervention_request, load_skill, request_create_agent_approval, AgentCreationSlots, CreateAgentArgs, HumanInterventionArgs, LoadSkillArgs,
    CREATE_AGENT_TOOL_NAME, HUMAN_INTERVENTION_TOOL_NAME, LOAD_SKILL_TOOL_NAME,
};
use crate::dispatch::{ToolCatalog, ToolExecutionContext, ToolOutcome};
use crate::event_bus::WorldEventBus;
use crate::hitl::HitlRuntime;
use crate::manager::{CreateAgentOptions, Manager};
use crate::tool_validation::ApprovalPolicy;

pub const SHELL_TOOL_NAME: &str = "execute_shell_command";

fn permissive_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

fn create_agent_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "name": {"type": "string"},
            "autoReply": {"type": "boolean"},
            "role": {"type": "string"},
            "nextAgent": {"type": "string"},
        },
        "required": ["name"],
    })
}

fn load_skill_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {"skillId": {"type": "string"}},
        "required": ["skillId"],
    })
}

fn human_intervention_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "prompt": {"type": "string"},
            "options": {"type": "array", "items": {"type": "string"}},
        },
        "required": ["prompt", "options"],
    })
}

fn shell_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "command": {"type": "string"},
            "parameters": {"type": "array", "items": {"type": "string"}},
            "directory": {"type": "string"},
            "timeoutMs": {"type": "integer"},
        },
        "required": ["command"],
    })
}

/// Streams shell stdout/stderr onto the world's `tool` bus channel while
/// also buffering each execution's combined output, since
/// [`ShellCommandTool::execute`] itself returns only a lifecycle record
/// (spec §4.5), not the text a tool-result message needs.
struct BusCapturingSink {
    bus: Arc<WorldEventBus>,
    buffers: Mutex<HashMap<String, String>>,
}

impl ShellStreamSink for BusCapturingSink {
    fn on_chunk(&self, execution_id: &str, stream: StreamKind, chunk: &str) {
        self.buffers.lock().entry(execution_id.to_string()).or_default().push_str(chunk);
        self.buffers.lock().entry(execution_id.to_string()).or_default().push('\n');
        let _ = self.bus.tool.send(serde_json::json!({
            "executionId": execution_id,
            "stream": if stream == StreamKind::Stdout { "stdout" } else { "stderr" },
            "chunk": chunk,
        }));
    }
}

impl BusCapturingSink {
    fn take(&self, execution_id: &str) -> String {
        self.buffers.lock().remove(execution_id).unwrap_or_default()
    }
}

/// A world's live tool surface: built-ins plus whatever MCP servers and
/// the shell are wired in at construction. One instance per world.
pub struct RuntimeToolCatalog {
    world_id: String,
    manager: Arc<Manager>,
    creation_slots: Arc<AgentCreationSlots>,
    hitl: Arc<HitlRuntime>,
    bus: Arc<WorldEventBus>,
    skills: Arc<dyn SkillSource>,
    mcp: Arc<McpManager>,
    mcp_defs: RwLock<Vec<(String, McpToolDef)>>,
    shell: Arc<ShellCommandTool>,
    shell_sink: Arc<BusCapturingSink>,
    trust: TrustContext,
    default_provider: Option<Provider>,
    default_model: Option<String>,
}

impl RuntimeToolCatalog {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        world_id: String,
        manager: Arc<Manager>,
        creation_slots: Arc<AgentCreationSlots>,
        hitl: Arc<HitlRuntime>,
        bus: Arc<WorldEventBus>,
        skills: Arc<dyn SkillSource>,
        mcp: Arc<McpManager>,
        shell_registry: Arc<ShellProcessRegistry>,
        shell_timeout_ms: u64,
        trust: TrustContext,
        default_provider: Option<Provider>,
        default_model: Option<String>,
    ) -> Self {
        let shell_sink = Arc::new(BusCapturingSink { bus: bus.clone(), buffers: Mutex::new(HashMap::new()) });
        let shell = Arc::new(ShellCommandTool::new(shell_registry, shell_sink.clone(), shell_timeout_ms));
        Self {
            world_id,
            manager,
            creation_slots,
            hitl,
            bus,
            skills,
            mcp,
            mcp_defs: RwLock::new(Vec::new()),
            shell,
            shell_sink,
            trust,
            default_provider,
            default_model,
        }
    }

    /// Re-polls every connected MCP server's `tools/list` and replaces
    /// the cached definitions `definitions()`/`schema_for` read from.
    /// `definitions()` itself can't be async, so this has to run
    /// separately — at world start and whenever the client asks to
    /// refresh the tool surface.
    pub async fn refresh_mcp_tools(&self) {
        let tools = self.mcp.list_all_tools().await;
        *self.mcp_defs.write() = tools;
    }

    async fn execute_create_agent(&self, args: Value, ctx: &ToolExecutionContext) -> ToolOutcome {
        let args: CreateAgentArgs = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(err) => return ToolOutcome::error(format!("invalid create_agent arguments: {err}")),
        };

        let pending = match crate::builtin_tools::build_pending_agent(&self.creation_slots, &self.world_id, self.default_provider, self.default_model.as_deref(), &args) {
            Ok(agent) => agent,
            Err(err) => return ToolOutcome::error(err.to_string()),
        };

        let request_id = ctx.tool_call_id.clone();
        let (announcement, rx) = match request_create_agent_approval(&self.hitl, &self.world_id, &request_id, &args.name).await {
            Ok(pair) => pair,
            Err(err) => {
                self.creation_slots.release(&self.world_id, &pending.id);
                return ToolOutcome::error(err.to_string());
            }
        };

        let timeout = Duration::from_millis(announcement.timeout_ms);
        let _ = self.bus.system.send(serde_json::to_value(&announcement).unwrap_or(Value::Null));

        let approved = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(resolution)) => resolution.option_id == "yes",
            Ok(Err(_)) => false,
            Err(_) => {
                tracing::info!(world_id = %self.world_id, request_id = %request_id, "create_agent approval timed out");
                self.hitl.resolve_timeout(&self.world_id, &request_id);
                false
            }
        };

        if !approved {
            tracing::debug!(world_id = %self.world_id, agent_name = %pending.name, "create_agent declined");
            self.creation_slots.release(&self.world_id, &pending.id);
            return ToolOutcome::ok(format!("agent '{}' creation was declined", pending.name));
        }

        match self
            .manager
            .create_agent(&self.world_id, pending.clone(), false, CreateAgentOptions { allow_while_processing: true, slot_already_claimed: true })
            .await
        {
            Ok(agent) => ToolOutcome::ok(format!("agent '{}' created", agent.id)),
            Err(err) => ToolOutcome::error(err.to_string()),
        }
    }

    async fn execute_load_skill(&self, args: Value) -> ToolOutcome {
        let args: LoadSkillArgs = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(err) => return ToolOutcome::error(format!("invalid load_skill arguments: {err}")),
        };
        ToolOutcome::ok(load_skill(self.skills.as_ref(), &args).await)
    }

    fn execute_human_intervention(&self, args: Value) -> ToolOutcome {
        let args: HumanInterventionArgs = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(err) => return ToolOutcome::error(format!("invalid human_intervention.request arguments: {err}")),
        };
        match human_intervention_request(&args) {
            Ok(payload) => ToolOutcome::stop("awaiting human intervention", payload["_approvalMessage"].clone()),
            Err(err) => ToolOutcome::error(err.to_string()),
        }
    }

    async fn execute_shell(&self, args: Value, ctx: &ToolExecutionContext) -> ToolOutcome {
        let command = args.get("command").and_then(Value::as_str).unwrap_or_default().to_string();
        if command.is_empty() {
            return ToolOutcome::error("execute_shell_command requires a non-empty command");
        }
        let parameters = args
            .get("parameters")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        let directory = args.get("directory").and_then(Value::as_str).map(str::to_string);
        let timeout_ms = args.get("timeoutMs").and_then(Value::as_u64);

        let request = ShellToolRequest {
            command,
            parameters,
            directory,
            world_id: Some(ctx.world_id.clone()),
            chat_id: Some(ctx.chat_id.clone()),
            timeout_ms,
        };

        match self.shell.execute(request, &self.trust).await {
            Ok(record) => {
                let output = self.shell_sink.take(&record.execution_id);
                match record.status {
                    ShellStatus::Completed if record.exit_code.unwrap_or(0) == 0 => {
                        ToolOutcome::ok(if output.is_empty() { "(no output)".to_string() } else { output })
                    }
                    ShellStatus::Completed => ToolOutcome::error(format!("exited with code {:?}\n{output}", record.exit_code)),
                    _ => ToolOutcome::error(record.error.clone().unwrap_or_else(|| format!("shell command ended with status {:?}", record.status))),
                }
            }
            Err(err) => ToolOutcome::error(err.to_string()),
        }
    }

    async fn execute_mcp(&self, name: &str, args: Value) -> ToolOutcome {
        match self.mcp.call_tool(name, args).await {
            Ok(result) => {
                if result.is_error {
                    ToolOutcome::error(result.as_text())
                } else {
                    ToolOutcome::ok(result.as_text())
                }
            }
            Err(err) => ToolOutcome::error(err.to_string()),
        }
    }
}

#[async_trait]
impl ToolCatalog for RuntimeToolCatalog {
    fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs = vec![
            ToolDefinition { name: CREATE_AGENT_TOOL_NAME.to_string(), description: "Create a new agent in this world, subject to approval.".to_string(), parameters: create_agent_schema() },
            ToolDefinition { name: LOAD_SKILL_TOOL_NAME.to_string(), description: "Load a skill's content into context.".to_string(), parameters: load_skill_schema() },
            ToolDefinition {
                name: HUMAN_INTERVENTION_TOOL_NAME.to_string(),
                description: "Pause and ask a human to choose among a set of options.".to_string(),
                parameters: human_intervention_schema(),
            },
            ToolDefinition { name: SHELL_TOOL_NAME.to_string(), description: "Run a shell command inside the world's trusted working directory.".to_string(), parameters: shell_schema() },
        ];
        defs.extend(self.mcp_defs.read().iter().map(|(server_id, tool)| ToolDefinition {
            name: relaycore_mcp_client::protocol::namespaced(server_id, &tool.name),
            description: tool.description.clone(),
            parameters: tool.input_schema.clone(),
        }));
        defs
    }

    fn schema_for(&self, name: &str) -> Value {
        match name {
            CREATE_AGENT_TOOL_NAME => create_agent_schema(),
            LOAD_SKILL_TOOL_NAME => load_skill_schema(),
            HUMAN_INTERVENTION_TOOL_NAME => human_intervention_schema(),
            SHELL_TOOL_NAME => shell_schema(),
            other => self
                .mcp_defs
                .read()
                .iter()
                .find(|(server_id, tool)| relaycore_mcp_client::protocol::namespaced(server_id, &tool.name) == other)
                .map(|(_, tool)| tool.input_schema.clone())
                .unwrap_or_else(permissive_schema),
        }
    }

    fn approval_policy_for(&self, name: &str) -> ApprovalPolicy {
        match name {
            SHELL_TOOL_NAME => ApprovalPolicy { required: true },
            _ => ApprovalPolicy::default(),
        }
    }

    async fn execute(&self, name: &str, args: Value, ctx: &ToolExecutionContext) -> ToolOutcome {
        match name {
            CREATE_AGENT_TOOL_NAME => self.execute_create_agent(args, ctx).await,
            LOAD_SKILL_TOOL_NAME => self.execute_load_skill(args).await,
            HUMAN_INTERVENTION_TOOL_NAME => self.execute_human_intervention(args),
            SHELL_TOOL_NAME => self.execute_shell(args, ctx).await,
            other if other.contains(':') => self.execute_mcp(other, args).await,
            other => ToolOutcome::error(format!("unknown tool: {other}")),
        }
    }
}
