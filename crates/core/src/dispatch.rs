//! LLM dispatch loop (spec §4.8, component C8): the core per-turn
//! orchestrator. Streams a provider response, detects and executes tool
//! calls, and recurses without re-attaching tools until a plain-text
//! answer is produced or the loop safety valve trips.
//!
//! Follows a stream-accumulate-dispatch-recurse shape: cancellation is
//! checked both before and during the stream, and a `MAX_TOOL_LOOPS`
//! safety valve guards against runaway recursion.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;
use tracing::Instrument;

use relaycore_domain::agent::Agent;
use relaycore_domain::cancel::CancelToken;
use relaycore_domain::stream::{StreamEvent, Usage};
use relaycore_domain::tool::{AgentMessage, ToolCall, ToolDefinition};
use relaycore_domain::world::{SseEventType, ToolExecutionPayload, WorldSseEvent};
use relaycore_providers::{ChatRequest, LlmProvider};

use crate::error::{Error, Result};
use crate::event_bus::WorldEventBus;
use crate::message_prep::prepare_messages_for_llm;
use crate::tool_validation::{filter_empty_named_calls, wrap_tool_call, ApprovalPolicy, WrappedOutcome};

/// Safety valve against runaway tool-call recursion within a single
/// turn; the follow-up call never carries tools, so in practice this
/// almost never triggers.
const MAX_TOOL_LOOPS: usize = 25;

pub struct ToolExecutionContext {
    pub world_id: String,
    pub chat_id: String,
    pub agent_id: String,
    pub tool_call_id: String,
    pub working_directory: Option<String>,
}

/// The outcome of executing one tool call (spec §4.8 step 6-7).
pub struct ToolOutcome {
    pub content: String,
    pub is_error: bool,
    /// Set by `client.*` synthetic tools (approval gates, human
    /// intervention) to pause the loop instead of recursing.
    pub stop_processing: bool,
    pub approval_message: Option<Value>,
}

impl ToolOutcome {
    pub fn ok(content: impl Into<String>) -> Self {
        Self { content: content.into(), is_error: false, stop_processing: false, approval_message: None }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self { content: content.into(), is_error: true, stop_processing: false, approval_message: None }
    }

    pub fn stop(content: impl Into<String>, approval_message: Value) -> Self {
        Self { content: content.into(), is_error: false, stop_processing: true, approval_message: Some(approval_message) }
    }
}

/// Everything the dispatch loop needs to know about the tool surface:
/// definitions to advertise, the schema/policy used to validate and gate
/// a call, and how to actually run one. MCP tools, built-in tools, and
/// the shell tool are all unified behind this one contract.
#[async_trait]
pub trait ToolCatalog: Send + Sync {
    fn definitions(&self) -> Vec<ToolDefinition>;
    fn schema_for(&self, name: &str) -> Value;
    fn approval_policy_for(&self, name: &str) -> ApprovalPolicy;
    async fn execute(&self, name: &str, args: Value, ctx: &ToolExecutionContext) -> ToolOutcome;
}

pub struct DispatchInput<'a> {
    pub world_id: String,
    pub chat_id: String,
    pub agent: &'a mut Agent,
    pub memory: &'a [AgentMessage],
    pub working_directory: Option<String>,
    /// Sender of the message that triggered this turn — used for
    /// auto-mention (§4.10), never the responding agent's own id.
    pub incoming_sender: Option<String>,
    /// False for the `ollama` provider unless its tool-support flag is
    /// enabled (spec §4.8 step 2), and always false on a recursive
    /// follow-up call.
    pub attach_tools: bool,
}

pub enum DispatchOutcome {
    /// Plain text was produced; auto-mention has already been applied.
    Completed { text: String, usage: Usage, messages_to_append: Vec<AgentMessage> },
    /// A tool paused the loop (HITL/approval gate).
    Stopped { messages_to_append: Vec<AgentMessage>, approval_message: Value },
    Canceled { partial: String },
}

pub struct DispatchLoop {
    provider: Arc<dyn LlmProvider>,
    catalog: Arc<dyn ToolCatalog>,
    bus: Arc<WorldEventBus>,
}

impl DispatchLoop {
    pub fn new(provider: Arc<dyn LlmProvider>, catalog: Arc<dyn ToolCatalog>, bus: Arc<WorldEventBus>) -> Self {
        Self { provider, catalog, bus }
    }

    fn publish_sse(&self, agent_name: &str, kind: SseEventType, content: Option<String>, tool_execution: Option<ToolExecutionPayload>) {
        let event = WorldSseEvent {
            agent_name: agent_name.to_string(),
            kind,
            content,
            error: None,
            message_id: uuid::Uuid::new_v4(),
            usage: None,
            tool_execution,
        };
        let _ = self.bus.sse.send(serde_json::to_value(event).unwrap_or(Value::Null));
    }

    pub async fn run_turn(&self, input: DispatchInput<'_>, cancel: &CancelToken) -> Result<DispatchOutcome> {
        let turn_span = tracing::info_span!(
            "turn",
            world_id = %input.world_id,
            chat_id = %input.chat_id,
            agent_id = %input.agent.id,
        );
        self.run_turn_inner(input, cancel).instrument(turn_span).await
    }

    async fn run_turn_inner(&self, input: DispatchInput<'_>, cancel: &CancelToken) -> Result<DispatchOutcome> {
        tracing::debug!("turn started");

        let mut working_messages: Vec<AgentMessage> = input.memory.to_vec();
        let mut attach_tools = input.attach_tools;
        let mut appended: Vec<AgentMessage> = Vec::new();
        let mut total_usage = Usage::default();

        for loop_idx in 0..MAX_TOOL_LOOPS {
            tracing::debug!(loop_idx, "tool loop iteration");
            if cancel.is_cancelled() {
                tracing::debug!("turn canceled");
                return Ok(DispatchOutcome::Canceled { partial: String::new() });
            }

            let prepared = prepare_messages_for_llm(&working_messages);
            let tools = if attach_tools { self.catalog.definitions() } else { Vec::new() };

            input.agent.record_llm_call();

            let request = ChatRequest {
                messages: prepared,
                tools,
                temperature: input.agent.temperature,
                max_tokens: input.agent.max_tokens,
                model: Some(input.agent.model.clone()),
            };

            let (text_buf, tool_calls, usage, was_canceled) = self.stream_one_call(request, cancel).await?;
            if was_canceled {
                return Ok(DispatchOutcome::Canceled { partial: text_buf });
            }
            total_usage.add(&usage.unwrap_or_default());

            if tool_calls.is_empty() {
                let final_text = crate::event_bus::apply_auto_mention(&text_buf, input.incoming_sender.as_deref(), &input.agent.id);
                return Ok(DispatchOutcome::Completed { text: final_text, usage: total_usage, messages_to_append: appended });
            }

            let (valid_calls, invalid_calls) = filter_empty_named_calls(tool_calls);
            let assistant_message = AgentMessage::assistant(text_buf).with_tool_calls(valid_calls.iter().chain(invalid_calls.iter().map(|(c, _)| c)).cloned().collect());
            working_messages.push(assistant_message.clone());
            appended.push(assistant_message);

            for (call, message) in &invalid_calls {
                let tool_message = AgentMessage::tool_result(call.id.clone(), message.clone());
                working_messages.push(tool_message.clone());
                appended.push(tool_message);
            }

            let mut stopped: Option<Value> = None;
            for call in &valid_calls {
                let ctx = ToolExecutionContext {
                    world_id: input.world_id.clone(),
                    chat_id: input.chat_id.clone(),
                    agent_id: input.agent.id.clone(),
                    tool_call_id: call.id.clone(),
                    working_directory: input.working_directory.clone(),
                };

                self.publish_sse(
                    &input.agent.id,
                    SseEventType::ToolStart,
                    None,
                    Some(ToolExecutionPayload {
                        tool_call_id: call.id.clone(),
                        tool_name: call.function.name.clone(),
                        arguments: Some(call.parsed_arguments()),
                        duration_ms: None,
                        preview: None,
                        stream: None,
                    }),
                );

                let schema = self.catalog.schema_for(&call.function.name);
                let policy = self.catalog.approval_policy_for(&call.function.name);
                let start = std::time::Instant::now();
                let tool_span = tracing::info_span!("tool.call", tool_name = %call.function.name, call_id = %call.id);

                let outcome = match wrap_tool_call(call, &schema, &policy) {
                    WrappedOutcome::ValidationFailed { error } => {
                        tracing::warn!(tool = %call.function.name, %error, "tool call failed validation");
                        ToolOutcome::error(error)
                    }
                    WrappedOutcome::RequiresApproval { args, .. } => ToolOutcome::stop(
                        "awaiting approval",
                        serde_json::json!({
                            "name": crate::tool_validation::APPROVAL_REDIRECT_NAME,
                            "arguments": args,
                            "toolCallId": call.id,
                        }),
                    ),
                    WrappedOutcome::Execute { args } => self.catalog.execute(&call.function.name, args, &ctx).instrument(tool_span).await,
                };

                let duration_ms = start.elapsed().as_millis() as u64;
                if outcome.is_error {
                    tracing::warn!(tool = %call.function.name, duration_ms, "tool call returned an error");
                } else {
                    tracing::debug!(tool = %call.function.name, duration_ms, "tool call completed");
                }
                self.publish_sse(
                    &input.agent.id,
                    if outcome.is_error { SseEventType::ToolError } else { SseEventType::ToolResult },
                    Some(outcome.content.clone()),
                    Some(ToolExecutionPayload {
                        tool_call_id: call.id.clone(),
                        tool_name: call.function.name.clone(),
                        arguments: None,
                        duration_ms: Some(duration_ms),
                        preview: Some(outcome.content.chars().take(200).collect()),
                        stream: None,
                    }),
                );

                if outcome.stop_processing {
                    stopped = outcome.approval_message;
                    break;
                }

                let tool_message = AgentMessage::tool_result(call.id.clone(), outcome.content);
                working_messages.push(tool_message.clone());
                appended.push(tool_message);
            }

            if let Some(approval_message) = stopped {
                return Ok(DispatchOutcome::Stopped { messages_to_append: appended, approval_message });
            }

            attach_tools = false;
        }

        tracing::warn!(max_loops = MAX_TOOL_LOOPS, "tool loop exceeded the maximum number of iterations");
        Err(Error::Provider("tool loop exceeded the maximum number of iterations".to_string()))
    }

    async fn stream_one_call(&self, request: ChatRequest, cancel: &CancelToken) -> Result<(String, Vec<ToolCall>, Option<Usage>, bool)> {
        let model = request.model.clone().unwrap_or_else(|| "default".to_string());
        let llm_call_span = tracing::info_span!("llm.call", model = %model);
        self.stream_one_call_inner(request, cancel).instrument(llm_call_span).await
    }

    async fn stream_one_call_inner(&self, request: ChatRequest, cancel: &CancelToken) -> Result<(String, Vec<ToolCall>, Option<Usage>, bool)> {
        if !self.provider.supports_streaming() {
            let response = self.provider.generate(request).await.map_err(|e| {
                tracing::warn!(error = %e, "llm generate call failed");
                Error::Provider(e.to_string())
            })?;
            return Ok((response.content, response.tool_calls, response.usage, false));
        }

        let mut stream = self.provider.stream(request).await.map_err(|e| {
            tracing::warn!(error = %e, "llm stream call failed to start");
            Error::Provider(e.to_string())
        })?;
        let mut text_buf = String::new();
        let mut usage = None;
        let mut started: Vec<Option<(String, String)>> = Vec::new();
        let mut args_by_index: std::collections::HashMap<u32, String> = std::collections::HashMap::new();
        let mut finished_indexes: Vec<u32> = Vec::new();

        while let Some(event) = stream.next().await {
            if cancel.is_cancelled() {
                return Ok((text_buf, Vec::new(), usage, true));
            }
            match event.map_err(|e| Error::Provider(e.to_string()))? {
                StreamEvent::Token { text } => {
                    self.publish_sse("", SseEventType::Chunk, Some(text.clone()), None);
                    text_buf.push_str(&text);
                }
                StreamEvent::ToolCallStarted { index, call_id, tool_name } => {
                    let idx = index as usize;
                    if started.len() <= idx {
                        started.resize(idx + 1, None);
                    }
                    started[idx] = Some((call_id, tool_name));
                    args_by_index.entry(index).or_default();
                }
                StreamEvent::ToolCallDelta { index, arguments_delta } => {
                    args_by_index.entry(index).or_default().push_str(&arguments_delta);
                }
                StreamEvent::ToolCallFinished { index } => {
                    finished_indexes.push(index);
                }
                StreamEvent::Done { usage: done_usage, .. } => {
                    usage = done_usage;
                }
                StreamEvent::Error { message } => {
                    tracing::warn!(error = %message, "llm stream emitted an error event");
                    return Err(Error::Provider(message));
                }
            }
        }

        let mut tool_calls = Vec::new();
        for (idx, slot) in started.into_iter().enumerate() {
            let Some((call_id, tool_name)) = slot else { continue };
            let arguments = args_by_index.remove(&(idx as u32)).unwrap_or_default();
            tool_calls.push(ToolCall::new(call_id, tool_name, arguments));
        }

        Ok((text_buf, tool_calls, usage, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaycore_domain::agent::Provider;
    use relaycore_providers::testutil::ScriptedProvider;
    use relaycore_providers::ChatResponse;

    struct NoopCatalog;

    #[async_trait]
    impl ToolCatalog for NoopCatalog {
        fn definitions(&self) -> Vec<ToolDefinition> {
            vec![]
        }
        fn schema_for(&self, _name: &str) -> Value {
            serde_json::json!({})
        }
        fn approval_policy_for(&self, _name: &str) -> ApprovalPolicy {
            ApprovalPolicy::default()
        }
        async fn execute(&self, _name: &str, _args: Value, _ctx: &ToolExecutionContext) -> ToolOutcome {
            ToolOutcome::ok("unused")
        }
    }

    struct EchoCatalog;

    #[async_trait]
    impl ToolCatalog for EchoCatalog {
        fn definitions(&self) -> Vec<ToolDefinition> {
            vec![ToolDefinition {
                name: "echo".to_string(),
                description: "echoes".to_string(),
                parameters: serde_json::json!({"type": "object", "properties": {"text": {"type": "string"}}, "required": ["text"]}),
            }]
        }
        fn schema_for(&self, _name: &str) -> Value {
            serde_json::json!({"type": "object", "properties": {"text": {"type": "string"}}, "required": ["text"]})
        }
        fn approval_policy_for(&self, _name: &str) -> ApprovalPolicy {
            ApprovalPolicy::default()
        }
        async fn execute(&self, _name: &str, args: Value, _ctx: &ToolExecutionContext) -> ToolOutcome {
            ToolOutcome::ok(args["text"].as_str().unwrap_or_default().to_string())
        }
    }

    fn agent() -> Agent {
        Agent::new("writer", Provider::Openai, "gpt-4")
    }

    #[tokio::test]
    async fn completes_immediately_when_no_tool_calls() {
        let provider = Arc::new(ScriptedProvider::new(vec![ChatResponse {
            content: "hello there".to_string(),
            tool_calls: vec![],
            usage: None,
            finish_reason: Some("stop".into()),
        }]));
        let catalog = Arc::new(NoopCatalog);
        let bus = Arc::new(WorldEventBus::new());
        let loop_ = DispatchLoop::new(provider.clone(), catalog, bus);
        let mut a = agent();
        let cancel = CancelToken::new();

        let outcome = loop_
            .run_turn(
                DispatchInput { world_id: "w1".into(), chat_id: "c1".into(), agent: &mut a, memory: &[], working_directory: None, incoming_sender: Some("researcher".into()), attach_tools: true },
                &cancel,
            )
            .await
            .unwrap();

        match outcome {
            DispatchOutcome::Completed { text, .. } => assert_eq!(text, "@researcher hello there"),
            _ => panic!("expected completion"),
        }
        assert_eq!(a.llm_call_count, 1);
    }

    #[tokio::test]
    async fn executes_tool_then_recurses_to_final_text() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ChatResponse {
                content: String::new(),
                tool_calls: vec![ToolCall::new("tc1", "echo", r#"{"text":"hi"}"#)],
                usage: None,
                finish_reason: Some("tool_calls".into()),
            },
            ChatResponse {
                content: "done: hi".to_string(),
                tool_calls: vec![],
                usage: None,
                finish_reason: Some("stop".into()),
            },
        ]));
        let catalog = Arc::new(EchoCatalog);
        let bus = Arc::new(WorldEventBus::new());
        let loop_ = DispatchLoop::new(provider, catalog, bus);
        let mut a = agent();
        let cancel = CancelToken::new();

        let outcome = loop_
            .run_turn(
                DispatchInput { world_id: "w1".into(), chat_id: "c1".into(), agent: &mut a, memory: &[], working_directory: None, incoming_sender: Some("researcher".into()), attach_tools: true },
                &cancel,
            )
            .await
            .unwrap();

        match outcome {
            DispatchOutcome::Completed { text, messages_to_append, .. } => {
                assert_eq!(text, "@researcher done: hi");
                assert!(messages_to_append.iter().any(|m| m.content == "hi"));
            }
            _ => panic!("expected completion"),
        }
        assert_eq!(a.llm_call_count, 2);
    }

    #[tokio::test]
    async fn canceled_before_first_call_returns_canceled() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let catalog = Arc::new(NoopCatalog);
        let bus = Arc::new(WorldEventBus::new());
        let loop_ = DispatchLoop::new(provider, catalog, bus);
        let mut a = agent();
        let cancel = CancelToken::new();
        cancel.cancel();

        let outcome = loop_
            .run_turn(
                DispatchInput { world_id: "w1".into(), chat_id: "c1".into(), agent: &mut a, memory: &[], working_directory: None, incoming_sender: Some("researcher".into()), attach_tools: true },
                &cancel,
            )
            .await
            .unwrap();

        assert!(matches!(outcome, DispatchOutcome::Canceled { .. }));
    }
}
