//! The provider-agnostic LLM interface (spec §6 "LLM provider interface").
//!
//! Concrete adapters (OpenAI, Anthropic, Google, Azure, xAI, Ollama, an
//! OpenAI-compatible gateway) are out of scope for the orchestration
//! core (spec §1) — this crate only defines the seam every adapter
//! implements: a single streaming chat-completion call over a
//! provider-agnostic request/response shape.

use relaycore_domain::error::Result;
use relaycore_domain::stream::{BoxStream, StreamEvent, Usage};
use relaycore_domain::tool::{AgentMessage, ToolCall, ToolDefinition};

/// A provider-agnostic chat completion request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<AgentMessage>,
    pub tools: Vec<ToolDefinition>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Model identifier override. `None` uses the agent's configured model.
    pub model: Option<String>,
}

/// A non-streaming chat completion response.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<Usage>,
    pub finish_reason: Option<String>,
}

/// The result of a streaming call: a content/tool-call event stream. The
/// dispatch loop (spec §4.8) drains this, accumulating text and merging
/// tool-call deltas by their stable `index`.
pub type ChatStream = BoxStream<'static, Result<StreamEvent>>;

/// Trait every LLM adapter implements. The orchestration core depends
/// only on this trait, never on a concrete provider SDK.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Non-streaming completion.
    async fn generate(&self, req: ChatRequest) -> Result<ChatResponse>;

    /// Streaming completion. Implementations emit `StreamEvent::Token`
    /// for text deltas and `StreamEvent::ToolCall*` for tool-call
    /// assembly, terminated by exactly one `Done` or `Error` event.
    async fn stream(&self, req: ChatRequest) -> Result<ChatStream>;

    /// A stable identifier for this provider instance (e.g. `"openai"`),
    /// used in error messages and tracing fields.
    fn provider_id(&self) -> &str;

    /// Whether this adapter supports streaming at all. The `ollama`
    /// provider's tool-support gate (spec §4.8 step 2) is a feature flag
    /// the dispatch loop checks independently of this.
    fn supports_streaming(&self) -> bool {
        true
    }
}
