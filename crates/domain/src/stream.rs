//! Provider streaming event shapes (spec §6 LLM provider interface).

use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// A boxed async stream of provider events.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Token usage for a completion.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Events a streaming provider call emits. Tool-call deltas are indexed
/// by a stable integer so the dispatch loop can merge partial argument
/// strings across chunks (spec §6: "stable integer index").
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "token")]
    Token { text: String },

    #[serde(rename = "tool_call_started")]
    ToolCallStarted { index: u32, call_id: String, tool_name: String },

    #[serde(rename = "tool_call_delta")]
    ToolCallDelta { index: u32, arguments_delta: String },

    #[serde(rename = "tool_call_finished")]
    ToolCallFinished { index: u32 },

    #[serde(rename = "done")]
    Done {
        usage: Option<Usage>,
        finish_reason: Option<String>,
    },

    #[serde(rename = "error")]
    Error { message: String },
}
