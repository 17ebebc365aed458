//! A scripted, in-memory [`LlmProvider`] used across this crate's and the
//! orchestration core's tests. Hand-written rather than a mocking crate,
//! so scripted responses read as plain data.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::stream;
use relaycore_domain::error::Result;
use relaycore_domain::stream::StreamEvent;

use crate::traits::{ChatRequest, ChatResponse, ChatStream, LlmProvider};

pub struct ScriptedProvider {
    responses: Mutex<Vec<ChatResponse>>,
    pub call_count: Arc<AtomicUsize>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<ChatResponse>) -> Self {
        Self {
            responses: Mutex::new(responses),
            call_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    async fn generate(&self, _req: ChatRequest) -> Result<ChatResponse> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Ok(ChatResponse {
                content: String::new(),
                tool_calls: Vec::new(),
                usage: None,
                finish_reason: Some("stop".into()),
            });
        }
        Ok(responses.remove(0))
    }

    async fn stream(&self, req: ChatRequest) -> Result<ChatStream> {
        let resp = self.generate(req).await?;
        let mut events = Vec::new();
        if !resp.content.is_empty() {
            events.push(Ok(StreamEvent::Token {
                text: resp.content.clone(),
            }));
        }
        events.push(Ok(StreamEvent::Done {
            usage: resp.usage,
            finish_reason: resp.finish_reason.clone(),
        }));
        Ok(Box::pin(stream::iter(events)))
    }

    fn provider_id(&self) -> &str {
        "scripted"
    }
}
