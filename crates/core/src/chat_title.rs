//! Chat title auto-generation (spec §4.10, world-level message subscriber).
//!
//! Fires only while a chat still carries the untitled sentinel name,
//! via a one-shot LLM call (a throwaway `ChatRequest` with no tools
//! attached).

use relaycore_domain::chat::Chat;
use relaycore_domain::tool::AgentMessage;
use relaycore_providers::{ChatRequest, LlmProvider};

use crate::error::{Error, Result};

const TITLE_PROMPT: &str = "Summarize this conversation in 3 to 6 words for use as a chat title. Respond with the title only, no punctuation or quotes.";

fn normalize_title(raw: &str, max_len: usize) -> String {
    let trimmed = raw.trim().trim_matches(|c| c == '"' || c == '\'');
    let collapsed = trimmed.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() > max_len {
        collapsed.chars().take(max_len).collect()
    } else {
        collapsed
    }
}

/// Generates a new title for `chat` from its transcript plus `new_content`,
/// only if `chat.is_untitled()`. Returns `None` when no title change is
/// warranted (already titled, or the model produced nothing usable).
pub async fn maybe_generate_title(provider: &dyn LlmProvider, chat: &Chat, history: &[AgentMessage], new_content: &str, max_len: usize) -> Result<Option<String>> {
    if !chat.is_untitled() {
        return Ok(None);
    }

    let mut messages: Vec<AgentMessage> = history.to_vec();
    messages.push(AgentMessage::user(new_content, "human"));
    messages.push(AgentMessage::system(TITLE_PROMPT));

    let request = ChatRequest {
        messages,
        ..Default::default()
    };

    let response = provider.generate(request).await.map_err(|e| Error::Provider(e.to_string()))?;
    let title = normalize_title(&response.content, max_len);
    if title.is_empty() {
        Ok(None)
    } else {
        Ok(Some(title))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaycore_providers::testutil::ScriptedProvider;
    use relaycore_providers::ChatResponse;

    fn chat(name: &str) -> Chat {
        let mut c = Chat::new_untitled("c1");
        c.name = name.to_string();
        c
    }

    #[tokio::test]
    async fn skips_already_titled_chats() {
        let provider = ScriptedProvider::new(vec![]);
        let result = maybe_generate_title(&provider, &chat("Sprint planning"), &[], "hi", 100).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn normalizes_quotes_and_whitespace() {
        let provider = ScriptedProvider::new(vec![ChatResponse {
            content: "  \"Sprint   Planning Kickoff\"  ".to_string(),
            tool_calls: vec![],
            usage: None,
            finish_reason: None,
        }]);
        let result = maybe_generate_title(&provider, &chat("New Chat"), &[], "let's plan the sprint", 100).await.unwrap();
        assert_eq!(result.as_deref(), Some("Sprint Planning Kickoff"));
    }

    #[tokio::test]
    async fn truncates_to_max_len() {
        let provider = ScriptedProvider::new(vec![ChatResponse {
            content: "a".repeat(50),
            tool_calls: vec![],
            usage: None,
            finish_reason: None,
        }]);
        let result = maybe_generate_title(&provider, &chat("New Chat"), &[], "hi", 10).await.unwrap();
        assert_eq!(result.unwrap().chars().count(), 10);
    }

    #[tokio::test]
    async fn empty_model_output_yields_no_title() {
        let provider = ScriptedProvider::new(vec![ChatResponse {
            content: "   ".to_string(),
            tool_calls: vec![],
            usage: None,
            finish_reason: None,
        }]);
        let result = maybe_generate_title(&provider, &chat("New Chat"), &[], "hi", 100).await.unwrap();
        assert!(result.is_none());
    }
}
