#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Domain(#[from] relaycore_domain::error::Error),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("world not found: {0}")]
    WorldNotFound(String),
    #[error("agent not found: {0}:{1}")]
    AgentNotFound(String, String),
    #[error("chat not found: {0}:{1}")]
    ChatNotFound(String, String),
    #[error("agent creation already in progress: {0}:{1}")]
    AgentCreationInFlight(String, String),
    #[error("hitl request not found: {0}:{1}")]
    HitlRequestNotFound(String, String),
    #[error("hitl option not found: {0}")]
    HitlOptionNotFound(String),
    #[error("hitl chat scope mismatch for request {0}")]
    HitlChatScopeMismatch(String),
    #[error("tool '{0}' not found")]
    ToolNotFound(String),
    #[error("provider error: {0}")]
    Provider(String),
}

pub type Result<T> = std::result::Result<T, Error>;
