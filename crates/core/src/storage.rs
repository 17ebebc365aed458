//! Storage API (spec §6): the persistence seam the manager facade
//! (C12) depends on. Concrete backends (file, SQLite) are external
//! collaborators (spec §1) — this trait and its in-memory test double
//! are all the orchestration core needs to exercise C12's logic.
//!
//! All operations return plain data, never runtime objects — storage
//! never hands back a `World` or `Agent` with live event-bus handles.

use async_trait::async_trait;
use relaycore_domain::agent::Agent;
use relaycore_domain::chat::{Chat, WorldChat};
use relaycore_domain::world::WorldConfig;

use crate::error::Result;

#[async_trait]
pub trait StorageApi: Send + Sync {
    async fn save_world(&self, world: &WorldConfig) -> Result<()>;
    async fn load_world(&self, world_id: &str) -> Result<Option<WorldConfig>>;
    async fn list_worlds(&self) -> Result<Vec<WorldConfig>>;
    async fn delete_world(&self, world_id: &str) -> Result<()>;
    async fn world_exists(&self, world_id: &str) -> Result<bool>;

    async fn save_agent(&self, world_id: &str, agent: &Agent) -> Result<()>;
    async fn save_agent_config(&self, world_id: &str, agent: &Agent) -> Result<()>;
    async fn save_agent_memory(&self, world_id: &str, agent_id: &str, memory: &[relaycore_domain::tool::AgentMessage]) -> Result<()>;
    async fn load_agent(&self, world_id: &str, agent_id: &str) -> Result<Option<Agent>>;
    async fn list_agents(&self, world_id: &str) -> Result<Vec<Agent>>;
    async fn delete_agent(&self, world_id: &str, agent_id: &str) -> Result<()>;

    async fn save_chat_data(&self, world_id: &str, chat: &Chat) -> Result<()>;
    async fn load_chat_data(&self, world_id: &str, chat_id: &str) -> Result<Option<Chat>>;
    async fn update_chat_data(&self, world_id: &str, chat: &Chat) -> Result<()>;
    async fn list_chats(&self, world_id: &str) -> Result<Vec<Chat>>;
    async fn delete_chat_data(&self, world_id: &str, chat_id: &str) -> Result<()>;

    async fn save_world_chat(&self, world_id: &str, chat_id: &str, snapshot: &WorldChat) -> Result<()>;
    async fn load_world_chat(&self, world_id: &str, chat_id: &str) -> Result<Option<WorldChat>>;
    async fn restore_from_world_chat(&self, world_id: &str, snapshot: &WorldChat) -> Result<()>;

    async fn validate_integrity(&self, world_id: &str) -> Result<bool>;
    async fn repair_data(&self, world_id: &str) -> Result<()>;
    async fn archive_memory(&self, world_id: &str, agent_id: &str) -> Result<()>;
}
