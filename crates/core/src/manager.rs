//! Manager facade (spec §4.12, component C12): CRUD over worlds,
//! agents, and chats, delegating persistence to [`StorageApi`] and
//! enforcing the agent-creation slot-claim invariant.
//!
//! Wraps a storage trait object behind plain async methods and keeps a
//! small in-memory guard alongside it — here, [`AgentCreationSlots`].

use std::sync::Arc;

use relaycore_domain::agent::Agent;
use relaycore_domain::chat::Chat;
use relaycore_domain::world::WorldConfig;

use crate::builtin_tools::AgentCreationSlots;
use crate::error::{Error, Result};
use crate::storage::StorageApi;

/// Options accepted by [`Manager::create_agent`] (spec §4.12).
#[derive(Debug, Clone, Default)]
pub struct CreateAgentOptions {
    /// Allows creation while the world is mid-turn — set by the
    /// `create_agent` built-in tool once its HITL gate has approved.
    pub allow_while_processing: bool,
    /// Skips the slot claim because the caller (the built-in tool)
    /// already holds it.
    pub slot_already_claimed: bool,
}

pub struct Manager {
    storage: Arc<dyn StorageApi>,
    creation_slots: Arc<AgentCreationSlots>,
}

impl Manager {
    pub fn new(storage: Arc<dyn StorageApi>, creation_slots: Arc<AgentCreationSlots>) -> Self {
        Self { storage, creation_slots }
    }

    pub async fn create_world(&self, world: WorldConfig) -> Result<WorldConfig> {
        self.storage.save_world(&world).await?;
        Ok(world)
    }

    pub async fn get_world(&self, world_id: &str) -> Result<WorldConfig> {
        self.storage.load_world(world_id).await?.ok_or_else(|| Error::WorldNotFound(world_id.to_string()))
    }

    pub async fn update_world(&self, world: WorldConfig) -> Result<WorldConfig> {
        if !self.storage.world_exists(&world.id).await? {
            return Err(Error::WorldNotFound(world.id.clone()));
        }
        self.storage.save_world(&world).await?;
        Ok(world)
    }

    pub async fn delete_world(&self, world_id: &str) -> Result<()> {
        self.storage.delete_world(world_id).await
    }

    pub async fn list_worlds(&self) -> Result<Vec<WorldConfig>> {
        self.storage.list_worlds().await
    }

    /// `createAgent(worldId, params, opts?)` (spec §4.12): rejects
    /// creation mid-turn unless `allow_while_processing` is set, and
    /// claims the per-world creation slot unless the caller already
    /// holds it.
    pub async fn create_agent(&self, world_id: &str, agent: Agent, is_processing: bool, opts: CreateAgentOptions) -> Result<Agent> {
        if is_processing && !opts.allow_while_processing {
            return Err(Error::AgentCreationInFlight(world_id.to_string(), agent.id.clone()));
        }
        if !opts.slot_already_claimed {
            self.creation_slots.claim(world_id, &agent.id)?;
        }
        let result = self.storage.save_agent(world_id, &agent).await;
        self.creation_slots.release(world_id, &agent.id);
        result?;
        Ok(agent)
    }

    pub async fn get_agent(&self, world_id: &str, agent_id: &str) -> Result<Agent> {
        self.storage.load_agent(world_id, agent_id).await?.ok_or_else(|| Error::AgentNotFound(world_id.to_string(), agent_id.to_string()))
    }

    pub async fn update_agent(&self, world_id: &str, agent: Agent) -> Result<Agent> {
        self.storage.save_agent_config(world_id, &agent).await?;
        Ok(agent)
    }

    pub async fn delete_agent(&self, world_id: &str, agent_id: &str) -> Result<()> {
        self.storage.delete_agent(world_id, agent_id).await
    }

    pub async fn list_agents(&self, world_id: &str) -> Result<Vec<Agent>> {
        self.storage.list_agents(world_id).await
    }

    pub async fn clear_agent_memory(&self, world_id: &str, agent_id: &str) -> Result<()> {
        self.storage.save_agent_memory(world_id, agent_id, &[]).await
    }

    pub async fn new_chat(&self, world_id: &str, chat_id: &str) -> Result<Chat> {
        let chat = Chat::new_untitled(chat_id);
        self.storage.save_chat_data(world_id, &chat).await?;
        Ok(chat)
    }

    pub async fn restore_chat(&self, world_id: &str, chat_id: &str) -> Result<Chat> {
        self.storage.load_chat_data(world_id, chat_id).await?.ok_or_else(|| Error::ChatNotFound(world_id.to_string(), chat_id.to_string()))
    }

    pub async fn list_chats(&self, world_id: &str) -> Result<Vec<Chat>> {
        self.storage.list_chats(world_id).await
    }

    pub async fn delete_chat(&self, world_id: &str, chat_id: &str) -> Result<()> {
        self.storage.delete_chat_data(world_id, chat_id).await
    }
}
