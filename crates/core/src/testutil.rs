//! An in-memory [`StorageApi`] double, used by this crate's own tests
//! and available to downstream crates exercising the manager facade
//! without a real persistence backend. A hand-written fake rather than
//! a mocking crate.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use relaycore_domain::agent::Agent;
use relaycore_domain::chat::{Chat, WorldChat};
use relaycore_domain::tool::AgentMessage;
use relaycore_domain::world::WorldConfig;

use crate::error::Result;
use crate::storage::StorageApi;

#[derive(Default)]
struct Inner {
    worlds: HashMap<String, WorldConfig>,
    agents: HashMap<(String, String), Agent>,
    chats: HashMap<(String, String), Chat>,
    world_chats: HashMap<(String, String), WorldChat>,
}

#[derive(Default)]
pub struct InMemoryStorage {
    inner: RwLock<Inner>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageApi for InMemoryStorage {
    async fn save_world(&self, world: &WorldConfig) -> Result<()> {
        self.inner.write().worlds.insert(world.id.clone(), world.clone());
        Ok(())
    }

    async fn load_world(&self, world_id: &str) -> Result<Option<WorldConfig>> {
        Ok(self.inner.read().worlds.get(world_id).cloned())
    }

    async fn list_worlds(&self) -> Result<Vec<WorldConfig>> {
        Ok(self.inner.read().worlds.values().cloned().collect())
    }

    async fn delete_world(&self, world_id: &str) -> Result<()> {
        let mut inner = self.inner.write();
        inner.worlds.remove(world_id);
        inner.agents.retain(|(w, _), _| w != world_id);
        inner.chats.retain(|(w, _), _| w != world_id);
        inner.world_chats.retain(|(w, _), _| w != world_id);
        Ok(())
    }

    async fn world_exists(&self, world_id: &str) -> Result<bool> {
        Ok(self.inner.read().worlds.contains_key(world_id))
    }

    async fn save_agent(&self, world_id: &str, agent: &Agent) -> Result<()> {
        self.inner.write().agents.insert((world_id.to_string(), agent.id.clone()), agent.clone());
        Ok(())
    }

    async fn save_agent_config(&self, world_id: &str, agent: &Agent) -> Result<()> {
        self.save_agent(world_id, agent).await
    }

    async fn save_agent_memory(&self, world_id: &str, agent_id: &str, memory: &[AgentMessage]) -> Result<()> {
        let mut inner = self.inner.write();
        if let Some(agent) = inner.agents.get_mut(&(world_id.to_string(), agent_id.to_string())) {
            agent.memory = memory.to_vec();
        }
        Ok(())
    }

    async fn load_agent(&self, world_id: &str, agent_id: &str) -> Result<Option<Agent>> {
        Ok(self.inner.read().agents.get(&(world_id.to_string(), agent_id.to_string())).cloned())
    }

    async fn list_agents(&self, world_id: &str) -> Result<Vec<Agent>> {
        Ok(self.inner.read().agents.iter().filter(|((w, _), _)| w == world_id).map(|(_, a)| a.clone()).collect())
    }

    async fn delete_agent(&self, world_id: &str, agent_id: &str) -> Result<()> {
        self.inner.write().agents.remove(&(world_id.to_string(), agent_id.to_string()));
        Ok(())
    }

    async fn save_chat_data(&self, world_id: &str, chat: &Chat) -> Result<()> {
        self.inner.write().chats.insert((world_id.to_string(), chat.id.clone()), chat.clone());
        Ok(())
    }

    async fn load_chat_data(&self, world_id: &str, chat_id: &str) -> Result<Option<Chat>> {
        Ok(self.inner.read().chats.get(&(world_id.to_string(), chat_id.to_string())).cloned())
    }

    async fn update_chat_data(&self, world_id: &str, chat: &Chat) -> Result<()> {
        self.save_chat_data(world_id, chat).await
    }

    async fn list_chats(&self, world_id: &str) -> Result<Vec<Chat>> {
        Ok(self.inner.read().chats.iter().filter(|((w, _), _)| w == world_id).map(|(_, c)| c.clone()).collect())
    }

    async fn delete_chat_data(&self, world_id: &str, chat_id: &str) -> Result<()> {
        self.inner.write().chats.remove(&(world_id.to_string(), chat_id.to_string()));
        Ok(())
    }

    async fn save_world_chat(&self, world_id: &str, chat_id: &str, snapshot: &WorldChat) -> Result<()> {
        self.inner.write().world_chats.insert((world_id.to_string(), chat_id.to_string()), snapshot.clone());
        Ok(())
    }

    async fn load_world_chat(&self, world_id: &str, chat_id: &str) -> Result<Option<WorldChat>> {
        Ok(self.inner.read().world_chats.get(&(world_id.to_string(), chat_id.to_string())).cloned())
    }

    async fn restore_from_world_chat(&self, world_id: &str, snapshot: &WorldChat) -> Result<()> {
        let mut inner = self.inner.write();
        inner.worlds.insert(world_id.to_string(), snapshot.world.clone());
        for agent in &snapshot.agents {
            inner.agents.insert((world_id.to_string(), agent.id.clone()), agent.clone());
        }
        inner.chats.insert((world_id.to_string(), snapshot.chat.id.clone()), snapshot.chat.clone());
        Ok(())
    }

    async fn validate_integrity(&self, world_id: &str) -> Result<bool> {
        Ok(self.inner.read().worlds.contains_key(world_id))
    }

    async fn repair_data(&self, _world_id: &str) -> Result<()> {
        Ok(())
    }

    async fn archive_memory(&self, world_id: &str, agent_id: &str) -> Result<()> {
        self.save_agent_memory(world_id, agent_id, &[]).await
    }
}
