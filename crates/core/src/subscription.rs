//! World subscription lifecycle (spec §4.11, component C11): attaches a
//! client connection to a world's bus, subscribes each agent's handler,
//! and owns the `unsubscribe`/`refresh`/`destroy` lifecycle.
//!
//! Generalizes a per-connection listener attach/detach (one outbound
//! task, aborted on socket close) into one forwarder task per bus
//! channel plus one handler task per agent.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::Instrument;

use relaycore_domain::agent::{determine_sender_type, Agent, Provider, SenderType};
use relaycore_domain::cancel::CancelMap;
use relaycore_domain::tool::AgentMessage;
use relaycore_domain::world::{WorldConfig, WorldMessageEvent};
use relaycore_providers::LlmProvider;

use crate::activity::ActivityTracker;
use crate::chat_title::maybe_generate_title;
use crate::client::ClientConnection;
use crate::dispatch::{DispatchInput, DispatchLoop, DispatchOutcome, ToolCatalog};
use crate::error::Result;
use crate::event_bus::{self, RespondDecision, WorldEventBus};
use crate::hitl::HitlRuntime;
use crate::storage::StorageApi;

const MEMORY_WINDOW: usize = 10;
const HITL_DEFAULT_TIMEOUT_MS: u64 = 120_000;

/// Resolves an agent's configured provider/model to a live client — the
/// actual provider API clients are an external collaborator (spec §6),
/// so the runtime only ever depends on this seam.
pub trait ProviderRegistry: Send + Sync {
    fn resolve(&self, provider: Provider, model: &str) -> Arc<dyn LlmProvider>;
}

struct SharedState {
    agents: HashMap<String, Agent>,
    current_chat_id: String,
}

/// A running world: shared mutable state plus the collaborators every
/// agent handler and forwarder task needs a handle to.
pub struct WorldRuntime {
    pub config: WorldConfig,
    pub bus: Arc<WorldEventBus>,
    pub activity: ActivityTracker,
    pub cancel_map: CancelMap,
    pub hitl: HitlRuntime,
    storage: Arc<dyn StorageApi>,
    catalog: Arc<dyn ToolCatalog>,
    providers: Arc<dyn ProviderRegistry>,
    state: AsyncMutex<SharedState>,
}

impl WorldRuntime {
    pub fn is_processing(&self) -> bool {
        self.activity.is_processing()
    }
}

/// The handle `startWorld` returns: forwarder/handler tasks plus the
/// `unsubscribe`/`refresh`/`destroy` operations spec §4.11 names.
pub struct WorldSubscription {
    pub runtime: Arc<WorldRuntime>,
    client: Arc<dyn ClientConnection>,
    forwarders: Vec<JoinHandle<()>>,
    handlers: Vec<JoinHandle<()>>,
}

/// `startWorld(world, client)`: loads existing agents from storage,
/// attaches bus forwarders and per-agent handlers.
pub async fn start_world(
    config: WorldConfig,
    storage: Arc<dyn StorageApi>,
    catalog: Arc<dyn ToolCatalog>,
    providers: Arc<dyn ProviderRegistry>,
    client: Arc<dyn ClientConnection>,
) -> Result<WorldSubscription> {
    let agents = storage.list_agents(&config.id).await?;
    let chats = storage.list_chats(&config.id).await?;
    let current_chat_id = chats.first().map(|c| c.id.clone()).unwrap_or_else(|| "default".to_string());
    tracing::info!(world_id = %config.id, agent_count = agents.len(), "world starting");

    let runtime = Arc::new(WorldRuntime {
        bus: Arc::new(WorldEventBus::new()),
        activity: ActivityTracker::new(config.id.clone()),
        cancel_map: CancelMap::new(),
        hitl: HitlRuntime::new(std::time::Duration::from_millis(HITL_DEFAULT_TIMEOUT_MS)),
        storage,
        catalog,
        providers,
        state: AsyncMutex::new(SharedState {
            agents: agents.into_iter().map(|a| (a.id.clone(), a)).collect(),
            current_chat_id,
        }),
        config,
    });

    attach(runtime, client).await
}

async fn attach(runtime: Arc<WorldRuntime>, client: Arc<dyn ClientConnection>) -> Result<WorldSubscription> {
    let mut forwarders = Vec::new();
    forwarders.push(spawn_event_forward(runtime.bus.sse.subscribe(), client.clone(), "sse"));
    forwarders.push(spawn_event_forward(runtime.bus.tool.subscribe(), client.clone(), "tool"));
    forwarders.push(spawn_event_forward(runtime.bus.world_activity.subscribe(), client.clone(), "world-activity"));
    forwarders.push(spawn_event_forward(runtime.bus.processing.subscribe(), client.clone(), "processing"));
    forwarders.push(spawn_event_forward(runtime.bus.idle.subscribe(), client.clone(), "idle"));
    forwarders.push(spawn_event_forward(runtime.bus.world.subscribe(), client.clone(), "world"));
    forwarders.push(spawn_log_forward(runtime.bus.system.subscribe(), client.clone()));

    let mut handlers = Vec::new();
    handlers.push(spawn_chat_title_handler(runtime.clone()));

    let agent_ids: Vec<String> = runtime.state.lock().await.agents.keys().cloned().collect();
    for agent_id in agent_ids {
        handlers.push(spawn_agent_handler(runtime.clone(), agent_id));
    }

    Ok(WorldSubscription { runtime, client, forwarders, handlers })
}

fn spawn_event_forward(mut rx: tokio::sync::broadcast::Receiver<Value>, client: Arc<dyn ClientConnection>, event_type: &'static str) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(payload) => client.on_world_event(event_type, &payload),
                Err(RecvError::Closed) => break,
                Err(RecvError::Lagged(_)) => continue,
            }
        }
    })
}

fn spawn_log_forward(mut rx: tokio::sync::broadcast::Receiver<Value>, client: Arc<dyn ClientConnection>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(payload) => client.on_log(&payload),
                Err(RecvError::Closed) => break,
                Err(RecvError::Lagged(_)) => continue,
            }
        }
    })
}

/// Per-agent handler (spec §4.10 steps 1-5), one task per agent
/// subscribed to the `message` channel.
fn spawn_agent_handler(runtime: Arc<WorldRuntime>, agent_id: String) -> JoinHandle<()> {
    let mut rx = runtime.bus.message.subscribe();
    tracing::debug!(world_id = %runtime.config.id, agent_id = %agent_id, "agent handler spawned");
    tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Closed) => break,
                Err(RecvError::Lagged(_)) => continue,
            };
            handle_incoming_message(&runtime, &agent_id, event).await;
        }
    })
}

async fn handle_incoming_message(runtime: &Arc<WorldRuntime>, agent_id: &str, event: WorldMessageEvent) {
    let span = tracing::info_span!("agent.handle_message", world_id = %runtime.config.id, agent_id = %agent_id);
    handle_incoming_message_inner(runtime, agent_id, event).instrument(span).await
}

async fn handle_incoming_message_inner(runtime: &Arc<WorldRuntime>, agent_id: &str, event: WorldMessageEvent) {
    let sender = event.sender.as_deref();

    // Step 1: ignore events the agent itself sent.
    if sender.map(|s| s.eq_ignore_ascii_case(agent_id)).unwrap_or(false) {
        return;
    }

    let sender_type = determine_sender_type(sender);

    let (mut agent, chat_id) = {
        let mut state = runtime.state.lock().await;
        let Some(agent) = state.agents.get_mut(agent_id) else { return };
        // Step 2: human/world senders reset the call counter.
        if matches!(sender_type, SenderType::Human | SenderType::World) {
            agent.reset_llm_call_count();
        }
        (agent.clone(), state.current_chat_id.clone())
    };

    // Step 3.
    match event_bus::should_agent_respond(&event.content, sender, agent_id, agent.llm_call_count, runtime.config.turn_limit) {
        RespondDecision::Skip => {
            persist_agent(runtime, &agent).await;
            return;
        }
        RespondDecision::TurnLimitReached => {
            let notice = event_bus::turn_limit_notice(agent.llm_call_count);
            publish_message(runtime, &notice, agent_id).await;
            persist_agent(runtime, &agent).await;
            return;
        }
        RespondDecision::Respond => {}
    }

    // Step 4: save the incoming message to memory.
    let incoming_sender = sender.unwrap_or("human").to_string();
    let incoming = AgentMessage::user(event.content.clone(), incoming_sender.clone()).with_chat_id(chat_id.clone());
    agent.memory.push(incoming);
    persist_agent(runtime, &agent).await;

    // Step 5: last MEMORY_WINDOW entries as history, invoke the dispatch loop.
    let window_start = agent.memory.len().saturating_sub(MEMORY_WINDOW);
    let history = agent.memory[window_start..].to_vec();

    let (activity_event, mut guard) = runtime.activity.begin(Some(agent_id));
    let _ = runtime.bus.world_activity.send(serde_json::to_value(&activity_event).unwrap_or(Value::Null));

    let provider = runtime.providers.resolve(agent.provider, &agent.model);
    let dispatch = DispatchLoop::new(provider, runtime.catalog.clone(), runtime.bus.clone());
    let cancel = runtime.cancel_map.register(&format!("{}:{}", runtime.config.id, chat_id));

    tracing::debug!(chat_id = %chat_id, "dispatch loop starting");
    let outcome = dispatch
        .run_turn(
            DispatchInput {
                world_id: runtime.config.id.clone(),
                chat_id: chat_id.clone(),
                agent: &mut agent,
                memory: &history,
                working_directory: runtime.config.working_directory(),
                incoming_sender: Some(incoming_sender),
                attach_tools: true,
            },
            &cancel,
        )
        .await;

    runtime.cancel_map.remove(&format!("{}:{}", runtime.config.id, chat_id));

    match outcome {
        Ok(DispatchOutcome::Completed { text, messages_to_append, .. }) => {
            tracing::debug!(chat_id = %chat_id, "dispatch loop completed");
            agent.memory.extend(messages_to_append);
            agent.memory.push(AgentMessage::assistant(text.clone()).with_chat_id(chat_id.clone()));
            persist_agent(runtime, &agent).await;
            publish_message(runtime, &text, agent_id).await;
        }
        Ok(DispatchOutcome::Stopped { messages_to_append, approval_message }) => {
            tracing::debug!(chat_id = %chat_id, "dispatch loop stopped pending approval");
            agent.memory.extend(messages_to_append);
            persist_agent(runtime, &agent).await;
            let _ = runtime.bus.system.send(approval_message);
        }
        Ok(DispatchOutcome::Canceled { .. }) => {
            tracing::debug!(chat_id = %chat_id, "dispatch loop canceled");
            persist_agent(runtime, &agent).await;
        }
        Err(err) => {
            tracing::warn!(chat_id = %chat_id, error = %err, "dispatch loop errored");
            let _ = runtime.bus.system.send(serde_json::json!({"type": "error", "agent": agent_id, "message": err.to_string()}));
        }
    }

    guard.release();
    let idle_event = serde_json::to_value(runtime_idle_snapshot(runtime)).unwrap_or(Value::Null);
    if !runtime.activity.is_processing() {
        let _ = runtime.bus.idle.send(idle_event);
    }
}

fn runtime_idle_snapshot(runtime: &Arc<WorldRuntime>) -> serde_json::Value {
    serde_json::json!({"worldId": runtime.config.id, "processing": runtime.activity.is_processing()})
}

async fn persist_agent(runtime: &Arc<WorldRuntime>, agent: &Agent) {
    {
        let mut state = runtime.state.lock().await;
        state.agents.insert(agent.id.clone(), agent.clone());
    }
    let _ = runtime.storage.save_agent_memory(&runtime.config.id, &agent.id, &agent.memory).await;
    let _ = runtime.storage.save_agent_config(&runtime.config.id, agent).await;
}

async fn publish_message(runtime: &Arc<WorldRuntime>, content: &str, sender: &str) {
    let event = WorldMessageEvent {
        content: content.to_string(),
        sender: Some(sender.to_string()),
        timestamp: chrono::Utc::now(),
        message_id: uuid::Uuid::new_v4(),
    };
    let _ = runtime.bus.message.send(event);
}

/// World-level subscriber (spec §4.10 "Chat title auto-generation"):
/// fires once per incoming message while the current chat is untitled.
fn spawn_chat_title_handler(runtime: Arc<WorldRuntime>) -> JoinHandle<()> {
    let mut rx = runtime.bus.message.subscribe();
    tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Closed) => break,
                Err(RecvError::Lagged(_)) => continue,
            };
            let chat_id = { runtime.state.lock().await.current_chat_id.clone() };
            let Ok(Some(chat)) = runtime.storage.load_chat_data(&runtime.config.id, &chat_id).await else { continue };
            if !chat.is_untitled() {
                continue;
            }
            let Some(provider_name) = runtime.config.chat_llm_provider else { continue };
            let provider = runtime.providers.resolve(provider_name, runtime.config.chat_llm_model.as_deref().unwrap_or("gpt-4"));
            let max_len = 100;
            match maybe_generate_title(provider.as_ref(), &chat, &[], &event.content, max_len).await {
                Ok(Some(title)) => {
                    let mut updated = chat;
                    updated.name = title.clone();
                    if runtime.storage.update_chat_data(&runtime.config.id, &updated).await.is_ok() {
                        let _ = runtime.bus.system.send(serde_json::json!({"type": "chat-title-updated", "chatId": updated.id, "title": title}));
                    }
                }
                Ok(None) => {}
                Err(_) => {}
            }
        }
    })
}

impl WorldSubscription {
    /// Detaches listener tasks without touching storage; the world can
    /// be re-attached later via [`refresh`](Self::refresh).
    pub fn unsubscribe(&mut self) {
        tracing::debug!(world_id = %self.runtime.config.id, "world unsubscribed");
        for handle in self.forwarders.drain(..) {
            handle.abort();
        }
    }

    /// `destroy`: detach listeners and clear the in-memory agents map.
    pub async fn destroy(mut self) {
        tracing::info!(world_id = %self.runtime.config.id, "world destroyed");
        self.unsubscribe();
        for handle in self.handlers.drain(..) {
            handle.abort();
        }
        self.runtime.state.lock().await.agents.clear();
    }

    /// `refresh`: destroy, then reload the world from storage and
    /// re-attach. Events from the destroyed instance's bus can never
    /// reach the client afterward since a new [`WorldEventBus`] (and
    /// thus new broadcast channels) backs the returned subscription.
    pub async fn refresh(self) -> Result<WorldSubscription> {
        let config = self.runtime.config.clone();
        let storage = self.runtime.storage.clone();
        let catalog = self.runtime.catalog.clone();
        let providers = self.runtime.providers.clone();
        let client = self.client.clone();
        self.destroy().await;
        start_world(config, storage, catalog, providers, client).await
    }
}
