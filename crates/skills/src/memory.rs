//! An in-memory [`SkillSource`] for tests and small deployments that
//! preload skill content rather than scanning a directory.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Notify;

use crate::error::SkillError;
use crate::source::SkillSource;

pub struct InMemorySkillSource {
    content: RwLock<HashMap<String, String>>,
    synced: Arc<Notify>,
    ready: std::sync::atomic::AtomicBool,
}

impl InMemorySkillSource {
    pub fn new(content: HashMap<String, String>) -> Self {
        Self {
            content: RwLock::new(content),
            synced: Arc::new(Notify::new()),
            ready: std::sync::atomic::AtomicBool::new(true),
        }
    }

    /// A source that starts unsynced, for exercising callers that wait
    /// on [`SkillSource::wait_for_initial_sync`].
    pub fn pending() -> Self {
        Self {
            content: RwLock::new(HashMap::new()),
            synced: Arc::new(Notify::new()),
            ready: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Completes the initial sync, unblocking any waiters, and seeds
    /// content atomically with that signal.
    pub fn complete_sync(&self, content: HashMap<String, String>) {
        tracing::debug!(skills_count = content.len(), "skill source initial sync completed");
        *self.content.write() = content;
        self.ready.store(true, std::sync::atomic::Ordering::SeqCst);
        self.synced.notify_waiters();
    }
}

#[async_trait::async_trait]
impl SkillSource for InMemorySkillSource {
    async fn wait_for_initial_sync(&self) {
        if self.ready.load(std::sync::atomic::Ordering::SeqCst) {
            return;
        }
        self.synced.notified().await;
    }

    fn exists(&self, skill_id: &str) -> bool {
        self.content.read().contains_key(skill_id)
    }

    async fn read_content(&self, skill_id: &str) -> Result<String, SkillError> {
        self.content
            .read()
            .get(skill_id)
            .cloned()
            .ok_or_else(|| SkillError::NotFound(skill_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_content_returns_seeded_value() {
        let source = InMemorySkillSource::new(HashMap::from([("writing".to_string(), "body".to_string())]));
        source.wait_for_initial_sync().await;
        assert_eq!(source.read_content("writing").await.unwrap(), "body");
    }

    #[tokio::test]
    async fn read_content_unknown_id_errors() {
        let source = InMemorySkillSource::new(HashMap::new());
        let err = source.read_content("ghost").await.unwrap_err();
        assert!(matches!(err, SkillError::NotFound(id) if id == "ghost"));
    }

    #[tokio::test]
    async fn wait_for_initial_sync_blocks_until_completed() {
        let source = Arc::new(InMemorySkillSource::pending());
        assert!(!source.exists("writing"));

        let waiter = {
            let source = source.clone();
            tokio::spawn(async move {
                source.wait_for_initial_sync().await;
                source.read_content("writing").await
            })
        };

        tokio::task::yield_now().await;
        source.complete_sync(HashMap::from([("writing".to_string(), "body".to_string())]));

        let result = waiter.await.unwrap();
        assert_eq!(result.unwrap(), "body");
    }
}
