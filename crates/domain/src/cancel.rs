//! Cooperative cancellation tokens with group fan-out (spec §5,
//! §6 "stopMessageProcessing"), keyed by `(worldId,chatId)`.
//!
//! A turn (here, an agent's LLM dispatch loop for a chat) polls
//! `is_cancelled()` at checkpoints rather than being preempted. Groups
//! let a chat-scope stop cascade into every shell execution and
//! follow-up LLM call the turn spawned.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks active cancellation tokens per `(worldId,chatId)` key, with
/// group support so a parent scope (a chat) can cascade cancellation to
/// children it spawned (individual shell executions, follow-up turns).
pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancelToken>>,
    groups: Mutex<HashMap<String, HashSet<String>>>,
}

impl Default for CancelMap {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelMap {
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
            groups: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, key: &str) -> CancelToken {
        let token = CancelToken::new();
        self.tokens.lock().insert(key.to_owned(), token.clone());
        token
    }

    /// Cancels the token for `key` and cascades to every child
    /// registered in its group. Returns whether `key` itself was found.
    pub fn cancel(&self, key: &str) -> bool {
        let found = if let Some(token) = self.tokens.lock().get(key) {
            token.cancel();
            true
        } else {
            false
        };

        if let Some(children) = self.groups.lock().get(key) {
            if !children.is_empty() {
                tracing::debug!(key, child_count = children.len(), "cancellation cascading to group");
            }
            let tokens = self.tokens.lock();
            for child in children {
                if let Some(child_token) = tokens.get(child) {
                    child_token.cancel();
                }
            }
        }

        found
    }

    pub fn remove(&self, key: &str) {
        self.tokens.lock().remove(key);
        self.groups.lock().remove(key);
    }

    pub fn is_running(&self, key: &str) -> bool {
        self.tokens.lock().contains_key(key)
    }

    pub fn add_to_group(&self, parent_key: &str, child_key: &str) {
        self.groups.lock().entry(parent_key.to_owned()).or_default().insert(child_key.to_owned());
    }

    pub fn remove_from_group(&self, parent_key: &str, child_key: &str) {
        let mut groups = self.groups.lock();
        if let Some(children) = groups.get_mut(parent_key) {
            children.remove(child_key);
            if children.is_empty() {
                groups.remove(parent_key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_lifecycle() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn map_register_and_cancel() {
        let map = CancelMap::new();
        let token = map.register("w1:c1");
        assert!(map.is_running("w1:c1"));
        assert!(map.cancel("w1:c1"));
        assert!(token.is_cancelled());
        map.remove("w1:c1");
        assert!(!map.is_running("w1:c1"));
    }

    #[test]
    fn cancel_cascades_to_group() {
        let map = CancelMap::new();
        let parent = map.register("w1:c1");
        let shell_exec = map.register("w1:c1:exec1");
        map.add_to_group("w1:c1", "w1:c1:exec1");

        map.cancel("w1:c1");
        assert!(parent.is_cancelled());
        assert!(shell_exec.is_cancelled());
    }

    #[test]
    fn cancel_unknown_key_returns_false() {
        let map = CancelMap::new();
        assert!(!map.cancel("ghost"));
    }

    #[test]
    fn remove_from_group_stops_cascade() {
        let map = CancelMap::new();
        map.register("parent");
        let child = map.register("child");
        map.add_to_group("parent", "child");
        map.remove_from_group("parent", "child");
        map.cancel("parent");
        assert!(!child.is_cancelled());
    }
}
