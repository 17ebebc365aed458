//! Shell process registry (spec §4.5): execution records, the state
//! machine governing their transitions, active-process handles, and
//! chat-scoped cancellation.
//!
//! Tracks each execution through the full queued/starting/running
//! state machine rather than a flat running/finished/killed status, and
//! keys the session map so it can be filtered by world, chat, and
//! activity instead of scanned as one flat collection.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShellStatus {
    Queued,
    Starting,
    Running,
    Completed,
    Failed,
    Canceled,
    TimedOut,
}

impl ShellStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ShellStatus::Completed | ShellStatus::Failed | ShellStatus::Canceled | ShellStatus::TimedOut
        )
    }

    /// The transition table from spec §3/§4.5: only these target states
    /// are reachable from `self`. Terminal states may only transition
    /// to themselves (idempotent re-application).
    fn can_transition_to(self, next: ShellStatus) -> bool {
        use ShellStatus::*;
        if self.is_terminal() {
            return next == self;
        }
        match self {
            Queued => matches!(next, Starting | Running | Failed | Canceled | TimedOut),
            Starting => matches!(next, Running | Failed | Canceled | TimedOut),
            Running => matches!(next, Completed | Failed | Canceled | TimedOut),
            Completed | Failed | Canceled | TimedOut => unreachable!("terminal handled above"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ShellExecutionRecord {
    pub execution_id: String,
    pub command: String,
    pub parameters: Vec<String>,
    pub directory: String,
    pub world_id: Option<String>,
    pub chat_id: Option<String>,
    pub status: ShellStatus,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub signal: Option<String>,
    pub stdout_len: usize,
    pub stderr_len: usize,
    pub error: Option<String>,
    pub duration_ms: Option<i64>,
}

impl ShellExecutionRecord {
    fn new(command: String, parameters: Vec<String>, directory: String, world_id: Option<String>, chat_id: Option<String>) -> Self {
        Self {
            execution_id: Uuid::new_v4().to_string(),
            command,
            parameters,
            directory,
            world_id,
            chat_id,
            status: ShellStatus::Queued,
            cancel_requested: false,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            exit_code: None,
            signal: None,
            stdout_len: 0,
            stderr_len: 0,
            error: None,
            duration_ms: None,
        }
    }
}

/// A patch applied during a state transition — only the fields that
/// change at that step need to be supplied.
#[derive(Debug, Clone, Default)]
pub struct TransitionPatch {
    pub exit_code: Option<i32>,
    pub signal: Option<String>,
    pub stdout_len: Option<usize>,
    pub stderr_len: Option<usize>,
    pub error: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("execution {0} not found")]
    NotFound(String),
    #[error("illegal transition from {from:?} to {to:?} for execution {execution_id}")]
    IllegalTransition {
        execution_id: String,
        from: ShellStatus,
        to: ShellStatus,
    },
    #[error("cannot delete execution {0}: not terminal or still attached")]
    DeleteRejected(String),
}

/// A live handle to a spawned process, used to deliver cancellation.
pub trait ActiveHandle: Send + Sync {
    fn request_terminate(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    CancelRequested,
    NotCancellable,
    NotFound,
    AlreadyFinished,
}

#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub limit: Option<usize>,
    pub statuses: Option<Vec<ShellStatus>>,
    pub world_id: Option<String>,
    pub chat_id: Option<String>,
    pub active_only: bool,
}

struct Entry {
    record: ShellExecutionRecord,
    handle: Option<Arc<dyn ActiveHandle>>,
}

pub struct ShellProcessRegistry {
    entries: RwLock<HashMap<String, Entry>>,
    history_cap: usize,
}

impl ShellProcessRegistry {
    pub fn new(history_cap: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            history_cap,
        }
    }

    pub fn create(
        &self,
        command: String,
        parameters: Vec<String>,
        directory: String,
        world_id: Option<String>,
        chat_id: Option<String>,
    ) -> ShellExecutionRecord {
        let record = ShellExecutionRecord::new(command, parameters, directory, world_id, chat_id);
        let id = record.execution_id.clone();
        let mut entries = self.entries.write();
        entries.insert(
            id,
            Entry {
                record: record.clone(),
                handle: None,
            },
        );
        self.evict_overflow(&mut entries);
        record
    }

    pub fn attach_handle(&self, execution_id: &str, handle: Arc<dyn ActiveHandle>) -> Result<(), RegistryError> {
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(execution_id)
            .ok_or_else(|| RegistryError::NotFound(execution_id.to_string()))?;
        entry.handle = Some(handle);
        Ok(())
    }

    pub fn transition(&self, execution_id: &str, next: ShellStatus, patch: TransitionPatch) -> Result<ShellExecutionRecord, RegistryError> {
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(execution_id)
            .ok_or_else(|| RegistryError::NotFound(execution_id.to_string()))?;

        let from = entry.record.status;
        if !from.can_transition_to(next) {
            return Err(RegistryError::IllegalTransition {
                execution_id: execution_id.to_string(),
                from,
                to: next,
            });
        }

        let now = Utc::now();
        if from != next {
            if next == ShellStatus::Starting || (from == ShellStatus::Queued && next == ShellStatus::Running) {
                entry.record.started_at.get_or_insert(now);
            }
            if next.is_terminal() {
                entry.record.finished_at = Some(now);
                entry.record.duration_ms = entry
                    .record
                    .started_at
                    .or(Some(entry.record.created_at))
                    .map(|start| now.signed_duration_since(start).num_milliseconds());
                entry.handle = None;
            }
            entry.record.status = next;
        }

        if let Some(code) = patch.exit_code {
            entry.record.exit_code = Some(code);
        }
        if let Some(sig) = patch.signal {
            entry.record.signal = Some(sig);
        }
        if let Some(len) = patch.stdout_len {
            entry.record.stdout_len = len;
        }
        if let Some(len) = patch.stderr_len {
            entry.record.stderr_len = len;
        }
        if let Some(err) = patch.error {
            entry.record.error = Some(err);
        }

        Ok(entry.record.clone())
    }

    pub fn mark_cancel_requested(&self, execution_id: &str) -> Result<(), RegistryError> {
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(execution_id)
            .ok_or_else(|| RegistryError::NotFound(execution_id.to_string()))?;
        entry.record.cancel_requested = true;
        Ok(())
    }

    pub fn get(&self, execution_id: &str) -> Option<ShellExecutionRecord> {
        self.entries.read().get(execution_id).map(|e| e.record.clone())
    }

    pub fn list(&self, filter: &ListFilter) -> Vec<ShellExecutionRecord> {
        let entries = self.entries.read();
        let mut out: Vec<ShellExecutionRecord> = entries
            .values()
            .filter(|e| {
                if filter.active_only && e.record.status.is_terminal() {
                    return false;
                }
                if let Some(statuses) = &filter.statuses {
                    if !statuses.contains(&e.record.status) {
                        return false;
                    }
                }
                if let Some(world_id) = &filter.world_id {
                    if e.record.world_id.as_deref() != Some(world_id.as_str()) {
                        return false;
                    }
                }
                if let Some(chat_id) = &filter.chat_id {
                    if e.record.chat_id.as_deref() != Some(chat_id.as_str()) {
                        return false;
                    }
                }
                true
            })
            .map(|e| e.record.clone())
            .collect();
        out.sort_by_key(|r| r.created_at);
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        out
    }

    /// Request cancellation of a single execution. See spec §4.5 for
    /// the outcome semantics this maps directly onto.
    pub fn cancel(&self, execution_id: &str) -> CancelOutcome {
        let entries = self.entries.read();
        let Some(entry) = entries.get(execution_id) else {
            return CancelOutcome::NotFound;
        };
        if entry.record.status.is_terminal() {
            return CancelOutcome::AlreadyFinished;
        }
        if let Some(handle) = &entry.handle {
            handle.request_terminate();
            drop(entries);
            let _ = self.mark_cancel_requested(execution_id);
            CancelOutcome::CancelRequested
        } else {
            drop(entries);
            let _ = self.mark_cancel_requested(execution_id);
            CancelOutcome::NotCancellable
        }
    }

    /// Cancels every active execution scoped to `(world_id, chat_id)`,
    /// used by the stop-message RPC (spec §6).
    pub fn stop_for_chat_scope(&self, world_id: &str, chat_id: &str) -> Vec<(String, CancelOutcome)> {
        let ids: Vec<String> = {
            let entries = self.entries.read();
            entries
                .values()
                .filter(|e| {
                    !e.record.status.is_terminal()
                        && e.record.world_id.as_deref() == Some(world_id)
                        && e.record.chat_id.as_deref() == Some(chat_id)
                })
                .map(|e| e.record.execution_id.clone())
                .collect()
        };
        ids.into_iter().map(|id| (id.clone(), self.cancel(&id))).collect()
    }

    pub fn delete(&self, execution_id: &str) -> Result<(), RegistryError> {
        let mut entries = self.entries.write();
        let entry = entries
            .get(execution_id)
            .ok_or_else(|| RegistryError::NotFound(execution_id.to_string()))?;
        if !entry.record.status.is_terminal() || entry.handle.is_some() {
            return Err(RegistryError::DeleteRejected(execution_id.to_string()));
        }
        entries.remove(execution_id);
        Ok(())
    }

    /// Evicts the oldest terminal records when the history exceeds its
    /// cap. Active records are never evicted (spec §4.5).
    fn evict_overflow(&self, entries: &mut HashMap<String, Entry>) {
        if entries.len() <= self.history_cap {
            return;
        }
        let overflow = entries.len() - self.history_cap;
        let mut terminal_ids: Vec<(DateTime<Utc>, String)> = entries
            .values()
            .filter(|e| e.record.status.is_terminal())
            .map(|e| (e.record.created_at, e.record.execution_id.clone()))
            .collect();
        terminal_ids.sort_by_key(|(created_at, _)| *created_at);
        for (_, id) in terminal_ids.into_iter().take(overflow) {
            entries.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeHandle(Arc<AtomicBool>);
    impl ActiveHandle for FakeHandle {
        fn request_terminate(&self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    fn registry() -> ShellProcessRegistry {
        ShellProcessRegistry::new(2000)
    }

    #[test]
    fn create_starts_queued() {
        let reg = registry();
        let record = reg.create("ls".into(), vec![], "/tmp".into(), None, None);
        assert_eq!(record.status, ShellStatus::Queued);
    }

    #[test]
    fn legal_transition_chain_succeeds() {
        let reg = registry();
        let record = reg.create("ls".into(), vec![], "/tmp".into(), None, None);
        reg.transition(&record.execution_id, ShellStatus::Starting, TransitionPatch::default()).unwrap();
        reg.transition(&record.execution_id, ShellStatus::Running, TransitionPatch::default()).unwrap();
        let done = reg
            .transition(
                &record.execution_id,
                ShellStatus::Completed,
                TransitionPatch {
                    exit_code: Some(0),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(done.status, ShellStatus::Completed);
        assert_eq!(done.exit_code, Some(0));
        assert!(done.finished_at.is_some());
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let reg = registry();
        let record = reg.create("ls".into(), vec![], "/tmp".into(), None, None);
        let err = reg.transition(&record.execution_id, ShellStatus::Completed, TransitionPatch::default()).unwrap_err();
        assert!(matches!(err, RegistryError::IllegalTransition { .. }));
    }

    #[test]
    fn terminal_transition_to_self_is_idempotent() {
        let reg = registry();
        let record = reg.create("ls".into(), vec![], "/tmp".into(), None, None);
        reg.transition(&record.execution_id, ShellStatus::Running, TransitionPatch::default()).unwrap();
        reg.transition(&record.execution_id, ShellStatus::Failed, TransitionPatch::default()).unwrap();
        let again = reg.transition(&record.execution_id, ShellStatus::Failed, TransitionPatch::default()).unwrap();
        assert_eq!(again.status, ShellStatus::Failed);
    }

    #[test]
    fn cancel_with_handle_requests_terminate() {
        let reg = registry();
        let record = reg.create("sleep 100".into(), vec![], "/tmp".into(), None, None);
        let flag = Arc::new(AtomicBool::new(false));
        reg.attach_handle(&record.execution_id, Arc::new(FakeHandle(flag.clone()))).unwrap();
        let outcome = reg.cancel(&record.execution_id);
        assert_eq!(outcome, CancelOutcome::CancelRequested);
        assert!(flag.load(Ordering::SeqCst));
        assert!(reg.get(&record.execution_id).unwrap().cancel_requested);
    }

    #[test]
    fn cancel_without_handle_marks_not_cancellable() {
        let reg = registry();
        let record = reg.create("sleep 100".into(), vec![], "/tmp".into(), None, None);
        assert_eq!(reg.cancel(&record.execution_id), CancelOutcome::NotCancellable);
    }

    #[test]
    fn cancel_unknown_is_not_found() {
        let reg = registry();
        assert_eq!(reg.cancel("ghost"), CancelOutcome::NotFound);
    }

    #[test]
    fn cancel_terminal_is_already_finished() {
        let reg = registry();
        let record = reg.create("ls".into(), vec![], "/tmp".into(), None, None);
        reg.transition(&record.execution_id, ShellStatus::Failed, TransitionPatch::default()).unwrap();
        assert_eq!(reg.cancel(&record.execution_id), CancelOutcome::AlreadyFinished);
    }

    #[test]
    fn stop_for_chat_scope_cancels_only_matching() {
        let reg = registry();
        let a = reg.create("a".into(), vec![], "/tmp".into(), Some("w1".into()), Some("c1".into()));
        let b = reg.create("b".into(), vec![], "/tmp".into(), Some("w1".into()), Some("c2".into()));
        let outcomes = reg.stop_for_chat_scope("w1", "c1");
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].0, a.execution_id);
        assert_eq!(reg.get(&b.execution_id).unwrap().cancel_requested, false);
    }

    #[test]
    fn delete_rejects_non_terminal() {
        let reg = registry();
        let record = reg.create("ls".into(), vec![], "/tmp".into(), None, None);
        assert!(matches!(reg.delete(&record.execution_id), Err(RegistryError::DeleteRejected(_))));
    }

    #[test]
    fn delete_succeeds_once_terminal() {
        let reg = registry();
        let record = reg.create("ls".into(), vec![], "/tmp".into(), None, None);
        reg.transition(&record.execution_id, ShellStatus::Completed, TransitionPatch::default()).unwrap();
        reg.delete(&record.execution_id).unwrap();
        assert!(reg.get(&record.execution_id).is_none());
    }

    #[test]
    fn list_respects_world_and_active_filters() {
        let reg = registry();
        let a = reg.create("a".into(), vec![], "/tmp".into(), Some("w1".into()), None);
        let b = reg.create("b".into(), vec![], "/tmp".into(), Some("w2".into()), None);
        reg.transition(&a.execution_id, ShellStatus::Completed, TransitionPatch::default()).unwrap();

        let w1 = reg.list(&ListFilter {
            world_id: Some("w1".into()),
            ..Default::default()
        });
        assert_eq!(w1.len(), 1);
        assert_eq!(w1[0].execution_id, a.execution_id);

        let active = reg.list(&ListFilter {
            active_only: true,
            ..Default::default()
        });
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].execution_id, b.execution_id);
    }

    #[test]
    fn history_eviction_drops_oldest_terminal_only() {
        let reg = ShellProcessRegistry::new(2);
        let a = reg.create("a".into(), vec![], "/tmp".into(), None, None);
        reg.transition(&a.execution_id, ShellStatus::Completed, TransitionPatch::default()).unwrap();
        let _b = reg.create("b".into(), vec![], "/tmp".into(), None, None);
        let _c = reg.create("c".into(), vec![], "/tmp".into(), None, None);

        assert!(reg.get(&a.execution_id).is_none(), "oldest terminal record should be evicted");
        assert!(reg.get(&_b.execution_id).is_some());
        assert!(reg.get(&_c.execution_id).is_some());
    }
}
