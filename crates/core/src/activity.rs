//! Activity tracker (spec §4.9, component C9): a per-world
//! pending-operation counter with processing/idle transition events.
//!
//! Built on `relaycore_domain::world::ActivityState`/`WorldActivityEvent`:
//! a busy-guard pattern where a counter bumps on entry and releases on
//! drop/closure-call, driving a single processing/idle signal shared by
//! every caller.

use parking_lot::Mutex;

use relaycore_domain::world::{ActivityChange, ActivityLevel, ActivityState, WorldActivityEvent};

/// Tracks pending operations for one world and produces the events
/// `beginWorldActivity` emits on start/end transitions.
pub struct ActivityTracker {
    world_id: String,
    state: Mutex<ActivityState>,
}

impl ActivityTracker {
    pub fn new(world_id: impl Into<String>) -> Self {
        Self {
            world_id: world_id.into(),
            state: Mutex::new(ActivityState::default()),
        }
    }

    pub fn is_processing(&self) -> bool {
        self.state.lock().pending_operations > 0
    }

    /// `beginWorldActivity(world, source?)`: increments pending, bumps
    /// the activity id on a 0→1 transition, and returns the `start`
    /// event plus a guard whose `release()` produces the matching
    /// `end`/still-`processing` event. Calling `release()` more than
    /// once is a no-op (idempotent, matching spec).
    pub fn begin(&self, source: Option<&str>) -> (WorldActivityEvent, ActivityGuard<'_>) {
        let event = {
            let mut state = self.state.lock();
            state.pending_operations += 1;
            if state.pending_operations == 1 {
                state.last_activity_id += 1;
            }
            if let Some(source) = source {
                *state.active_sources.entry(source.to_string()).or_insert(0) += 1;
            }
            WorldActivityEvent {
                world_id: self.world_id.clone(),
                change: ActivityChange::Start,
                state: ActivityLevel::Processing,
                activity_id: state.last_activity_id,
                pending_operations: state.pending_operations,
                source: source.map(|s| s.to_string()),
            }
        };
        (
            event,
            ActivityGuard {
                tracker: self,
                source: source.map(|s| s.to_string()),
                released: false,
            },
        )
    }

    fn release(&self, source: Option<&str>) -> WorldActivityEvent {
        let mut state = self.state.lock();
        state.pending_operations = state.pending_operations.saturating_sub(1);
        if let Some(source) = source {
            if let Some(count) = state.active_sources.get_mut(source) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    state.active_sources.remove(source);
                }
            }
        }
        let level = if state.pending_operations == 0 { ActivityLevel::Idle } else { ActivityLevel::Processing };
        let change = if state.pending_operations == 0 { ActivityChange::End } else { ActivityChange::Start };
        WorldActivityEvent {
            world_id: self.world_id.clone(),
            change,
            state: level,
            activity_id: state.last_activity_id,
            pending_operations: state.pending_operations,
            source: source.map(|s| s.to_string()),
        }
    }
}

/// Returned by [`ActivityTracker::begin`]. Holds the borrow so
/// `release()` can only be called against the tracker that issued it.
pub struct ActivityGuard<'a> {
    tracker: &'a ActivityTracker,
    source: Option<String>,
    released: bool,
}

impl ActivityGuard<'_> {
    pub fn release(&mut self) -> Option<WorldActivityEvent> {
        if self.released {
            return None;
        }
        self.released = true;
        Some(self.tracker.release(self.source.as_deref()))
    }
}

impl Drop for ActivityGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            self.tracker.release(self.source.as_deref());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_bumps_activity_id_on_zero_to_one_transition() {
        let tracker = ActivityTracker::new("w1");
        let (event, _guard) = tracker.begin(Some("llm"));
        assert_eq!(event.activity_id, 1);
        assert_eq!(event.pending_operations, 1);
        assert!(matches!(event.change, ActivityChange::Start));
        assert!(tracker.is_processing());
    }

    #[test]
    fn second_begin_does_not_bump_activity_id() {
        let tracker = ActivityTracker::new("w1");
        let (_e1, _g1) = tracker.begin(None);
        let (e2, _g2) = tracker.begin(None);
        assert_eq!(e2.activity_id, 1);
        assert_eq!(e2.pending_operations, 2);
    }

    #[test]
    fn release_to_zero_emits_idle() {
        let tracker = ActivityTracker::new("w1");
        let (_event, mut guard) = tracker.begin(None);
        let released = guard.release().unwrap();
        assert!(matches!(released.state, ActivityLevel::Idle));
        assert_eq!(released.pending_operations, 0);
        assert!(!tracker.is_processing());
    }

    #[test]
    fn release_above_zero_stays_processing() {
        let tracker = ActivityTracker::new("w1");
        let (_e1, mut g1) = tracker.begin(None);
        let (_e2, _g2) = tracker.begin(None);
        let released = g1.release().unwrap();
        assert!(matches!(released.state, ActivityLevel::Processing));
        assert_eq!(released.pending_operations, 1);
    }

    #[test]
    fn release_is_idempotent() {
        let tracker = ActivityTracker::new("w1");
        let (_event, mut guard) = tracker.begin(None);
        assert!(guard.release().is_some());
        assert!(guard.release().is_none());
        assert!(!tracker.is_processing());
    }

    #[test]
    fn drop_without_explicit_release_still_releases() {
        let tracker = ActivityTracker::new("w1");
        {
            let (_event, _guard) = tracker.begin(None);
            assert!(tracker.is_processing());
        }
        assert!(!tracker.is_processing());
    }
}
