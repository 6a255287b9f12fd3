//! Scheduler bookkeeping: best-effort in-memory state the event loop
//! consults between blackboard reads.
//!
//! Everything here is recoverable — on restart the startup migration resets
//! derivable state, so losing this map costs at most one redundant
//! processing pass.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use brain_domain::event::AgentRole;

/// Worker-side CLI session to resume on the next dispatch for an event
/// (session affinity).
#[derive(Debug, Clone)]
pub struct SessionAffinity {
    pub agent_id: String,
    pub session_id: Option<String>,
}

#[derive(Default)]
pub struct Tracker {
    /// Events paused on `wait_for_user`; cleared when a user turn arrives.
    waiting_for_user: Mutex<HashSet<String>>,
    /// When each event was last handed to the processor.
    last_processed: Mutex<HashMap<String, Instant>>,
    /// One background bridge-awaiter per outstanding dispatch, keyed by
    /// event id.
    active_tasks: Mutex<HashMap<String, JoinHandle<()>>>,
    /// Per-event worker/session affinity, keyed by (event id, role).
    affinity: Mutex<HashMap<(String, AgentRole), SessionAffinity>>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    // ── waiting-for-user ──────────────────────────────────────────────

    pub fn set_waiting_for_user(&self, event_id: &str) {
        self.waiting_for_user.lock().insert(event_id.to_owned());
    }

    /// Called when a user turn arrives. Returns true if the event was
    /// waiting.
    pub fn clear_waiting_for_user(&self, event_id: &str) -> bool {
        self.waiting_for_user.lock().remove(event_id)
    }

    pub fn is_waiting_for_user(&self, event_id: &str) -> bool {
        self.waiting_for_user.lock().contains(event_id)
    }

    // ── last-processed ────────────────────────────────────────────────

    pub fn touch_processed(&self, event_id: &str) {
        self.last_processed
            .lock()
            .insert(event_id.to_owned(), Instant::now());
    }

    /// Time since the event was last processed. `None` means never.
    pub fn idle_for(&self, event_id: &str) -> Option<Duration> {
        self.last_processed
            .lock()
            .get(event_id)
            .map(|t| t.elapsed())
    }

    /// Test hook: pretend the event was last processed `ago` in the past.
    pub fn backdate_processed(&self, event_id: &str, ago: Duration) {
        if let Some(t) = Instant::now().checked_sub(ago) {
            self.last_processed.lock().insert(event_id.to_owned(), t);
        }
    }

    // ── active dispatch tasks ─────────────────────────────────────────

    /// Record the background awaiter for an event's outstanding dispatch.
    /// A previous finished handle is replaced; the scheduler treats a
    /// finished handle as "no active task".
    pub fn set_active_task(&self, event_id: &str, handle: JoinHandle<()>) {
        self.active_tasks.lock().insert(event_id.to_owned(), handle);
    }

    /// Whether a dispatch is still in flight for this event. Finished
    /// handles are reaped as a side effect.
    pub fn has_active_task(&self, event_id: &str) -> bool {
        let mut tasks = self.active_tasks.lock();
        match tasks.get(event_id) {
            Some(handle) if handle.is_finished() => {
                tasks.remove(event_id);
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    pub fn abort_active_task(&self, event_id: &str) {
        if let Some(handle) = self.active_tasks.lock().remove(event_id) {
            handle.abort();
        }
    }

    // ── session affinity ──────────────────────────────────────────────

    pub fn affinity_for(&self, event_id: &str, role: AgentRole) -> Option<SessionAffinity> {
        self.affinity
            .lock()
            .get(&(event_id.to_owned(), role))
            .cloned()
    }

    pub fn set_affinity(&self, event_id: &str, role: AgentRole, affinity: SessionAffinity) {
        self.affinity
            .lock()
            .insert((event_id.to_owned(), role), affinity);
    }

    // ── teardown ──────────────────────────────────────────────────────

    /// Drop all per-event state when an event closes.
    pub fn forget(&self, event_id: &str) {
        self.waiting_for_user.lock().remove(event_id);
        self.last_processed.lock().remove(event_id);
        if let Some(handle) = self.active_tasks.lock().remove(event_id) {
            if !handle.is_finished() {
                handle.abort();
            }
        }
        self.affinity
            .lock()
            .retain(|(id, _), _| id != event_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waiting_for_user_set_and_clear() {
        let tracker = Tracker::new();
        assert!(!tracker.is_waiting_for_user("e1"));

        tracker.set_waiting_for_user("e1");
        assert!(tracker.is_waiting_for_user("e1"));

        assert!(tracker.clear_waiting_for_user("e1"));
        assert!(!tracker.is_waiting_for_user("e1"));
        assert!(!tracker.clear_waiting_for_user("e1"));
    }

    #[test]
    fn idle_for_tracks_processing() {
        let tracker = Tracker::new();
        assert!(tracker.idle_for("e1").is_none());

        tracker.touch_processed("e1");
        assert!(tracker.idle_for("e1").unwrap() < Duration::from_secs(1));

        tracker.backdate_processed("e1", Duration::from_secs(600));
        assert!(tracker.idle_for("e1").unwrap() >= Duration::from_secs(600));
    }

    #[tokio::test]
    async fn finished_task_is_reaped() {
        let tracker = Tracker::new();
        let handle = tokio::spawn(async {});
        // Let the task finish.
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        tracker.set_active_task("e1", handle);
        assert!(!tracker.has_active_task("e1"));
        // Reaped: second query hits the empty map.
        assert!(!tracker.has_active_task("e1"));
    }

    #[tokio::test]
    async fn running_task_reports_active() {
        let tracker = Tracker::new();
        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        tracker.set_active_task("e1", handle);
        assert!(tracker.has_active_task("e1"));
        tracker.abort_active_task("e1");
        assert!(!tracker.has_active_task("e1"));
    }

    #[test]
    fn affinity_round_trip() {
        let tracker = Tracker::new();
        assert!(tracker.affinity_for("e1", AgentRole::Sysadmin).is_none());

        tracker.set_affinity(
            "e1",
            AgentRole::Sysadmin,
            SessionAffinity {
                agent_id: "sysadmin-1".into(),
                session_id: Some("cli-7".into()),
            },
        );
        let aff = tracker.affinity_for("e1", AgentRole::Sysadmin).unwrap();
        assert_eq!(aff.agent_id, "sysadmin-1");
        assert_eq!(aff.session_id.as_deref(), Some("cli-7"));

        // Different role has no affinity.
        assert!(tracker.affinity_for("e1", AgentRole::Developer).is_none());
    }

    #[test]
    fn forget_clears_everything() {
        let tracker = Tracker::new();
        tracker.set_waiting_for_user("e1");
        tracker.touch_processed("e1");
        tracker.set_affinity(
            "e1",
            AgentRole::Qe,
            SessionAffinity {
                agent_id: "qe-1".into(),
                session_id: None,
            },
        );

        tracker.forget("e1");
        assert!(!tracker.is_waiting_for_user("e1"));
        assert!(tracker.idle_for("e1").is_none());
        assert!(tracker.affinity_for("e1", AgentRole::Qe).is_none());
    }
}
