//! In-memory registry of connected agent workers.
//!
//! One entry per live WebSocket connection. Re-registering an agent id
//! evicts the old entry: its sink is dropped (closing the writer task) and
//! any outstanding task is reported to the caller so the bridge can inject a
//! disconnect sentinel. At most one worker is busy with a given event at any
//! instant.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;

use brain_agent_protocol::AgentMessage;
use brain_domain::event::AgentRole;

/// A message the brain can push to a connected worker's WebSocket.
pub type AgentSink = mpsc::Sender<AgentMessage>;

/// A connected worker.
pub struct ConnectedAgent {
    pub agent_id: String,
    pub role: AgentRole,
    pub busy: bool,
    pub current_event_id: Option<String>,
    pub current_task_id: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub caps: Vec<String>,
    /// Channel to the worker's WS writer task.
    pub sink: AgentSink,
}

/// Summary info returned by list endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct AgentInfo {
    pub agent_id: String,
    pub role: AgentRole,
    pub busy: bool,
    pub current_event_id: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub caps: Vec<String>,
}

/// The outstanding task of an evicted entry, returned so the caller can
/// orphan it on the bridge.
#[derive(Debug, Clone)]
pub struct EvictedTask {
    pub task_id: String,
    pub event_id: String,
}

/// Thread-safe registry of all connected workers.
#[derive(Default)]
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, ConnectedAgent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new worker connection. An existing entry with the same
    /// `agent_id` is evicted (reconnect scenario); its outstanding task, if
    /// any, is returned for orphan handling.
    pub fn register(&self, agent: ConnectedAgent) -> Option<EvictedTask> {
        let id = agent.agent_id.clone();
        let mut agents = self.agents.write();
        let evicted = agents.insert(id.clone(), agent).and_then(|old| {
            // Dropping the old entry drops its sink, which ends the old
            // writer task.
            match (old.current_task_id, old.current_event_id) {
                (Some(task_id), Some(event_id)) => Some(EvictedTask { task_id, event_id }),
                _ => None,
            }
        });
        tracing::info!(
            agent_id = %id,
            evicted_task = evicted.is_some(),
            "agent registered"
        );
        evicted
    }

    /// Remove a worker (on disconnect). Returns its outstanding task, if any.
    pub fn unregister(&self, agent_id: &str) -> Option<EvictedTask> {
        let removed = self.agents.write().remove(agent_id);
        if removed.is_some() {
            tracing::info!(agent_id = %agent_id, "agent removed");
        }
        removed.and_then(|old| match (old.current_task_id, old.current_event_id) {
            (Some(task_id), Some(event_id)) => Some(EvictedTask { task_id, event_id }),
            _ => None,
        })
    }

    /// Update the last_seen timestamp (called on pong or any message).
    pub fn touch(&self, agent_id: &str) {
        if let Some(agent) = self.agents.write().get_mut(agent_id) {
            agent.last_seen = Utc::now();
        }
    }

    /// Pick a not-busy worker of `role`. When `prefer_agent_id` names an
    /// idle worker of that role, it wins (session affinity); otherwise the
    /// lexicographically first idle worker is returned (deterministic).
    pub fn pick_available(
        &self,
        role: AgentRole,
        prefer_agent_id: Option<&str>,
    ) -> Option<(String, AgentSink)> {
        let agents = self.agents.read();

        if let Some(preferred) = prefer_agent_id {
            if let Some(agent) = agents.get(preferred) {
                if agent.role == role && !agent.busy {
                    return Some((agent.agent_id.clone(), agent.sink.clone()));
                }
            }
        }

        agents
            .values()
            .filter(|a| a.role == role && !a.busy)
            .min_by(|a, b| a.agent_id.cmp(&b.agent_id))
            .map(|a| (a.agent_id.clone(), a.sink.clone()))
    }

    /// Mark a worker busy with a task. Returns false if the worker vanished.
    pub fn mark_busy(&self, agent_id: &str, event_id: &str, task_id: &str) -> bool {
        let mut agents = self.agents.write();
        match agents.get_mut(agent_id) {
            Some(agent) => {
                agent.busy = true;
                agent.current_event_id = Some(event_id.to_owned());
                agent.current_task_id = Some(task_id.to_owned());
                true
            }
            None => false,
        }
    }

    pub fn mark_idle(&self, agent_id: &str) {
        if let Some(agent) = self.agents.write().get_mut(agent_id) {
            agent.busy = false;
            agent.current_event_id = None;
            agent.current_task_id = None;
        }
    }

    /// The worker currently working a given event, if any (affinity).
    pub fn get_by_event(&self, event_id: &str) -> Option<AgentInfo> {
        self.agents
            .read()
            .values()
            .find(|a| a.current_event_id.as_deref() == Some(event_id))
            .map(AgentInfo::from)
    }

    pub fn get_sink(&self, agent_id: &str) -> Option<AgentSink> {
        self.agents.read().get(agent_id).map(|a| a.sink.clone())
    }

    pub fn list(&self) -> Vec<AgentInfo> {
        self.agents.read().values().map(AgentInfo::from).collect()
    }

    pub fn len(&self) -> usize {
        self.agents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.read().is_empty()
    }

    /// Remove workers not seen for longer than `timeout_secs`. Returns the
    /// orphaned tasks of the pruned entries.
    pub fn prune_stale(&self, timeout_secs: i64) -> Vec<EvictedTask> {
        let now = Utc::now();
        let mut agents = self.agents.write();
        let mut orphans = Vec::new();
        agents.retain(|_, a| {
            let age = now.signed_duration_since(a.last_seen).num_seconds();
            if age < timeout_secs {
                return true;
            }
            if let (Some(task_id), Some(event_id)) =
                (a.current_task_id.clone(), a.current_event_id.clone())
            {
                orphans.push(EvictedTask { task_id, event_id });
            }
            false
        });
        if !orphans.is_empty() {
            tracing::warn!(orphaned = orphans.len(), "pruned stale agents with tasks");
        }
        orphans
    }
}

impl From<&ConnectedAgent> for AgentInfo {
    fn from(a: &ConnectedAgent) -> Self {
        Self {
            agent_id: a.agent_id.clone(),
            role: a.role,
            busy: a.busy,
            current_event_id: a.current_event_id.clone(),
            connected_at: a.connected_at,
            last_seen: a.last_seen,
            caps: a.caps.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_agent(id: &str, role: AgentRole) -> (ConnectedAgent, mpsc::Receiver<AgentMessage>) {
        let (tx, rx) = mpsc::channel(8);
        (
            ConnectedAgent {
                agent_id: id.into(),
                role,
                busy: false,
                current_event_id: None,
                current_task_id: None,
                connected_at: Utc::now(),
                last_seen: Utc::now(),
                caps: vec![],
                sink: tx,
            },
            rx,
        )
    }

    #[test]
    fn pick_matches_role_only() {
        let reg = AgentRegistry::new();
        let (a, _rx) = make_agent("sys-1", AgentRole::Sysadmin);
        reg.register(a);

        assert!(reg.pick_available(AgentRole::Sysadmin, None).is_some());
        assert!(reg.pick_available(AgentRole::Developer, None).is_none());
    }

    #[test]
    fn pick_skips_busy_workers() {
        let reg = AgentRegistry::new();
        let (a, _rx) = make_agent("sys-1", AgentRole::Sysadmin);
        reg.register(a);
        assert!(reg.mark_busy("sys-1", "e1", "t1"));

        assert!(reg.pick_available(AgentRole::Sysadmin, None).is_none());

        reg.mark_idle("sys-1");
        assert!(reg.pick_available(AgentRole::Sysadmin, None).is_some());
    }

    #[test]
    fn pick_is_deterministic_lexicographic() {
        let reg = AgentRegistry::new();
        let (z, _rz) = make_agent("zeta", AgentRole::Qe);
        let (a, _ra) = make_agent("alpha", AgentRole::Qe);
        reg.register(z);
        reg.register(a);

        let (picked, _) = reg.pick_available(AgentRole::Qe, None).unwrap();
        assert_eq!(picked, "alpha");
    }

    #[test]
    fn affinity_prefers_named_idle_worker() {
        let reg = AgentRegistry::new();
        let (a, _ra) = make_agent("alpha", AgentRole::Qe);
        let (z, _rz) = make_agent("zeta", AgentRole::Qe);
        reg.register(a);
        reg.register(z);

        let (picked, _) = reg.pick_available(AgentRole::Qe, Some("zeta")).unwrap();
        assert_eq!(picked, "zeta");

        // Busy preferred worker falls back to lexicographic choice.
        reg.mark_busy("zeta", "e1", "t1");
        let (picked, _) = reg.pick_available(AgentRole::Qe, Some("zeta")).unwrap();
        assert_eq!(picked, "alpha");
    }

    #[test]
    fn register_evicts_and_reports_outstanding_task() {
        let reg = AgentRegistry::new();
        let (old, _old_rx) = make_agent("sys-1", AgentRole::Sysadmin);
        assert!(reg.register(old).is_none());
        reg.mark_busy("sys-1", "e1", "t1");

        let (new, _new_rx) = make_agent("sys-1", AgentRole::Sysadmin);
        let evicted = reg.register(new).unwrap();
        assert_eq!(evicted.task_id, "t1");
        assert_eq!(evicted.event_id, "e1");
        assert_eq!(reg.len(), 1);

        // The replacement entry starts idle.
        assert!(reg.pick_available(AgentRole::Sysadmin, None).is_some());
    }

    #[test]
    fn unregister_reports_outstanding_task() {
        let reg = AgentRegistry::new();
        let (a, _rx) = make_agent("dev-1", AgentRole::Developer);
        reg.register(a);
        reg.mark_busy("dev-1", "e2", "t2");

        let evicted = reg.unregister("dev-1").unwrap();
        assert_eq!(evicted.event_id, "e2");
        assert!(reg.is_empty());

        // Idle workers evict without an orphan.
        let (b, _rx2) = make_agent("dev-2", AgentRole::Developer);
        reg.register(b);
        assert!(reg.unregister("dev-2").is_none());
    }

    #[test]
    fn get_by_event_finds_busy_worker() {
        let reg = AgentRegistry::new();
        let (a, _rx) = make_agent("sys-1", AgentRole::Sysadmin);
        reg.register(a);
        reg.mark_busy("sys-1", "e1", "t1");

        let info = reg.get_by_event("e1").unwrap();
        assert_eq!(info.agent_id, "sys-1");
        assert!(info.busy);
        assert!(reg.get_by_event("other").is_none());
    }

    #[test]
    fn prune_stale_returns_orphans() {
        let reg = AgentRegistry::new();
        let (mut a, _rx) = make_agent("sys-1", AgentRole::Sysadmin);
        a.last_seen = Utc::now() - chrono::Duration::seconds(300);
        reg.register(a);
        reg.mark_busy("sys-1", "e1", "t1");
        // mark_busy does not touch last_seen, so the entry is stale.
        let orphans = reg.prune_stale(120);
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].task_id, "t1");
        assert!(reg.is_empty());
    }

    #[test]
    fn touch_refreshes_last_seen() {
        let reg = AgentRegistry::new();
        let (mut a, _rx) = make_agent("sys-1", AgentRole::Sysadmin);
        a.last_seen = Utc::now() - chrono::Duration::seconds(300);
        reg.register(a);

        reg.touch("sys-1");
        assert!(reg.prune_stale(120).is_empty());
        assert_eq!(reg.len(), 1);
    }
}
