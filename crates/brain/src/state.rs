//! Shared application state passed to the scheduler, processor, dispatcher,
//! and API handlers.

use std::sync::Arc;

use brain_blackboard::Blackboard;
use brain_chatport::ChatPort;
use brain_domain::config::BrainConfig;

use crate::agents::bridge::TaskBridge;
use crate::agents::registry::AgentRegistry;
use crate::broadcast::BroadcastHub;
use crate::cancel::CancelMap;
use crate::chat_sessions::ChatSessionTable;
use crate::event_lock::EventLockMap;
use crate::ports::{DeepMemory, Notifier, ServiceCatalog};
use crate::security::PromptGuard;
use crate::tracker::Tracker;

/// Everything the kernel shares. Cheap to clone; every field is an Arc.
///
/// Fields are grouped by concern:
/// - **Core** — config, blackboard, chat port
/// - **Workers** — registry, bridge
/// - **Scheduling** — per-event locks, cancel tokens, bookkeeping
/// - **Output** — broadcast hub
/// - **Collaborators** — service catalog, deep memory, notifier
#[derive(Clone)]
pub struct BrainState {
    // ── Core ──────────────────────────────────────────────────────────
    pub config: Arc<BrainConfig>,
    pub blackboard: Arc<dyn Blackboard>,
    pub chat: Arc<dyn ChatPort>,

    // ── Workers ───────────────────────────────────────────────────────
    pub agents: Arc<AgentRegistry>,
    pub bridge: Arc<TaskBridge>,

    // ── Scheduling ────────────────────────────────────────────────────
    pub event_locks: Arc<EventLockMap>,
    pub cancel_map: Arc<CancelMap>,
    pub tracker: Arc<Tracker>,
    pub sessions: Arc<ChatSessionTable>,

    // ── Output ────────────────────────────────────────────────────────
    pub broadcast: Arc<BroadcastHub>,

    // ── Security (startup-computed) ───────────────────────────────────
    /// Precompiled forbidden-pattern set for the dispatch pre-check.
    pub guard: Arc<PromptGuard>,

    // ── Collaborators ─────────────────────────────────────────────────
    pub catalog: Arc<dyn ServiceCatalog>,
    pub deep_memory: Arc<dyn DeepMemory>,
    pub notifier: Arc<dyn Notifier>,
}
