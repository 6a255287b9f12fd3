//! State construction and background-task spawning shared by the CLI and
//! by integration tests: everything needed to boot the kernel without an
//! HTTP listener.

use std::sync::Arc;

use brain_blackboard::{Blackboard, MemoryBlackboard};
use brain_chatport::{ChatPort, UnconfiguredChat};
use brain_domain::config::{BrainConfig, ConfigSeverity};

use crate::agents::bridge::TaskBridge;
use crate::agents::registry::AgentRegistry;
use crate::broadcast::BroadcastHub;
use crate::cancel::CancelMap;
use crate::chat_sessions::ChatSessionTable;
use crate::event_lock::EventLockMap;
use crate::ports::{DeepMemory, NoopCatalog, NoopDeepMemory, NoopNotifier, Notifier, ServiceCatalog};
use crate::security::PromptGuard;
use crate::state::BrainState;
use crate::tracker::Tracker;

/// The pluggable collaborators behind the kernel's ports. The defaults give
/// a runnable but inert brain: in-process blackboard, no LLM, no catalog,
/// no memory, no notifier.
pub struct Collaborators {
    pub blackboard: Arc<dyn Blackboard>,
    pub chat: Arc<dyn ChatPort>,
    pub catalog: Arc<dyn ServiceCatalog>,
    pub deep_memory: Arc<dyn DeepMemory>,
    pub notifier: Arc<dyn Notifier>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            blackboard: Arc::new(MemoryBlackboard::new()),
            chat: Arc::new(UnconfiguredChat),
            catalog: Arc::new(NoopCatalog),
            deep_memory: Arc::new(NoopDeepMemory),
            notifier: Arc::new(NoopNotifier),
        }
    }
}

/// Validate the config, compile the security patterns, and wire up a fully
/// initialized [`BrainState`].
pub fn build_state(config: Arc<BrainConfig>, collab: Collaborators) -> anyhow::Result<BrainState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Security pre-check ───────────────────────────────────────────
    let guard = Arc::new(PromptGuard::from_patterns(
        &config.dispatch.forbidden_patterns,
    )?);

    let state = BrainState {
        config,
        blackboard: collab.blackboard,
        chat: collab.chat,
        agents: Arc::new(AgentRegistry::new()),
        bridge: Arc::new(TaskBridge::new()),
        event_locks: Arc::new(EventLockMap::new()),
        cancel_map: Arc::new(CancelMap::new()),
        tracker: Arc::new(Tracker::new()),
        sessions: Arc::new(ChatSessionTable::new()),
        broadcast: Arc::new(BroadcastHub::default()),
        guard,
        catalog: collab.catalog,
        deep_memory: collab.deep_memory,
        notifier: collab.notifier,
    };
    tracing::info!("brain state ready");
    Ok(state)
}

/// Spawn the scheduler runner and the cleanup sub-task.
pub fn spawn_background(state: &BrainState, shutdown: Arc<tokio::sync::Notify>) {
    let scheduler_state = state.clone();
    let scheduler_shutdown = shutdown.clone();
    tokio::spawn(async move {
        crate::scheduler::run(scheduler_state, scheduler_shutdown).await;
    });

    let cleanup_state = state.clone();
    tokio::spawn(async move {
        crate::scheduler::run_cleanup(cleanup_state, shutdown).await;
    });
}
