//! Event scheduler — the single background driver.
//!
//! Each pass walks every active event: Phase 1 acknowledges freshly sent
//! turns (marks them delivered), Phase 2 decides whether to hand the event
//! to the processor (unread turns, or the idle safety net), and the timeout
//! circuit breaker force-closes events past their deadline. A fixed pause
//! separates passes regardless of load.
//!
//! Processors run as independent tasks; the per-event lock and the
//! active-task gate keep a slow LLM turn from colliding with the next pass.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;

use brain_blackboard::Blackboard;
use brain_domain::event::{Event, EventStatus};
use brain_domain::{Error, Result};

use crate::broadcast::{ReadState, TurnSet};
use crate::processor;
use crate::state::BrainState;
use crate::turns::push_status;

/// Workers that have not pinged for this long are evicted by the cleanup
/// sub-task.
const AGENT_STALE_SECS: i64 = 180;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runner
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run the scan loop until shutdown. One cooperative runner per process.
pub async fn run(state: BrainState, shutdown: Arc<Notify>) {
    startup_migration(&state).await;

    let pause = Duration::from_secs(state.config.scheduler.scan_interval_secs);
    loop {
        if let Err(e) = pass(&state).await {
            tracing::warn!(error = %e, "scheduler pass failed");
        }
        tokio::select! {
            _ = shutdown.notified() => {
                tracing::info!("scheduler stopping");
                break;
            }
            _ = tokio::time::sleep(pause) => {}
        }
    }
}

/// Mark every existing turn across all active events as evaluated.
///
/// Deploying unread-scan semantics on top of pre-existing conversation data
/// would otherwise flood the processor with spurious re-processing. Running
/// it against an already-migrated store is a no-op.
pub async fn startup_migration(state: &BrainState) {
    let ids = match state.blackboard.list_active_event_ids().await {
        Ok(ids) => ids,
        Err(e) => {
            tracing::warn!(error = %e, "startup migration could not list events");
            return;
        }
    };
    let mut migrated = 0usize;
    for id in &ids {
        match state.blackboard.mark_turns_evaluated(id).await {
            Ok(n) => migrated += n,
            Err(Error::NotFound(_)) => {}
            Err(e) => tracing::warn!(event_id = %id, error = %e, "startup migration failed"),
        }
    }
    tracing::info!(
        events = ids.len(),
        turns = migrated,
        "startup migration complete"
    );
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// One pass
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One full scan over the active events.
pub async fn pass(state: &BrainState) -> Result<()> {
    let ids = state.blackboard.list_active_event_ids().await?;
    for id in ids {
        let ev = match state.blackboard.get_event(&id).await {
            Ok(ev) => ev,
            // Closed or deleted concurrently; benign.
            Err(Error::NotFound(_)) => continue,
            Err(e) => {
                tracing::warn!(event_id = %id, error = %e, "event read failed, retrying next pass");
                continue;
            }
        };
        if ev.status.is_terminal() {
            continue;
        }

        // Defer window: skip while in the future, reactivate once expired.
        if let Some(until) = ev.defer_until {
            if until > Utc::now() {
                continue;
            }
            let _ = state.blackboard.set_defer_until(&id, None).await;
            if let Err(e) = state
                .blackboard
                .set_event_status(&id, EventStatus::Active, Some(EventStatus::Deferred))
                .await
            {
                tracing::debug!(event_id = %id, error = %e, "defer expiry reactivation raced");
            }
        }

        phase_acknowledge(state, &ev).await;
        phase_evaluate(state, &ev).await;
        check_timeout(state, &ev).await;
    }
    Ok(())
}

/// Phase 1 — acknowledge: advance freshly sent turns to delivered. Runs
/// even while an agent task is in flight.
async fn phase_acknowledge(state: &BrainState, ev: &Event) {
    if !ev.has_unseen() {
        return;
    }
    let seen: Vec<u32> = ev
        .conversation
        .iter()
        .filter(|t| t.status == brain_domain::event::MessageStatus::Sent)
        .map(|t| t.turn)
        .collect();
    match state
        .blackboard
        .mark_turns_delivered(&ev.id, ev.conversation.len() as u32)
        .await
    {
        Ok(n) if n > 0 => {
            push_status(state, &ev.id, ReadState::Delivered, TurnSet::Listed(seen));
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!(event_id = %ev.id, error = %e, "mark-delivered failed");
        }
    }
}

/// Phase 2 — evaluate: hand the event to the processor when it has unread
/// turns, or when the idle safety net fires. Gated on outstanding agent
/// tasks, pending approval, and the waiting-for-user set.
async fn phase_evaluate(state: &BrainState, ev: &Event) {
    if state.tracker.has_active_task(&ev.id) {
        return;
    }
    if ev.status == EventStatus::WaitingApproval || state.tracker.is_waiting_for_user(&ev.id) {
        return;
    }

    // The snapshot predates Phase 1, so turns it saw as sent count as
    // unread here.
    let has_unread = ev.has_unseen() || ev.has_unread();
    if has_unread {
        spawn_processor(state, &ev.id);
        return;
    }

    // Idle safety net — pure state and timers, no content inspection. An
    // event with no turns yet has nothing to reassess.
    if ev.conversation.is_empty() {
        return;
    }
    let idle_limit = Duration::from_secs(state.config.scheduler.idle_reprocess_secs);
    match state.tracker.idle_for(&ev.id) {
        Some(idle) if idle >= idle_limit => {
            tracing::debug!(event_id = %ev.id, idle_secs = idle.as_secs(), "idle safety net");
            spawn_processor(state, &ev.id);
        }
        Some(_) => {}
        // Never processed since boot (migrated data): start the idle clock
        // instead of processing a flood of dormant events at once.
        None => state.tracker.touch_processed(&ev.id),
    }
}

fn spawn_processor(state: &BrainState, event_id: &str) {
    let state = state.clone();
    let event_id = event_id.to_owned();
    tokio::spawn(async move {
        processor::process_event(&state, &event_id).await;
    });
}

/// Timeout circuit breaker. The deadline extends while the most recent
/// agent-result turn is fresh: never kill an event the LLM is plausibly
/// about to evaluate.
async fn check_timeout(state: &BrainState, ev: &Event) {
    let Some(first) = ev.first_turn_at else {
        return;
    };
    let cfg = &state.config.scheduler;
    let age = (Utc::now() - first).num_seconds();

    let mut limit = cfg.max_event_duration_secs as i64;
    if let Some(last_result) = ev.last_agent_result_at() {
        if (Utc::now() - last_result).num_seconds() < cfg.grace_secs as i64 {
            limit += cfg.grace_extension_secs as i64;
        }
    }

    if age > limit {
        tracing::warn!(
            event_id = %ev.id,
            age_secs = age,
            limit_secs = limit,
            "event exceeded max duration, force-closing"
        );
        if let Err(e) = processor::close_event(state, &ev.id, "Timed out", None).await {
            tracing::warn!(event_id = %ev.id, error = %e, "force-close failed");
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cleanup sub-task
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Periodic last-ditch defense: force-close events past the hard age
/// ceiling regardless of activity, evict silent workers, and prune idle
/// lock entries.
pub async fn run_cleanup(state: BrainState, shutdown: Arc<Notify>) {
    let pause = Duration::from_secs(state.config.scheduler.cleanup_interval_secs);
    loop {
        tokio::select! {
            _ = shutdown.notified() => break,
            _ = tokio::time::sleep(pause) => {}
        }
        cleanup_pass(&state).await;
    }
}

pub async fn cleanup_pass(state: &BrainState) {
    // Runaway state machines.
    let ceiling = state.config.scheduler.hard_ceiling_secs as i64;
    if let Ok(ids) = state.blackboard.list_active_event_ids().await {
        for id in ids {
            let Ok(ev) = state.blackboard.get_event(&id).await else {
                continue;
            };
            if ev.status.is_terminal() {
                continue;
            }
            let age = (Utc::now() - ev.created_at).num_seconds();
            if age > ceiling {
                tracing::warn!(event_id = %id, age_secs = age, "hard age ceiling, force-closing");
                if let Err(e) = processor::close_event(
                    state,
                    &id,
                    "Timed out",
                    Some("exceeded hard age ceiling"),
                )
                .await
                {
                    tracing::warn!(event_id = %id, error = %e, "hard-ceiling close failed");
                }
            }
        }
    }

    // Silent workers: evict and orphan their in-flight tasks.
    for orphan in state.agents.prune_stale(AGENT_STALE_SECS) {
        state.bridge.inject_sentinel(
            &orphan.task_id,
            crate::agents::bridge::TaskMessage::Disconnected,
        );
    }

    state.event_locks.prune_idle();
}

/// Called by the ingestion layer when a user turn arrives: clears the
/// waiting-for-user pause so the next pass evaluates it.
pub fn user_turn_arrived(state: &BrainState, event_id: &str) {
    if state.tracker.clear_waiting_for_user(event_id) {
        tracing::debug!(event_id = %event_id, "user input cleared wait");
    }
}
