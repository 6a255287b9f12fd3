//! End-to-end kernel scenarios: scripted LLM, fake workers, real scheduler
//! passes against the in-process blackboard.

mod support;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;

use brain_agent_protocol::AgentMessage;
use brain_core::agents::ws::handle_inbound;
use brain_core::{functions, processor, scheduler};
use brain_domain::event::{Actor, AgentRole, EventStatus, MessageStatus, Turn};

use support::*;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 1. Happy path — anomaly to close
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn happy_path_anomaly_to_close() {
    let chat = Arc::new(ScriptedChat::new());
    // Tick 1: the LLM routes to a sysadmin.
    chat.push_script(vec![
        text("ingest is saturated, asking sysadmin to investigate"),
        call(
            "select_agent",
            json!({"role": "sysadmin", "task": "investigate the cpu spike on ingest", "mode": "investigate"}),
        ),
        done(),
    ]);
    chat.push_script(vec![done()]); // ack of the dispatch tool result
    // Tick 2: the LLM closes the event.
    chat.push_script(vec![
        call("close_event", json!({"summary": "resolved: ingest scaled up"})),
        done(),
    ]);
    chat.push_script(vec![done()]); // ack of the close tool result

    let state = test_state(chat.clone());
    let mut worker = connect_worker(&state, "sysadmin-1", AgentRole::Sysadmin);
    let id = seed_event(&state).await;

    // Tick 1: observation delivered, processor routes to the worker.
    scheduler::pass(&state).await.unwrap();
    let (task_id, event_id) = expect_task(&mut worker).await;
    assert_eq!(event_id, id);

    // The worker progresses and completes.
    handle_inbound(
        &state,
        "sysadmin-1",
        AgentMessage::Progress {
            task_id: task_id.clone(),
            event_id: id.clone(),
            message: "listing pods".into(),
            source: None,
        },
    )
    .await;
    handle_inbound(
        &state,
        "sysadmin-1",
        AgentMessage::Result {
            task_id,
            event_id: id.clone(),
            session_id: Some("cli-session-1".into()),
            status: brain_agent_protocol::ResultStatus::Success,
            output: "ingest pods were CPU-throttled; scaled to 6 replicas".into(),
            source: "claude".into(),
        },
    )
    .await;

    // Wait for the awaiter to finish its bookkeeping: the result turn is
    // appended and the worker released.
    wait_until(|| async {
        let ev = state.blackboard.get_event(&id).await.unwrap();
        ev.conversation.iter().any(|t| t.action == "investigate")
            && !state.agents.list()[0].busy
    })
    .await;

    let ev = state.blackboard.get_event(&id).await.unwrap();
    let actions: Vec<&str> = ev.conversation.iter().map(|t| t.action.as_str()).collect();
    assert_eq!(actions, vec!["observation", "route", "progress", "investigate"]);
    // The routing turn reached evaluated through the agent's receipt path.
    assert_eq!(ev.conversation[1].status, MessageStatus::Evaluated);

    // Tick 2 onwards: fresh turns delivered and evaluated; the LLM closes.
    wait_until(|| async {
        scheduler::pass(&state).await.unwrap();
        state.blackboard.get_event(&id).await.unwrap().status == EventStatus::Closed
    })
    .await;

    let ev = state.blackboard.get_event(&id).await.unwrap();
    assert_eq!(ev.conversation.len(), 5);
    assert_eq!(ev.conversation[4].action, "close");
    assert!(ev
        .conversation
        .iter()
        .all(|t| t.status == MessageStatus::Evaluated));
    assert_eq!(chat.send_count(), 2);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 2. Tight-spin guard
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn settled_events_cause_no_processing() {
    let chat = Arc::new(ScriptedChat::new());
    let state = test_state(chat.clone());

    for _ in 0..100 {
        let id = seed_event(&state).await;
        state.blackboard.mark_turns_evaluated(&id).await.unwrap();
        state.tracker.touch_processed(&id);
    }

    for _ in 0..3 {
        scheduler::pass(&state).await.unwrap();
    }
    // Nothing unread, nobody idle long enough: the LLM is never consulted.
    assert_eq!(chat.send_count(), 0);
    assert_eq!(chat.generate_count(), 0);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 3. Grace period
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn aged_event(
    state: &brain_core::state::BrainState,
    age_secs: i64,
    result_age_secs: i64,
) -> String {
    let id = seed_event(state).await;
    // Rewrite timestamps: first turn far in the past, a recent agent result.
    state
        .blackboard
        .atomic_update(&id, &move |ev| {
            let first = Utc::now() - chrono::Duration::seconds(age_secs);
            ev.first_turn_at = Some(first);
            ev.conversation[0].timestamp = first;
            Ok(())
        })
        .await
        .unwrap();
    let mut result = Turn::new(Actor::Sysadmin, "execute");
    result.result = Some("restarted the deployment".into());
    result.timestamp = Utc::now() - chrono::Duration::seconds(result_age_secs);
    state.blackboard.append_turn(&id, result).await.unwrap();
    state.blackboard.mark_turns_evaluated(&id).await.unwrap();
    state.tracker.touch_processed(&id);
    id
}

#[tokio::test]
async fn recent_agent_result_grants_grace() {
    let chat = Arc::new(ScriptedChat::new());
    let state = test_state(chat);

    // 2800s old (past the 2700s ceiling) but an agent result 30s ago:
    // within grace, the extension holds the event open.
    let graced = aged_event(&state, 2800, 30).await;
    // Same age profile but the result is 210s old: no grace, force-closed.
    let expired = aged_event(&state, 2980, 210).await;

    scheduler::pass(&state).await.unwrap();

    let ev = state.blackboard.get_event(&graced).await.unwrap();
    assert_ne!(ev.status, EventStatus::Closed);

    let ev = state.blackboard.get_event(&expired).await.unwrap();
    assert_eq!(ev.status, EventStatus::Closed);
    let close = ev.conversation.last().unwrap();
    assert_eq!(close.action, "close");
    assert_eq!(close.thoughts.as_deref(), Some("Timed out"));
}

#[tokio::test]
async fn event_over_ceiling_without_grace_is_closed() {
    let chat = Arc::new(ScriptedChat::new());
    let state = test_state(chat);

    // Exactly over the ceiling, no agent result at all.
    let id = seed_event(&state).await;
    state
        .blackboard
        .atomic_update(&id, &|ev| {
            ev.first_turn_at = Some(Utc::now() - chrono::Duration::seconds(2701));
            Ok(())
        })
        .await
        .unwrap();
    state.blackboard.mark_turns_evaluated(&id).await.unwrap();
    state.tracker.touch_processed(&id);

    scheduler::pass(&state).await.unwrap();
    let ev = state.blackboard.get_event(&id).await.unwrap();
    assert_eq!(ev.status, EventStatus::Closed);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 4. Retryable error defers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn retryable_agent_error_defers_event() {
    let chat = Arc::new(ScriptedChat::new());
    chat.push_script(vec![call(
        "select_agent",
        json!({"role": "sysadmin", "task": "restart the ingest workers"}),
    )]);
    chat.push_script(vec![done()]);

    let state = test_state(chat.clone());
    let mut worker = connect_worker(&state, "sysadmin-1", AgentRole::Sysadmin);
    let id = seed_event(&state).await;

    scheduler::pass(&state).await.unwrap();
    let (task_id, _) = expect_task(&mut worker).await;

    handle_inbound(
        &state,
        "sysadmin-1",
        AgentMessage::Error {
            task_id,
            event_id: id.clone(),
            message: "rate limited (429)".into(),
            retryable: true,
        },
    )
    .await;

    wait_until(|| async {
        state.blackboard.get_event(&id).await.unwrap().status == EventStatus::Deferred
    })
    .await;

    let ev = state.blackboard.get_event(&id).await.unwrap();
    assert!(ev.defer_until.is_some());
    let defer = ev
        .conversation
        .iter()
        .find(|t| t.action == "defer")
        .expect("defer turn");
    assert!(defer.thoughts.as_deref().unwrap().contains("retryable"));
    let window = (ev.defer_until.unwrap() - Utc::now()).num_seconds();
    assert!((250..=310).contains(&window), "defer window was {window}s");

    // While deferred, passes neither consult the LLM nor re-dispatch.
    for _ in 0..3 {
        scheduler::pass(&state).await.unwrap();
    }
    assert_eq!(chat.send_count(), 1);
    assert!(worker.try_recv().is_err(), "unexpected re-dispatch");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 5. Wait-for-user blocks the idle safety net
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn wait_for_user_blocks_idle_safety_net() {
    let chat = Arc::new(ScriptedChat::new());
    chat.push_script(vec![call(
        "wait_for_user",
        json!({"summary": "need confirmation before scaling"}),
    )]);
    chat.push_script(vec![done()]);

    let state = test_state(chat.clone());
    let id = seed_event(&state).await;

    scheduler::pass(&state).await.unwrap();
    wait_until(|| async { state.tracker.is_waiting_for_user(&id) }).await;
    assert_eq!(chat.send_count(), 1);

    // Ten minutes of idleness would normally trip the safety net.
    state
        .tracker
        .backdate_processed(&id, Duration::from_secs(600));
    for _ in 0..3 {
        scheduler::pass(&state).await.unwrap();
    }
    assert_eq!(chat.send_count(), 1, "safety net fired while waiting for user");

    // A user message clears the wait; the next tick processes normally.
    chat.push_script(vec![text("noted, proceeding"), done()]);
    let mut turn = Turn::new(Actor::User, "message");
    turn.result = Some("go ahead".into());
    state.blackboard.append_turn(&id, turn).await.unwrap();
    scheduler::user_turn_arrived(&state, &id);

    scheduler::pass(&state).await.unwrap();
    wait_until(|| async {
        let ev = state.blackboard.get_event(&id).await.unwrap();
        ev.conversation.iter().any(|t| t.action == "think")
    })
    .await;

    assert_eq!(chat.send_count(), 2);
    let ev = state.blackboard.get_event(&id).await.unwrap();
    let think = ev
        .conversation
        .iter()
        .find(|t| t.action == "think")
        .expect("think turn");
    assert_eq!(think.thoughts.as_deref(), Some("noted, proceeding"));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Approval gate
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn approval_gate_pauses_until_user_decides() {
    use axum::extract::{Path, State};
    use axum::Json;
    use brain_core::api::events::{resolve_approval, ApprovalRequest};

    let chat = Arc::new(ScriptedChat::new());
    chat.push_script(vec![call(
        "request_user_approval",
        json!({"question": "scale ingest to 10 replicas?", "context": "cpu pegged"}),
    )]);
    chat.push_script(vec![done()]);

    let state = test_state(chat.clone());
    let id = seed_event(&state).await;

    scheduler::pass(&state).await.unwrap();
    wait_until(|| async {
        state.blackboard.get_event(&id).await.unwrap().status == EventStatus::WaitingApproval
    })
    .await;

    let ev = state.blackboard.get_event(&id).await.unwrap();
    let wait = ev
        .conversation
        .iter()
        .find(|t| t.action == "wait")
        .expect("wait turn");
    assert!(wait.pending_approval);
    assert_eq!(wait.waiting_for, Some(Actor::User));

    // While waiting, passes do not touch the LLM.
    for _ in 0..3 {
        scheduler::pass(&state).await.unwrap();
    }
    assert_eq!(chat.send_count(), 1);

    // The user approves: the event reactivates and the decision turn is
    // evaluated on the next pass.
    chat.push_script(vec![text("proceeding with the scale-up"), done()]);
    let _ = resolve_approval(
        State(state.clone()),
        Path(id.clone()),
        Json(ApprovalRequest {
            approve: true,
            comment: Some("go".into()),
        }),
    )
    .await;

    let ev = state.blackboard.get_event(&id).await.unwrap();
    assert_eq!(ev.status, EventStatus::Active);
    assert!(ev.conversation.iter().any(|t| t.action == "approve"));

    scheduler::pass(&state).await.unwrap();
    wait_until(|| async { chat.send_count() == 2 }).await;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 6. Dedup of aligner confirms
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn aligner_confirm_dedup() {
    let chat = Arc::new(ScriptedChat::new());
    let state = test_state(chat);
    let id = seed_event(&state).await;

    let first = functions::append_aligner_confirm(&state, &id, "re-check the latency")
        .await
        .unwrap();
    assert_eq!(first, Some(2));

    // The prior confirm is still unevaluated: suppressed.
    let second = functions::append_aligner_confirm(&state, &id, "re-check again")
        .await
        .unwrap();
    assert_eq!(second, None);

    // Once the processor has evaluated it, a new confirm goes through.
    state.blackboard.mark_turns_evaluated(&id).await.unwrap();
    let third = functions::append_aligner_confirm(&state, &id, "verify the fix held")
        .await
        .unwrap();
    assert_eq!(third, Some(3));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Boundary behaviors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn event_with_no_turns_is_left_alone() {
    let chat = Arc::new(ScriptedChat::new());
    let state = test_state(chat.clone());

    let ev = brain_domain::event::Event::new(
        brain_domain::event::EventSource::ExternalApi,
        None,
        brain_domain::event::EventInput {
            reason: "placeholder".into(),
            severity: Default::default(),
            domain_hint: None,
            evidence: None,
            created_at: Utc::now(),
        },
    );
    let id = ev.id.clone();
    state.blackboard.create_event(ev).await.unwrap();
    state
        .tracker
        .backdate_processed(&id, Duration::from_secs(600));

    for _ in 0..3 {
        scheduler::pass(&state).await.unwrap();
    }
    // No turns: nothing to scan, and the idle safety net must not fire.
    assert_eq!(chat.send_count(), 0);
    let ev = state.blackboard.get_event(&id).await.unwrap();
    assert_ne!(ev.status, EventStatus::Closed);
}

#[tokio::test]
async fn tool_chain_cap_ends_pass_without_closing() {
    let chat = Arc::new(ScriptedChat::new());
    // First send: thinking text plus the first of an endless lookup chain.
    chat.push_script(vec![
        text("enumerating services"),
        call("lookup_service", json!({"name": "ingest-0"})),
    ]);
    // Seven more chained lookups (chain cap is 8)...
    for i in 1..8 {
        chat.push_script(vec![call("lookup_service", json!({"name": format!("ingest-{i}")}))]);
    }
    // ...and the ack stream of the final, cap-hitting report.
    chat.push_script(vec![done()]);

    let state = test_state(chat.clone());
    let id = seed_event(&state).await;

    scheduler::pass(&state).await.unwrap();
    wait_until(|| async { chat.report_count() == 8 }).await;
    wait_until(|| async { !state.event_locks.is_locked(&id) }).await;

    let ev = state.blackboard.get_event(&id).await.unwrap();
    // Lookups append no turns; the accumulated text lands as brain/think.
    assert_ne!(ev.status, EventStatus::Closed);
    assert_eq!(ev.conversation.len(), 2);
    assert_eq!(ev.conversation[1].action, "think");
    assert_eq!(
        ev.conversation[1].thoughts.as_deref(),
        Some("enumerating services")
    );
    assert!(ev
        .conversation
        .iter()
        .all(|t| t.status == MessageStatus::Evaluated));
}

#[tokio::test]
async fn cancellation_mid_dispatch_freezes_receipts() {
    let chat = Arc::new(ScriptedChat::new());
    chat.push_script(vec![call(
        "select_agent",
        json!({"role": "sysadmin", "task": "drain the node"}),
    )]);
    chat.push_script(vec![done()]);

    let state = test_state(chat);
    let mut worker = connect_worker(&state, "sysadmin-1", AgentRole::Sysadmin);
    let id = seed_event(&state).await;

    scheduler::pass(&state).await.unwrap();
    let (task_id, _) = expect_task(&mut worker).await;

    handle_inbound(
        &state,
        "sysadmin-1",
        AgentMessage::Progress {
            task_id,
            event_id: id.clone(),
            message: "cordoning".into(),
            source: None,
        },
    )
    .await;
    wait_until(|| async {
        state.blackboard.get_event(&id).await.unwrap().conversation[1].status
            == MessageStatus::Delivered
    })
    .await;

    assert!(processor::cancel(&state, &id));
    // The awaiter sees the cancelled sentinel and releases the worker.
    wait_until(|| async { !state.agents.list()[0].busy }).await;

    let ev = state.blackboard.get_event(&id).await.unwrap();
    // The routing turn never reached evaluated: the bridge saw no result.
    assert_eq!(ev.conversation[1].action, "route");
    assert_eq!(ev.conversation[1].status, MessageStatus::Delivered);
    assert!(!ev.conversation.iter().any(|t| t.action == "execute"));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Startup migration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn startup_migration_is_idempotent() {
    let chat = Arc::new(ScriptedChat::new());
    let state = test_state(chat.clone());
    let id = seed_event(&state).await;

    scheduler::startup_migration(&state).await;
    let ev = state.blackboard.get_event(&id).await.unwrap();
    assert!(ev
        .conversation
        .iter()
        .all(|t| t.status == MessageStatus::Evaluated));

    // Second run changes nothing and later passes stay quiet.
    scheduler::startup_migration(&state).await;
    state.tracker.touch_processed(&id);
    scheduler::pass(&state).await.unwrap();
    assert_eq!(chat.send_count(), 0);
}
