//! Event processor — drives one LLM turn for one event under the per-event
//! lock.
//!
//! The pass: obtain or create the event's chat session, send the delta of
//! turns appended since the previous send, consume the stream, dispatch
//! function calls (up to the tool-chain cap), then mark every turn
//! evaluated. Stream failures discard the session and fall back to a
//! one-shot stateless completion; a second failure defers the event.
//!
//! The processor never raises out of its top-level call: every error becomes
//! a tool result fed back to the LLM, a turn, or a deferral.

use chrono::Utc;
use futures_util::StreamExt;

use brain_agent_protocol::AgentMessage;
use brain_blackboard::Blackboard;
use brain_chatport::{ChatParams, ChatPort, Chunk};
use brain_domain::event::{Actor, Event, EventStatus, Turn};
use brain_domain::{Error, Result};

use crate::broadcast::{BroadcastSink, PushMessage, ReadState, TurnSet};
use crate::cancel::CancelToken;
use crate::dispatch::PreparedDispatch;
use crate::functions::{self, BrainFunction, FunctionOutcome};
use crate::state::BrainState;
use crate::turns::{append_and_push, push_status};

const SYSTEM_PROMPT: &str = "You are the Brain of an autonomous cloud-ops \
orchestrator. You are given an event and its conversation; decide the next \
step by calling exactly one of your functions, or think in text.";

/// How a processing pass ended.
enum PassEnd {
    /// Pass finished; turns below `evaluate_below` (all of them when
    /// `None`) are marked evaluated. The bound excludes the routing turn
    /// of a dispatch started this pass — that turn's receipt belongs to
    /// the agent round-trip.
    Completed { evaluate_below: Option<u32> },
    Cancelled,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entry point
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run one processing pass for an event. Returns `false` without doing
/// anything when another pass already holds the event lock, the event is
/// gone, or it is closed.
pub async fn process_event(state: &BrainState, event_id: &str) -> bool {
    let Some(_permit) = state.event_locks.try_acquire(event_id) else {
        return false;
    };

    // Re-read under the lock: the event may have closed since the caller
    // looked.
    let ev = match state.blackboard.get_event(event_id).await {
        Ok(ev) => ev,
        Err(Error::NotFound(_)) => return false,
        Err(e) => {
            tracing::warn!(event_id = %event_id, error = %e, "event read failed, skipping pass");
            return false;
        }
    };
    if ev.status.is_terminal() {
        return false;
    }

    state.tracker.touch_processed(event_id);

    if ev.status == EventStatus::New {
        // First touch activates the event; benign if something else won.
        if let Err(e) = state
            .blackboard
            .set_event_status(event_id, EventStatus::Active, Some(EventStatus::New))
            .await
        {
            tracing::debug!(event_id = %event_id, error = %e, "activation raced");
        }
    }

    let token = state.cancel_map.register(event_id);
    let end = run_llm_turn(state, event_id, &token).await;
    state.cancel_map.remove(event_id);

    match end {
        PassEnd::Completed { evaluate_below } => {
            // Everything the LLM saw (and produced) is now evaluated.
            let result = match evaluate_below {
                None => state.blackboard.mark_turns_evaluated(event_id).await,
                Some(below) => evaluate_turns_below(state, event_id, below).await,
            };
            match result {
                Ok(n) if n > 0 => {
                    let turns = match evaluate_below {
                        None => TurnSet::All,
                        Some(below) => TurnSet::Listed((1..below).collect()),
                    };
                    push_status(state, event_id, ReadState::Evaluated, turns);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(event_id = %event_id, error = %e, "evaluate-all failed");
                }
            }
        }
        PassEnd::Cancelled => {
            tracing::info!(event_id = %event_id, "processing pass cancelled");
        }
    }
    true
}

/// Evaluate every turn numbered below `below`, leaving the in-flight
/// dispatch's turns to their own receipt path.
async fn evaluate_turns_below(state: &BrainState, event_id: &str, below: u32) -> Result<usize> {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use brain_domain::event::MessageStatus;

    let advanced = Arc::new(AtomicUsize::new(0));
    let slot = advanced.clone();
    state
        .blackboard
        .atomic_update(event_id, &move |ev| {
            let mut n = 0;
            for t in ev.conversation.iter_mut().filter(|t| t.turn < below) {
                if t.status != MessageStatus::Evaluated {
                    t.status = MessageStatus::Evaluated;
                    n += 1;
                }
            }
            slot.store(n, Ordering::SeqCst);
            Ok(())
        })
        .await?;
    Ok(advanced.load(Ordering::SeqCst))
}

/// Cancel an in-flight processing pass and any outstanding dispatches for
/// the event. Does not transition the event status; the caller decides.
pub fn cancel(state: &BrainState, event_id: &str) -> bool {
    let had_pass = state.cancel_map.cancel(event_id);
    let cancelled_tasks = cancel_outstanding_tasks(state, event_id);
    had_pass || cancelled_tasks > 0
}

/// Tell the owning workers to abandon the event's outstanding tasks, then
/// wake their bridge awaiters with the cancelled sentinel.
fn cancel_outstanding_tasks(state: &BrainState, event_id: &str) -> usize {
    for (task_id, agent_id) in state.bridge.tasks_for_event(event_id) {
        if let Some(sink) = state.agents.get_sink(&agent_id) {
            let _ = sink.try_send(AgentMessage::Cancel { task_id });
        }
    }
    state.bridge.cancel_event(event_id)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// The LLM pass
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn run_llm_turn(state: &BrainState, event_id: &str, cancel: &CancelToken) -> PassEnd {
    let ev = match state.blackboard.get_event(event_id).await {
        Ok(ev) => ev,
        Err(_) => {
            return PassEnd::Completed {
                evaluate_below: None,
            }
        }
    };
    let params = ChatParams {
        temperature: Some(state.config.processor.temperature),
        max_tokens: state.config.processor.max_tokens,
    };

    // Obtain or create the chat session bound to this event.
    let cursor = match state.sessions.get(event_id) {
        Some(c) => c,
        None => match state.chat.create_chat(SYSTEM_PROMPT, &params).await {
            Ok(session_id) => {
                state.sessions.insert(event_id, session_id.clone());
                crate::chat_sessions::ChatCursor {
                    session_id,
                    sent_upto: 0,
                }
            }
            Err(e) => {
                tracing::warn!(event_id = %event_id, error = %e, "chat session creation failed");
                return fallback_generate(state, event_id, &ev, &params).await;
            }
        },
    };

    let delta = render_context(&ev, cursor.sent_upto);
    let mut stream = match state.chat.chat_send(&cursor.session_id, &delta).await {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(event_id = %event_id, error = %e, "chat send failed, using fallback");
            return fallback_generate(state, event_id, &ev, &params).await;
        }
    };
    state
        .sessions
        .advance(event_id, ev.conversation.len() as u32);

    let max_chains = state.config.processor.max_tool_chains;
    let mut text_buf = String::new();
    let mut chains = 0u32;
    let mut terminal = false;
    let mut evaluate_below: Option<u32> = None;

    loop {
        if cancel.is_cancelled() {
            return PassEnd::Cancelled;
        }
        let chunk = match stream.next().await {
            None => break,
            Some(Ok(c)) => c,
            Some(Err(e)) => {
                tracing::warn!(event_id = %event_id, error = %e, "chat stream failed mid-turn");
                return fallback_generate(state, event_id, &ev, &params).await;
            }
        };

        match chunk {
            Chunk::Text { text } => text_buf.push_str(&text),
            Chunk::Done => break,
            Chunk::FunctionCall {
                name,
                args,
                tool_use_id,
            } => {
                chains += 1;
                let outcome = match BrainFunction::parse(&name, args) {
                    Ok(call) => functions::execute(state, event_id, call).await,
                    Err(e) => FunctionOutcome {
                        tool_result: e.to_string(),
                        terminal: false,
                        routing_turn: None,
                    },
                };

                if outcome.terminal {
                    // The dispatch/pause/close owns the turn's business now;
                    // return the result and stop the chain.
                    evaluate_below = outcome.routing_turn;
                    let _ = state
                        .chat
                        .report_tool_result(&cursor.session_id, &tool_use_id, &outcome.tool_result)
                        .await;
                    terminal = true;
                    break;
                }
                if chains >= max_chains {
                    tracing::warn!(
                        event_id = %event_id,
                        max_chains,
                        "tool chain cap reached, ending pass"
                    );
                    let _ = state
                        .chat
                        .report_tool_result(&cursor.session_id, &tool_use_id, &outcome.tool_result)
                        .await;
                    break;
                }
                match state
                    .chat
                    .report_tool_result(&cursor.session_id, &tool_use_id, &outcome.tool_result)
                    .await
                {
                    Ok(next) => stream = next,
                    Err(e) => {
                        tracing::warn!(event_id = %event_id, error = %e, "tool result report failed");
                        state.sessions.close(event_id, &state.chat).await;
                        break;
                    }
                }
            }
        }
    }

    if !terminal && !text_buf.trim().is_empty() {
        let mut turn = Turn::new(Actor::Brain, "think");
        turn.thoughts = Some(text_buf);
        if let Err(e) = append_and_push(state, event_id, turn).await {
            tracing::warn!(event_id = %event_id, error = %e, "could not append think turn");
        }
    }
    PassEnd::Completed { evaluate_below }
}

/// The one-shot stateless fallback: rebuild the full conversation prompt and
/// call `generate`. A second failure defers the event.
async fn fallback_generate(
    state: &BrainState,
    event_id: &str,
    ev: &Event,
    params: &ChatParams,
) -> PassEnd {
    // The session (if any) is broken; sessions are never retried.
    state.sessions.close(event_id, &state.chat).await;

    let full = render_context(ev, 0);
    match state.chat.generate(SYSTEM_PROMPT, &full, params).await {
        Ok(text) => {
            if !text.trim().is_empty() {
                let mut turn = Turn::new(Actor::Brain, "think");
                turn.thoughts = Some(text);
                if let Err(e) = append_and_push(state, event_id, turn).await {
                    tracing::warn!(event_id = %event_id, error = %e, "could not append fallback turn");
                }
            }
            PassEnd::Completed {
                evaluate_below: None,
            }
        }
        Err(e) => {
            tracing::warn!(event_id = %event_id, error = %e, "stateless fallback failed, deferring");
            let secs = state.config.processor.stream_failure_defer_secs;
            if let Err(e) = defer_event(state, event_id, secs, "LLM unavailable").await {
                tracing::warn!(event_id = %event_id, error = %e, "defer after fallback failed");
            }
            PassEnd::Completed {
                evaluate_below: None,
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatch awaiter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run the bridge awaiter of a prepared dispatch as a background task. The
/// scheduler holds off re-processing the event while the task is in flight;
/// progress and result turns appended by the awaiter re-trigger it when
/// done.
pub fn spawn_awaiter(state: &BrainState, event_id: &str, prep: PreparedDispatch) {
    let task_state = state.clone();
    let event_id = event_id.to_owned();
    let key = event_id.clone();
    let handle = tokio::spawn(async move {
        match prep.await_result(&task_state).await {
            Ok(result) => {
                tracing::info!(
                    event_id = %event_id,
                    agent_id = %result.agent_id,
                    status = ?result.status,
                    source = %result.source,
                    "agent task completed"
                );
            }
            Err(Error::RetryableAgent(msg)) => {
                // Back off instead of failing the event; the scheduler
                // re-enters once the defer expires.
                tracing::warn!(event_id = %event_id, error = %msg, "retryable agent error, deferring");
                let secs = task_state.config.processor.retry_defer_secs;
                if let Err(e) =
                    defer_event(&task_state, &event_id, secs, &format!("retryable agent error: {msg}"))
                        .await
                {
                    tracing::warn!(event_id = %event_id, error = %e, "defer after agent error failed");
                }
            }
            Err(Error::Cancelled) => {
                tracing::info!(event_id = %event_id, "dispatch cancelled");
            }
            Err(e) => {
                // Fatal: surface as a system turn so the next pass lets the
                // LLM decide.
                tracing::warn!(event_id = %event_id, error = %e, "agent task failed");
                let mut turn = Turn::new(Actor::System, "error");
                turn.result = Some(format!("agent task failed: {e}"));
                if let Err(e) = append_and_push(&task_state, &event_id, turn).await {
                    tracing::warn!(event_id = %event_id, error = %e, "could not record agent failure");
                }
            }
        }
    });
    state.tracker.set_active_task(&key, handle);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Lifecycle helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Append a `brain/defer` turn and pause the event for `duration_secs`.
pub async fn defer_event(
    state: &BrainState,
    event_id: &str,
    duration_secs: u64,
    reason: &str,
) -> Result<()> {
    let mut turn = Turn::new(Actor::Brain, "defer");
    turn.thoughts = Some(reason.to_owned());
    append_and_push(state, event_id, turn).await?;

    let until = Utc::now() + chrono::Duration::seconds(duration_secs as i64);
    state.blackboard.set_defer_until(event_id, Some(until)).await?;
    match state
        .blackboard
        .set_event_status(event_id, EventStatus::Deferred, Some(EventStatus::Active))
        .await
    {
        Ok(()) => Ok(()),
        // Already paused some other way; the defer timestamp still holds.
        Err(Error::InvalidTransition(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Close an event: append the closing turn, transition to CLOSED, tear down
/// the chat session, evaluate every turn, and announce it. Also used by the
/// scheduler's timeout circuit breaker (`summary = "Timed out"`).
pub async fn close_event(
    state: &BrainState,
    event_id: &str,
    summary: &str,
    outcome: Option<&str>,
) -> Result<()> {
    // Stop any in-flight dispatch first.
    cancel_outstanding_tasks(state, event_id);

    let mut turn = Turn::new(Actor::Brain, "close");
    turn.thoughts = Some(summary.to_owned());
    turn.result = outcome.map(str::to_owned);
    append_and_push(state, event_id, turn).await?;

    state
        .blackboard
        .set_event_status(event_id, EventStatus::Closed, None)
        .await?;
    state.sessions.close(event_id, &state.chat).await;

    if let Ok(n) = state.blackboard.mark_turns_evaluated(event_id).await {
        if n > 0 {
            push_status(state, event_id, ReadState::Evaluated, TurnSet::All);
        }
    }
    state.broadcast.push(PushMessage::EventClosed {
        event_id: event_id.to_owned(),
    });
    state.tracker.forget(event_id);
    tracing::info!(event_id = %event_id, summary = %summary, "event closed");
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context rendering
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Render the event for the LLM. `from_turn = 0` produces the full context
/// (metadata plus every turn); otherwise only turns after the cursor.
fn render_context(ev: &Event, from_turn: u32) -> String {
    let mut out = String::new();

    if from_turn == 0 {
        out.push_str(&format!("event: {}\n", ev.id));
        out.push_str(&format!("source: {:?}\n", ev.source));
        if let Some(service) = &ev.service {
            out.push_str(&format!("service: {service}\n"));
        }
        out.push_str(&format!(
            "severity: {}\n",
            format!("{:?}", ev.input.severity).to_lowercase()
        ));
        out.push_str(&format!("reason: {}\n", ev.input.reason));
        if let Some(evidence) = &ev.input.evidence {
            out.push_str(&format!("initial evidence: {evidence}\n"));
        }
        out.push('\n');
    }

    let mut any = false;
    for t in ev.conversation.iter().filter(|t| t.turn > from_turn) {
        any = true;
        out.push_str(&format!("[{}] {}/{}\n", t.turn, t.actor, t.action));
        for (label, value) in [
            ("thoughts", &t.thoughts),
            ("result", &t.result),
            ("plan", &t.plan),
            ("evidence", &t.evidence),
        ] {
            if let Some(v) = value {
                out.push_str(&format!("  {label}: {v}\n"));
            }
        }
    }
    if !any {
        out.push_str("(no new turns; reassess the event state)\n");
    }
    out
}
