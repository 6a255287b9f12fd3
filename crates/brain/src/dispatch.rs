//! Dispatcher — the only entry point for sending work to a worker.
//!
//! [`prepare`] runs the synchronous half of a dispatch: security pre-check,
//! worker selection (with session affinity), bridge channel, routing turn,
//! busy-mark and send. Failures here surface immediately to the caller so
//! the LLM can re-plan within the same tool chain.
//!
//! [`PreparedDispatch::await_result`] is the bridge awaiter: it consumes
//! worker messages until a terminal outcome, advancing the routing turn's
//! read receipt (first progress → delivered, result → evaluated) and
//! appending progress/result turns. The processor runs it as a background
//! task, one per outstanding dispatch.

use std::time::Duration;

use tokio::sync::mpsc;

use brain_agent_protocol::{AgentMessage, ResultStatus, TaskMode};
use brain_blackboard::Blackboard;
use brain_domain::event::{AgentRole, MessageStatus, Turn};
use brain_domain::{Error, Result};

use crate::agents::bridge::TaskMessage;
use crate::broadcast::{BroadcastSink, PushMessage, ReadState, TurnSet};
use crate::state::BrainState;
use crate::tracker::SessionAffinity;
use crate::turns::{append_and_push, push_status};

/// How often the selection loop re-polls the registry while waiting for a
/// worker to free up.
const SELECTION_POLL: Duration = Duration::from_millis(250);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct DispatchRequest {
    pub role: AgentRole,
    pub event_id: String,
    pub prompt: String,
    pub mode: TaskMode,
    /// State queries set this so the sidecar refuses mutations.
    pub read_only: bool,
}

/// A dispatch that has been sent to a worker and awaits its outcome.
pub struct PreparedDispatch {
    pub task_id: String,
    pub agent_id: String,
    pub routing_turn: u32,
    role: AgentRole,
    event_id: String,
    mode: TaskMode,
    rx: mpsc::Receiver<TaskMessage>,
    deadline: Duration,
}

/// Terminal outcome of a successful agent round-trip.
#[derive(Debug, Clone)]
pub struct AgentResult {
    pub agent_id: String,
    pub status: ResultStatus,
    pub output: String,
    pub session_id: Option<String>,
    pub source: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// prepare — security, selection, routing turn, send
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn prepare(state: &BrainState, req: DispatchRequest) -> Result<PreparedDispatch> {
    // 1. Security: refuse before any I/O.
    state.guard.check(&req.prompt)?;

    // 2. Selection, preferring the worker that already served this event
    //    (session affinity). Bounded wait for a worker to free up.
    let affinity = state.tracker.affinity_for(&req.event_id, req.role);
    let prefer = affinity.as_ref().map(|a| a.agent_id.as_str());
    let (agent_id, sink) = {
        let wait = Duration::from_secs(state.config.dispatch.availability_wait_secs);
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if let Some(found) = state.agents.pick_available(req.role, prefer) {
                break found;
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::AgentUnavailable(req.role.to_string()));
            }
            tokio::time::sleep(SELECTION_POLL).await;
        }
    };

    // Resume the worker-side CLI session only when the same worker won the
    // pick; a different worker cannot resume it.
    let session_id = affinity
        .as_ref()
        .filter(|a| a.agent_id == agent_id)
        .and_then(|a| a.session_id.clone());

    // 3. Task id + bridge channel.
    let task_id = uuid::Uuid::new_v4().to_string();
    let rx = state.bridge.open(&task_id, &req.event_id, &agent_id);

    // 4. Routing turn.
    let mut turn = Turn::new(brain_domain::event::Actor::Brain, "route");
    turn.thoughts = Some(req.prompt.clone());
    turn.waiting_for = Some(req.role.as_actor());
    let routing_turn = match append_and_push(state, &req.event_id, turn).await {
        Ok(n) => n,
        Err(e) => {
            state.bridge.close(&task_id);
            return Err(e);
        }
    };

    // 5. Busy-mark, then send.
    state.agents.mark_busy(&agent_id, &req.event_id, &task_id);
    let msg = AgentMessage::Task {
        task_id: task_id.clone(),
        event_id: req.event_id.clone(),
        prompt: req.prompt.clone(),
        cwd: None,
        auto_approve: false,
        mode: req.mode,
        session_id,
        read_only: req.read_only,
    };
    if sink.send(msg).await.is_err() {
        // Worker vanished between pick and send.
        state.agents.mark_idle(&agent_id);
        state.bridge.close(&task_id);
        return Err(Error::AgentUnavailable(format!(
            "{} ({agent_id} went away)",
            req.role
        )));
    }

    let deadline = dispatch_deadline(state, req.role, req.mode);
    tracing::info!(
        event_id = %req.event_id,
        task_id = %task_id,
        agent_id = %agent_id,
        role = %req.role,
        mode = ?req.mode,
        "task dispatched"
    );

    Ok(PreparedDispatch {
        task_id,
        agent_id,
        routing_turn,
        role: req.role,
        event_id: req.event_id,
        mode: req.mode,
        rx,
        deadline,
    })
}

/// Role-specific deadline: implement-mode developer tasks get the longer
/// budget.
fn dispatch_deadline(state: &BrainState, role: AgentRole, mode: TaskMode) -> Duration {
    let secs = if role == AgentRole::Developer && mode == TaskMode::Implement {
        state.config.dispatch.implement_timeout_secs
    } else {
        state.config.dispatch.timeout_secs
    };
    Duration::from_secs(secs)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// await_result — the bridge awaiter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl PreparedDispatch {
    /// Consume bridge messages until a terminal outcome, then release the
    /// worker and close the bridge channel.
    pub async fn await_result(mut self, state: &BrainState) -> Result<AgentResult> {
        let outcome = self.consume(state).await;
        state.agents.mark_idle(&self.agent_id);
        state.bridge.close(&self.task_id);
        outcome
    }

    async fn consume(&mut self, state: &BrainState) -> Result<AgentResult> {
        let deadline = tokio::time::Instant::now() + self.deadline;
        let mut saw_progress = false;

        loop {
            let msg = match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                // Deadline: reported as a retryable agent error, per the
                // task timeout contract.
                Err(_) => {
                    tracing::warn!(
                        task_id = %self.task_id,
                        agent_id = %self.agent_id,
                        "task deadline elapsed"
                    );
                    return Err(Error::RetryableAgent("timeout".into()));
                }
                Ok(None) => return Err(Error::FatalAgent("bridge channel closed".into())),
                Ok(Some(m)) => m,
            };

            match msg {
                TaskMessage::Progress { message, source } => {
                    if !saw_progress {
                        saw_progress = true;
                        // First progress: the worker has the task.
                        let changed = state
                            .blackboard
                            .mark_turn_status(
                                &self.event_id,
                                self.routing_turn,
                                MessageStatus::Delivered,
                            )
                            .await?;
                        if changed {
                            push_status(
                                state,
                                &self.event_id,
                                ReadState::Delivered,
                                TurnSet::Listed(vec![self.routing_turn]),
                            );
                        }
                    }
                    let mut turn = Turn::new(self.role.as_actor(), "progress");
                    turn.result = Some(message);
                    turn.evidence = source;
                    append_and_push(state, &self.event_id, turn).await?;
                }
                TaskMessage::PartialResult { content } => {
                    // Streamed output is UI-only; the result turn carries
                    // the complete text.
                    state.broadcast.push(PushMessage::PartialResult {
                        event_id: self.event_id.clone(),
                        task_id: self.task_id.clone(),
                        content,
                    });
                }
                TaskMessage::Result {
                    status,
                    output,
                    session_id,
                    source,
                } => {
                    state
                        .blackboard
                        .mark_turn_status(
                            &self.event_id,
                            self.routing_turn,
                            MessageStatus::Evaluated,
                        )
                        .await?;
                    push_status(
                        state,
                        &self.event_id,
                        ReadState::Evaluated,
                        TurnSet::Listed(vec![self.routing_turn]),
                    );

                    let mut turn = Turn::new(self.role.as_actor(), self.mode.turn_action());
                    turn.result = Some(output.clone());
                    append_and_push(state, &self.event_id, turn).await?;

                    state.tracker.set_affinity(
                        &self.event_id,
                        self.role,
                        SessionAffinity {
                            agent_id: self.agent_id.clone(),
                            session_id: session_id.clone(),
                        },
                    );

                    return Ok(AgentResult {
                        agent_id: self.agent_id.clone(),
                        status,
                        output,
                        session_id,
                        source,
                    });
                }
                TaskMessage::Error { message, retryable } => {
                    return if retryable {
                        Err(Error::RetryableAgent(message))
                    } else {
                        Err(Error::FatalAgent(message))
                    };
                }
                TaskMessage::Disconnected => {
                    return Err(Error::FatalAgent(format!(
                        "worker {} disconnected mid-task",
                        self.agent_id
                    )));
                }
                TaskMessage::Cancelled => return Err(Error::Cancelled),
            }
        }
    }
}
