//! The function table the LLM dispatches through.
//!
//! Tool calls arrive as `(name, args)` pairs and parse into a tagged enum so
//! handling is exhaustive at compile time. Terminal functions close the
//! current tool chain (the agent round-trip, approval gate, wait, defer,
//! close, or notification owns the turn's business from here); read-only
//! enrichment functions feed their result back and let the chain continue.
//!
//! Execution never raises: every failure becomes tool-result text the LLM
//! can re-plan around, a turn, or a deferral.

use serde::Deserialize;

use brain_agent_protocol::TaskMode;
use brain_blackboard::Blackboard;
use brain_domain::event::{Actor, AgentRole, EventStatus, Turn};
use brain_domain::{Error, Result};

use crate::dispatch::{self, DispatchRequest};
use crate::ports::{DeepMemory, Notifier, ServiceCatalog};
use crate::processor;
use crate::state::BrainState;
use crate::turns::append_and_push;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// The function enum
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq)]
pub enum BrainFunction {
    SelectAgent {
        role: AgentRole,
        task: String,
        mode: TaskMode,
    },
    AskAgentForState {
        role: AgentRole,
        question: String,
    },
    RequestUserApproval {
        question: String,
        context: Option<String>,
    },
    WaitForUser {
        summary: String,
    },
    DeferEvent {
        duration_s: u64,
        reason: String,
    },
    CloseEvent {
        summary: String,
        outcome: Option<String>,
    },
    LookupService {
        name: String,
    },
    ConsultDeepMemory {
        query: String,
    },
    NotifyUserSlack {
        email: String,
        message: String,
    },
}

// Argument shapes, kept private to the parser.

#[derive(Deserialize)]
struct SelectAgentArgs {
    role: AgentRole,
    task: String,
    #[serde(default)]
    mode: Option<TaskMode>,
}

#[derive(Deserialize)]
struct AskAgentArgs {
    role: AgentRole,
    question: String,
}

#[derive(Deserialize)]
struct ApprovalArgs {
    question: String,
    #[serde(default)]
    context: Option<String>,
}

#[derive(Deserialize)]
struct WaitArgs {
    summary: String,
}

#[derive(Deserialize)]
struct DeferArgs {
    duration_s: u64,
    reason: String,
}

#[derive(Deserialize)]
struct CloseArgs {
    summary: String,
    #[serde(default)]
    outcome: Option<String>,
}

#[derive(Deserialize)]
struct LookupArgs {
    name: String,
}

#[derive(Deserialize)]
struct MemoryArgs {
    query: String,
}

#[derive(Deserialize)]
struct NotifyArgs {
    email: String,
    message: String,
}

impl BrainFunction {
    /// Parse an LLM tool call. Unknown names and malformed arguments are
    /// errors the caller feeds back as tool-result text.
    pub fn parse(name: &str, args: serde_json::Value) -> Result<Self> {
        fn args_of<T: serde::de::DeserializeOwned>(
            name: &str,
            args: serde_json::Value,
        ) -> Result<T> {
            serde_json::from_value(args)
                .map_err(|e| Error::Other(format!("invalid arguments for {name}: {e}")))
        }

        match name {
            "select_agent" => {
                let a: SelectAgentArgs = args_of(name, args)?;
                Ok(Self::SelectAgent {
                    role: a.role,
                    task: a.task,
                    mode: a.mode.unwrap_or_default(),
                })
            }
            "ask_agent_for_state" => {
                let a: AskAgentArgs = args_of(name, args)?;
                Ok(Self::AskAgentForState {
                    role: a.role,
                    question: a.question,
                })
            }
            "request_user_approval" => {
                let a: ApprovalArgs = args_of(name, args)?;
                Ok(Self::RequestUserApproval {
                    question: a.question,
                    context: a.context,
                })
            }
            "wait_for_user" => {
                let a: WaitArgs = args_of(name, args)?;
                Ok(Self::WaitForUser { summary: a.summary })
            }
            "defer_event" => {
                let a: DeferArgs = args_of(name, args)?;
                Ok(Self::DeferEvent {
                    duration_s: a.duration_s,
                    reason: a.reason,
                })
            }
            "close_event" => {
                let a: CloseArgs = args_of(name, args)?;
                Ok(Self::CloseEvent {
                    summary: a.summary,
                    outcome: a.outcome,
                })
            }
            "lookup_service" => {
                let a: LookupArgs = args_of(name, args)?;
                Ok(Self::LookupService { name: a.name })
            }
            "consult_deep_memory" => {
                let a: MemoryArgs = args_of(name, args)?;
                Ok(Self::ConsultDeepMemory { query: a.query })
            }
            "notify_user_slack" => {
                let a: NotifyArgs = args_of(name, args)?;
                Ok(Self::NotifyUserSlack {
                    email: a.email,
                    message: a.message,
                })
            }
            other => Err(Error::Other(format!("unknown function: {other}"))),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Execution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What a function execution hands back to the tool loop.
#[derive(Debug)]
pub struct FunctionOutcome {
    /// Text returned to the LLM as the tool result.
    pub tool_result: String,
    /// Terminal functions end the current tool chain.
    pub terminal: bool,
    /// Set when a dispatch started: its routing turn (and everything after)
    /// belongs to the in-flight task, so the pass's evaluate-all stops
    /// below it. The routing turn advances via the agent's own receipt
    /// path (first progress → delivered, result → evaluated).
    pub routing_turn: Option<u32>,
}

impl FunctionOutcome {
    fn terminal(tool_result: impl Into<String>) -> Self {
        Self {
            tool_result: tool_result.into(),
            terminal: true,
            routing_turn: None,
        }
    }

    fn chain(tool_result: impl Into<String>) -> Self {
        Self {
            tool_result: tool_result.into(),
            terminal: false,
            routing_turn: None,
        }
    }
}

/// Execute one function for one event. Infallible by contract: errors are
/// folded into the outcome.
pub async fn execute(state: &BrainState, event_id: &str, call: BrainFunction) -> FunctionOutcome {
    match call {
        BrainFunction::SelectAgent { role, task, mode } => {
            run_dispatch(state, event_id, role, task, mode, false).await
        }
        BrainFunction::AskAgentForState { role, question } => {
            run_dispatch(state, event_id, role, question, TaskMode::Investigate, true).await
        }

        BrainFunction::RequestUserApproval { question, context } => {
            let mut turn = Turn::new(Actor::Brain, "wait");
            turn.thoughts = Some(question);
            turn.evidence = context;
            turn.waiting_for = Some(Actor::User);
            turn.pending_approval = true;
            if let Err(e) = append_and_push(state, event_id, turn).await {
                return FunctionOutcome::chain(format!("could not record approval request: {e}"));
            }
            // Benign no-op when the event is not ACTIVE (e.g. repeated call).
            if let Err(e) = state
                .blackboard
                .set_event_status(event_id, EventStatus::WaitingApproval, Some(EventStatus::Active))
                .await
            {
                if !matches!(e, Error::InvalidTransition(_)) {
                    return FunctionOutcome::chain(format!("approval request failed: {e}"));
                }
            }
            FunctionOutcome::terminal("approval requested; the event is paused until a user decides")
        }

        BrainFunction::WaitForUser { summary } => {
            let mut turn = Turn::new(Actor::Brain, "wait");
            turn.thoughts = Some(summary);
            turn.waiting_for = Some(Actor::User);
            if let Err(e) = append_and_push(state, event_id, turn).await {
                return FunctionOutcome::chain(format!("could not record wait: {e}"));
            }
            state.tracker.set_waiting_for_user(event_id);
            FunctionOutcome::terminal("waiting for user input")
        }

        BrainFunction::DeferEvent { duration_s, reason } => {
            match processor::defer_event(state, event_id, duration_s, &reason).await {
                Ok(()) => FunctionOutcome::terminal(format!("event deferred for {duration_s}s")),
                Err(e) => FunctionOutcome::chain(format!("defer failed: {e}")),
            }
        }

        BrainFunction::CloseEvent { summary, outcome } => {
            match processor::close_event(state, event_id, &summary, outcome.as_deref()).await {
                Ok(()) => FunctionOutcome::terminal("event closed"),
                Err(e) => FunctionOutcome::chain(format!("close failed: {e}")),
            }
        }

        BrainFunction::LookupService { name } => match state.catalog.lookup(&name).await {
            Ok(Some(text)) => FunctionOutcome::chain(text),
            Ok(None) => FunctionOutcome::chain(format!("service {name:?} not found in catalog")),
            Err(e) => FunctionOutcome::chain(format!("service lookup failed: {e}")),
        },

        BrainFunction::ConsultDeepMemory { query } => {
            match state.deep_memory.query(&query).await {
                Ok(text) => FunctionOutcome::chain(text),
                Err(e) => FunctionOutcome::chain(format!("deep memory query failed: {e}")),
            }
        }

        BrainFunction::NotifyUserSlack { email, message } => {
            if let Err(e) = state.notifier.notify(&email, &message).await {
                return FunctionOutcome::chain(format!("notification failed: {e}"));
            }
            let mut turn = Turn::new(Actor::Brain, "notify");
            turn.result = Some(message);
            if let Err(e) = append_and_push(state, event_id, turn).await {
                return FunctionOutcome::chain(format!("could not record notification: {e}"));
            }
            FunctionOutcome::terminal(format!("notification sent to {email}"))
        }
    }
}

/// Shared dispatch path for `select_agent` and `ask_agent_for_state`.
///
/// On success the bridge awaiter runs in the background; progress and result
/// turns arrive asynchronously and the scheduler re-enters the event once
/// they do.
async fn run_dispatch(
    state: &BrainState,
    event_id: &str,
    role: AgentRole,
    prompt: String,
    mode: TaskMode,
    read_only: bool,
) -> FunctionOutcome {
    let req = DispatchRequest {
        role,
        event_id: event_id.to_owned(),
        prompt,
        mode,
        read_only,
    };
    match dispatch::prepare(state, req).await {
        Ok(prep) => {
            let routing_turn = prep.routing_turn;
            processor::spawn_awaiter(state, event_id, prep);
            let mut outcome = FunctionOutcome::terminal(format!(
                "task dispatched to {role}; its result will arrive as a new turn"
            ));
            outcome.routing_turn = Some(routing_turn);
            outcome
        }
        Err(Error::SecurityBlocked(msg)) => {
            // Record the refusal so the conversation shows why nothing was
            // dispatched; the event continues.
            let mut turn = Turn::new(Actor::Brain, "think");
            turn.thoughts = Some(format!("dispatch to {role} refused: {msg}"));
            if let Err(e) = append_and_push(state, event_id, turn).await {
                tracing::warn!(event_id = %event_id, error = %e, "could not record security block");
            }
            FunctionOutcome::chain(format!("dispatch blocked by security pre-check: {msg}"))
        }
        Err(Error::AgentUnavailable(msg)) => FunctionOutcome::chain(format!(
            "no worker available: {msg}; re-plan or try again later"
        )),
        Err(e) => FunctionOutcome::chain(format!("dispatch failed: {e}")),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Aligner confirm dedup
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Append an `aligner/confirm` re-verification trigger unless a prior one
/// is still unevaluated (the LLM has not seen it yet — re-confirming would
/// be noise). Returns the turn number, or `None` when deduplicated.
pub async fn append_aligner_confirm(
    state: &BrainState,
    event_id: &str,
    text: &str,
) -> Result<Option<u32>> {
    let ev = state.blackboard.get_event(event_id).await?;
    if ev.has_unevaluated(Actor::Aligner, "confirm") {
        tracing::debug!(event_id = %event_id, "confirm suppressed, prior one still pending");
        return Ok(None);
    }
    let mut turn = Turn::new(Actor::Aligner, "confirm");
    turn.thoughts = Some(text.to_owned());
    let n = append_and_push(state, event_id, turn).await?;
    Ok(Some(n))
}
