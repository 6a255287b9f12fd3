//! The event aggregate — one ticket driving one conversation.
//!
//! Turns are append-only: after append, only the per-turn `status` field may
//! change, and it only moves forward (sent → delivered → evaluated). Turn
//! numbers form a contiguous 1..N sequence assigned by the blackboard at
//! append time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Statuses
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lifecycle of an event. `Closed` is terminal: no turn is appended after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    New,
    Active,
    WaitingApproval,
    Deferred,
    Resolved,
    Closed,
}

impl EventStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Whether moving to `next` is a legal lifecycle transition.
    ///
    /// Setting the current status again is allowed (idempotent callers), and
    /// every non-terminal status may close.
    pub fn can_transition_to(self, next: EventStatus) -> bool {
        use EventStatus::*;
        if self == next {
            return true;
        }
        match self {
            New => matches!(next, Active | Closed),
            Active => matches!(next, WaitingApproval | Deferred | Resolved | Closed),
            WaitingApproval | Deferred | Resolved => matches!(next, Active | Closed),
            Closed => false,
        }
    }
}

/// Read-receipt state of a turn.
///
/// The derived `Ord` gives the monotonic ordering sent < delivered <
/// evaluated that status advances are checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Evaluated,
}

impl MessageStatus {
    /// A turn's status never regresses; re-applying the current status is a
    /// legal no-op.
    pub fn can_advance_to(self, target: MessageStatus) -> bool {
        target >= self
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Actors & roles
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Who authored a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    User,
    Brain,
    Architect,
    Sysadmin,
    Developer,
    Qe,
    Aligner,
    Archivist,
    System,
}

impl Actor {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Brain => "brain",
            Self::Architect => "architect",
            Self::Sysadmin => "sysadmin",
            Self::Developer => "developer",
            Self::Qe => "qe",
            Self::Aligner => "aligner",
            Self::Archivist => "archivist",
            Self::System => "system",
        }
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The dispatchable subset of [`Actor`]: roles an agent sidecar can
/// register as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Architect,
    Sysadmin,
    Developer,
    Qe,
    Aligner,
    Archivist,
}

impl AgentRole {
    pub fn as_actor(self) -> Actor {
        match self {
            Self::Architect => Actor::Architect,
            Self::Sysadmin => Actor::Sysadmin,
            Self::Developer => Actor::Developer,
            Self::Qe => Actor::Qe,
            Self::Aligner => Actor::Aligner,
            Self::Archivist => Actor::Archivist,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Architect => "architect",
            Self::Sysadmin => "sysadmin",
            Self::Developer => "developer",
            Self::Qe => "qe",
            Self::Aligner => "aligner",
            Self::Archivist => "archivist",
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AgentRole {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "architect" => Ok(Self::Architect),
            "sysadmin" => Ok(Self::Sysadmin),
            "developer" => Ok(Self::Developer),
            "qe" => Ok(Self::Qe),
            "aligner" => Ok(Self::Aligner),
            "archivist" => Ok(Self::Archivist),
            other => Err(crate::Error::Other(format!("unknown agent role: {other}"))),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event input
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where an event originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventSource {
    AutonomousDetector,
    UserChat,
    UserSlack,
    ExternalApi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Default for Severity {
    fn default() -> Self {
        Self::Medium
    }
}

/// The signal that created the event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventInput {
    pub reason: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One entry in an event's conversation log.
///
/// `turn` is assigned by the blackboard at append time (0 before append).
/// Everything except `status` is immutable after append.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub turn: u32,
    pub actor: Actor,
    /// Free-form tag: `think`, `route`, `execute`, `verify`, `wait`,
    /// `approve`, `reject`, `close`, ...
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thoughts: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
    /// The party whose next input this turn is waiting on, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waiting_for: Option<Actor>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub pending_approval: bool,
    pub status: MessageStatus,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    /// A fresh unappended turn: number 0, status sent, timestamped now.
    pub fn new(actor: Actor, action: impl Into<String>) -> Self {
        Self {
            turn: 0,
            actor,
            action: action.into(),
            thoughts: None,
            result: None,
            plan: None,
            evidence: None,
            waiting_for: None,
            pending_approval: false,
            status: MessageStatus::Sent,
            timestamp: Utc::now(),
        }
    }

    /// Whether this is an agent-result turn (the payload of a completed
    /// dispatch, as opposed to streamed progress).
    pub fn is_agent_result(&self) -> bool {
        let agent = matches!(
            self.actor,
            Actor::Architect
                | Actor::Sysadmin
                | Actor::Developer
                | Actor::Qe
                | Actor::Aligner
                | Actor::Archivist
        );
        agent && matches!(self.action.as_str(), "execute" | "verify" | "investigate")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The central aggregate: a ticket representing an autonomous anomaly or a
/// user request, plus its conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub source: EventSource,
    pub status: EventStatus,
    /// Subject identifier (domain hint, not enforced).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    pub input: EventInput,
    #[serde(default)]
    pub conversation: Vec<Turn>,
    /// While set and in the future, the scheduler does not process this event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defer_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Set when the first turn is appended; anchors the timeout circuit
    /// breaker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_turn_at: Option<DateTime<Utc>>,
}

impl Event {
    pub fn new(source: EventSource, service: Option<String>, input: EventInput) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source,
            status: EventStatus::New,
            service,
            input,
            conversation: Vec::new(),
            defer_until: None,
            created_at: Utc::now(),
            first_turn_at: None,
        }
    }

    /// Any turn not yet acknowledged by the scheduler (status sent).
    pub fn has_unseen(&self) -> bool {
        self.conversation
            .iter()
            .any(|t| t.status == MessageStatus::Sent)
    }

    /// Any turn acknowledged but not yet evaluated by the LLM.
    pub fn has_unread(&self) -> bool {
        self.conversation
            .iter()
            .any(|t| t.status == MessageStatus::Delivered)
    }

    /// Timestamp of the most recent agent-result turn, used by the timeout
    /// grace period.
    pub fn last_agent_result_at(&self) -> Option<DateTime<Utc>> {
        self.conversation
            .iter()
            .rev()
            .find(|t| t.is_agent_result())
            .map(|t| t.timestamp)
    }

    /// Any turn by `actor` with the given action whose status has not yet
    /// reached evaluated. Used for confirm-style dedup.
    pub fn has_unevaluated(&self, actor: Actor, action: &str) -> bool {
        self.conversation.iter().any(|t| {
            t.actor == actor && t.action == action && t.status != MessageStatus::Evaluated
        })
    }
}
