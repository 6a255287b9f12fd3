//! Agent worker protocol: WebSocket message types between the Brain and its
//! CLI-backed sidecars.
//!
//! Sidecars connect inbound, send `register` with their role, and then
//! execute dispatched tasks, streaming `progress` / `partial_result` until a
//! terminal `result` or `error`.

use serde::{Deserialize, Serialize};

use brain_domain::event::AgentRole;

/// WebSocket message envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentMessage {
    /// Worker → Brain: initial handshake.
    #[serde(rename = "register")]
    Register {
        agent_id: String,
        role: AgentRole,
        /// The CLI backing this sidecar (e.g. "claude", "aider").
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cli: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        capabilities: Vec<String>,
    },

    /// Brain → Worker: execute a task.
    #[serde(rename = "task")]
    Task {
        task_id: String,
        event_id: String,
        prompt: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
        #[serde(rename = "autoApprove", default, skip_serializing_if = "std::ops::Not::not")]
        auto_approve: bool,
        #[serde(default)]
        mode: TaskMode,
        /// Worker-side CLI session to resume (session affinity).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        /// State queries set this so the sidecar can refuse mutations.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        read_only: bool,
    },

    /// Brain → Worker: abandon an outstanding task.
    #[serde(rename = "cancel")]
    Cancel { task_id: String },

    /// Bidirectional: liveness probe.
    #[serde(rename = "ping")]
    Ping { timestamp: i64 },

    /// Bidirectional: liveness response.
    #[serde(rename = "pong")]
    Pong { timestamp: i64 },

    /// Worker → Brain: the task is underway.
    #[serde(rename = "progress")]
    Progress {
        task_id: String,
        event_id: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<String>,
    },

    /// Worker → Brain: streamed slice of the eventual output.
    #[serde(rename = "partial_result")]
    PartialResult {
        task_id: String,
        event_id: String,
        content: String,
    },

    /// Worker → Brain: terminal outcome.
    #[serde(rename = "result")]
    Result {
        task_id: String,
        event_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        status: ResultStatus,
        output: String,
        source: String,
    },

    /// Worker → Brain: terminal failure.
    #[serde(rename = "error")]
    Error {
        task_id: String,
        event_id: String,
        message: String,
        #[serde(default)]
        retryable: bool,
    },
}

/// How the worker should treat the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskMode {
    Investigate,
    Execute,
    Verify,
    Implement,
}

impl Default for TaskMode {
    fn default() -> Self {
        Self::Execute
    }
}

impl TaskMode {
    /// The action tag of the agent-result turn this mode produces.
    pub fn turn_action(self) -> &'static str {
        match self {
            Self::Investigate => "investigate",
            Self::Verify => "verify",
            Self::Execute | Self::Implement => "execute",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    Failed,
}

/// Max result payload size in bytes (4 MB). Workers should truncate larger
/// outputs before sending.
pub const MAX_RESULT_BYTES: usize = 4 * 1024 * 1024;
