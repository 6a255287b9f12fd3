//! Task bridge — correlates outstanding task ids to single-consumer
//! channels.
//!
//! The dispatcher opens a channel per task and awaits it; the WebSocket
//! handler delivers worker messages into it. Sentinels (`Disconnected`,
//! `Cancelled`) are synthetic terminal messages injected when the worker
//! goes away or the event is cancelled. Messages for unknown task ids are
//! dropped with a warning (orphan messages from evicted workers).

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use brain_agent_protocol::ResultStatus;

/// Per-channel queue depth. Progress is chatty but bounded; a worker
/// flooding faster than the awaiter drains will backpressure on its WS
/// reader task.
const CHANNEL_DEPTH: usize = 64;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What the dispatcher's bridge awaiter receives.
#[derive(Debug, Clone)]
pub enum TaskMessage {
    Progress {
        message: String,
        source: Option<String>,
    },
    PartialResult {
        content: String,
    },
    Result {
        status: ResultStatus,
        output: String,
        session_id: Option<String>,
        source: String,
    },
    Error {
        message: String,
        retryable: bool,
    },
    /// Sentinel: the worker disconnected mid-task.
    Disconnected,
    /// Sentinel: the event was cancelled.
    Cancelled,
}

struct TaskChannel {
    tx: mpsc::Sender<TaskMessage>,
    event_id: String,
    agent_id: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bridge
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct TaskBridge {
    channels: Mutex<HashMap<String, TaskChannel>>,
}

impl TaskBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the single-consumer channel for a task.
    pub fn open(
        &self,
        task_id: &str,
        event_id: &str,
        agent_id: &str,
    ) -> mpsc::Receiver<TaskMessage> {
        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        let prev = self.channels.lock().insert(
            task_id.to_owned(),
            TaskChannel {
                tx,
                event_id: event_id.to_owned(),
                agent_id: agent_id.to_owned(),
            },
        );
        // Task ids are UUIDs; a collision means a caller bug.
        debug_assert!(prev.is_none(), "task_id collision: {task_id}");
        rx
    }

    /// Deliver a worker message. Returns false for orphan messages (no
    /// channel — the task timed out, was closed, or belongs to an evicted
    /// worker).
    pub async fn deliver(&self, task_id: &str, msg: TaskMessage) -> bool {
        let tx = {
            let channels = self.channels.lock();
            match channels.get(task_id) {
                Some(ch) => ch.tx.clone(),
                None => {
                    tracing::warn!(task_id = %task_id, "dropping message for unknown task");
                    return false;
                }
            }
        };
        // The receiver may close between lookup and send; that is the same
        // orphan case.
        tx.send(msg).await.is_ok()
    }

    /// Close the channel after draining. The receiver sees the remaining
    /// buffered messages, then end-of-stream.
    pub fn close(&self, task_id: &str) {
        self.channels.lock().remove(task_id);
    }

    /// Enqueue a synthetic terminal message. Disconnect sentinels also
    /// remove the channel entry (nothing further can arrive for the task).
    pub fn inject_sentinel(&self, task_id: &str, sentinel: TaskMessage) {
        debug_assert!(matches!(
            sentinel,
            TaskMessage::Disconnected | TaskMessage::Cancelled
        ));
        let remove = matches!(sentinel, TaskMessage::Disconnected);
        let tx = {
            let mut channels = self.channels.lock();
            let Some(ch) = channels.get(task_id) else {
                return;
            };
            let tx = ch.tx.clone();
            if remove {
                channels.remove(task_id);
            }
            tx
        };
        // try_send: sentinels must not block; a full queue still wakes the
        // consumer, which will hit the sentinel-free terminal path via close.
        let _ = tx.try_send(sentinel);
    }

    /// Inject `Disconnected` into every channel owned by a worker. Returns
    /// how many tasks were orphaned.
    pub fn fail_for_agent(&self, agent_id: &str) -> usize {
        let task_ids: Vec<String> = {
            let channels = self.channels.lock();
            channels
                .iter()
                .filter(|(_, ch)| ch.agent_id == agent_id)
                .map(|(id, _)| id.clone())
                .collect()
        };
        for task_id in &task_ids {
            self.inject_sentinel(task_id, TaskMessage::Disconnected);
        }
        if !task_ids.is_empty() {
            tracing::warn!(
                agent_id = %agent_id,
                failed = task_ids.len(),
                "injected disconnect sentinel for in-flight tasks"
            );
        }
        task_ids.len()
    }

    /// Outstanding `(task_id, agent_id)` pairs for an event, for cancel
    /// notifications to the owning workers.
    pub fn tasks_for_event(&self, event_id: &str) -> Vec<(String, String)> {
        self.channels
            .lock()
            .iter()
            .filter(|(_, ch)| ch.event_id == event_id)
            .map(|(id, ch)| (id.clone(), ch.agent_id.clone()))
            .collect()
    }

    /// Inject `Cancelled` into every channel belonging to an event. Returns
    /// how many tasks were signalled.
    pub fn cancel_event(&self, event_id: &str) -> usize {
        let task_ids: Vec<String> = {
            let channels = self.channels.lock();
            channels
                .iter()
                .filter(|(_, ch)| ch.event_id == event_id)
                .map(|(id, _)| id.clone())
                .collect()
        };
        for task_id in &task_ids {
            self.inject_sentinel(task_id, TaskMessage::Cancelled);
        }
        task_ids.len()
    }

    /// Number of outstanding tasks.
    pub fn pending_count(&self) -> usize {
        self.channels.lock().len()
    }
}
