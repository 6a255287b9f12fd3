//! Typed push messages to the UI, fanned out over a broadcast channel.
//!
//! Every turn append and read-receipt advance is mirrored here so connected
//! dashboards see the same state the blackboard holds. Pushes are
//! fire-and-forget: no subscribers means the message is dropped.

use serde::ser::SerializeSeq;
use serde::{Serialize, Serializer};
use tokio::sync::broadcast;

use brain_domain::event::Turn;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Which turns a read-receipt push covers: an explicit list, or `"all"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnSet {
    All,
    Listed(Vec<u32>),
}

impl Serialize for TurnSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::All => serializer.serialize_str("all"),
            Self::Listed(turns) => {
                let mut seq = serializer.serialize_seq(Some(turns.len()))?;
                for t in turns {
                    seq.serialize_element(t)?;
                }
                seq.end()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadState {
    Delivered,
    Evaluated,
}

/// A push to the UI transport.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum PushMessage {
    /// A turn was appended.
    #[serde(rename = "turn")]
    TurnAppended { event_id: String, turn: Turn },

    /// Turn read-receipts advanced.
    #[serde(rename = "message_status")]
    MessageStatus {
        event_id: String,
        status: ReadState,
        turns: TurnSet,
    },

    /// Streamed slice of an in-flight agent task (not persisted as a turn).
    #[serde(rename = "partial_result")]
    PartialResult {
        event_id: String,
        task_id: String,
        content: String,
    },

    #[serde(rename = "event_created")]
    EventCreated { event_id: String },

    #[serde(rename = "event_closed")]
    EventClosed { event_id: String },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sink
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The push API the kernel writes to. The UI transport behind it is a
/// collaborator.
pub trait BroadcastSink: Send + Sync {
    fn push(&self, msg: PushMessage);
}

/// Broadcast-channel fan-out to any number of UI WebSocket subscribers.
pub struct BroadcastHub {
    tx: broadcast::Sender<PushMessage>,
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PushMessage> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(256)
    }
}

impl BroadcastSink for BroadcastHub {
    fn push(&self, msg: PushMessage) {
        // Err means no subscribers; that is fine.
        let _ = self.tx.send(msg);
    }
}
