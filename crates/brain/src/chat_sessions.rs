//! Chat-session table: event id → LLM session id plus the delta cursor.
//!
//! Sessions are created lazily per event and reused across processings. The
//! cursor records the highest turn number already sent, so later sends carry
//! only the delta. Invariant: a session is closed on event close or on
//! stream error, never retried.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use brain_chatport::ChatPort;

#[derive(Debug, Clone)]
pub struct ChatCursor {
    pub session_id: String,
    /// Highest turn number already sent into the session.
    pub sent_upto: u32,
}

#[derive(Default)]
pub struct ChatSessionTable {
    sessions: Mutex<HashMap<String, ChatCursor>>,
}

impl ChatSessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, event_id: &str) -> Option<ChatCursor> {
        self.sessions.lock().get(event_id).cloned()
    }

    /// Bind a freshly created session to an event, starting at cursor 0.
    pub fn insert(&self, event_id: &str, session_id: String) {
        self.sessions.lock().insert(
            event_id.to_owned(),
            ChatCursor {
                session_id,
                sent_upto: 0,
            },
        );
    }

    /// Advance the delta cursor after a successful send.
    pub fn advance(&self, event_id: &str, sent_upto: u32) {
        if let Some(cursor) = self.sessions.lock().get_mut(event_id) {
            cursor.sent_upto = cursor.sent_upto.max(sent_upto);
        }
    }

    /// Drop the binding without closing the adapter session (used when the
    /// adapter already considers the session dead).
    pub fn discard(&self, event_id: &str) -> Option<ChatCursor> {
        self.sessions.lock().remove(event_id)
    }

    /// Drop the binding and close the adapter session.
    pub async fn close(&self, event_id: &str, chat: &Arc<dyn ChatPort>) {
        if let Some(cursor) = self.discard(event_id) {
            chat.close_chat(&cursor.session_id).await;
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}
