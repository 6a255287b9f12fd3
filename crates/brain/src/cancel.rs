//! Per-event cancellation tokens.
//!
//! Each running processor invocation registers a `CancelToken` keyed by
//! event id. Cancelling interrupts the active tool chain at its next
//! checkpoint; the bridge separately injects a cancelled sentinel into any
//! outstanding dispatch for the event.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// A cancellation token checked by the processor loop.
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Tracks the active cancellation token per event.
#[derive(Default)]
pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancelToken>>,
}

impl CancelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a fresh token for an event, replacing any
    /// previous one.
    pub fn register(&self, event_id: &str) -> CancelToken {
        let token = CancelToken::new();
        self.tokens
            .lock()
            .insert(event_id.to_owned(), token.clone());
        token
    }

    /// Signal cancellation. Returns true if a token was registered.
    pub fn cancel(&self, event_id: &str) -> bool {
        if let Some(token) = self.tokens.lock().get(event_id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    /// Remove the token when the processor invocation finishes.
    pub fn remove(&self, event_id: &str) {
        self.tokens.lock().remove(event_id);
    }

    pub fn is_running(&self, event_id: &str) -> bool {
        self.tokens.lock().contains_key(event_id)
    }
}
