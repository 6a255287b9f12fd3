//! Per-event concurrency control.
//!
//! At most one processor invocation runs per event. Each event id maps to a
//! `Semaphore(1)`; the scheduler uses the non-blocking acquire and simply
//! skips an event whose processor is still running (it will retry on a later
//! pass), so no waiter queue can build up behind a slow LLM turn.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub struct EventLockMap {
    locks: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl Default for EventLockMap {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLockMap {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn semaphore(&self, event_id: &str) -> Arc<Semaphore> {
        let mut locks = self.locks.lock();
        locks
            .entry(event_id.to_owned())
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .clone()
    }

    /// Acquire the processor lock without waiting. `None` means a processor
    /// invocation is already running for this event.
    pub fn try_acquire(&self, event_id: &str) -> Option<OwnedSemaphorePermit> {
        self.semaphore(event_id).try_acquire_owned().ok()
    }

    /// Whether a processor invocation currently holds the lock.
    pub fn is_locked(&self, event_id: &str) -> bool {
        self.locks
            .lock()
            .get(event_id)
            .map(|sem| sem.available_permits() == 0)
            .unwrap_or(false)
    }

    /// Number of tracked events (for monitoring).
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }

    /// Drop entries whose lock is not currently held (closed events leave
    /// their entry behind otherwise).
    pub fn prune_idle(&self) {
        let mut locks = self.locks.lock();
        locks.retain(|_, sem| sem.available_permits() == 0);
    }
}
