//! In-process blackboard implementation.
//!
//! Each event lives behind its own mutex; `atomic_update` applies the
//! closure to a scratch copy and commits only on success, so a failing
//! closure never leaves a half-written document.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use brain_domain::event::Event;
use brain_domain::{Error, Result};

use crate::{Blackboard, UpdateFn};

#[derive(Default)]
pub struct MemoryBlackboard {
    events: RwLock<HashMap<String, Arc<Mutex<Event>>>>,
}

impl MemoryBlackboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored events, terminal ones included.
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    fn slot(&self, id: &str) -> Result<Arc<Mutex<Event>>> {
        self.events
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_owned()))
    }
}

#[async_trait::async_trait]
impl Blackboard for MemoryBlackboard {
    async fn create_event(&self, event: Event) -> Result<()> {
        let mut events = self.events.write();
        if events.contains_key(&event.id) {
            return Err(Error::Other(format!("event {} already exists", event.id)));
        }
        tracing::debug!(event_id = %event.id, source = ?event.source, "event created");
        events.insert(event.id.clone(), Arc::new(Mutex::new(event)));
        Ok(())
    }

    async fn get_event(&self, id: &str) -> Result<Event> {
        Ok(self.slot(id)?.lock().clone())
    }

    async fn list_active_event_ids(&self) -> Result<Vec<String>> {
        let events = self.events.read();
        Ok(events
            .iter()
            .filter(|(_, slot)| !slot.lock().status.is_terminal())
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn atomic_update(&self, id: &str, f: UpdateFn<'_>) -> Result<Event> {
        let slot = self.slot(id)?;
        let mut guard = slot.lock();
        let mut scratch = guard.clone();
        f(&mut scratch)?;
        *guard = scratch.clone();
        Ok(scratch)
    }
}
