//! The blackboard: sole owner of event-document mutations.
//!
//! Every method is atomic and safe under concurrent callers. Implementations
//! provide four primitives (`create_event`, `get_event`,
//! `list_active_event_ids`, `atomic_update`); the append and status-advance
//! operations are written on top of `atomic_update`, so a store with real
//! compare-and-set can slot in behind the trait without re-deriving their
//! semantics.
//!
//! Status advances are idempotent: advancing a turn to a status it has
//! already reached (or passed) is a no-op, never an error. Writes after an
//! event closes are rejected.

mod memory;
mod retry;

pub use memory::MemoryBlackboard;
pub use retry::RetryingBlackboard;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use brain_domain::event::{Event, EventStatus, MessageStatus, Turn};
use brain_domain::{Error, Result};

/// Read-modify-write closure applied inside the store's per-event critical
/// section. May run more than once if the store retries a CAS conflict, so
/// it must be a pure function of the event it receives.
pub type UpdateFn<'a> = &'a (dyn Fn(&mut Event) -> Result<()> + Send + Sync);

#[async_trait::async_trait]
pub trait Blackboard: Send + Sync {
    /// Insert a new event document. Fails if the id already exists.
    async fn create_event(&self, event: Event) -> Result<()>;

    /// Load a snapshot of an event.
    async fn get_event(&self, id: &str) -> Result<Event>;

    /// Ids of all events in a non-terminal status. Cheap to call.
    async fn list_active_event_ids(&self) -> Result<Vec<String>>;

    /// Apply `f` to the event under the store's per-event critical section
    /// and return the updated snapshot. If `f` fails, nothing is written.
    async fn atomic_update(&self, id: &str, f: UpdateFn<'_>) -> Result<Event>;

    // ── Operations derived from atomic_update ─────────────────────────

    /// Atomically assign the next turn index and append. Returns the
    /// assigned number. Rejects if the event is closed.
    async fn append_turn(&self, id: &str, turn: Turn) -> Result<u32> {
        let assigned = Arc::new(AtomicUsize::new(0));
        let slot = assigned.clone();
        let updated = self
            .atomic_update(id, &move |ev: &mut Event| {
                if ev.status.is_terminal() {
                    return Err(Error::InvalidTransition(format!(
                        "event {} is closed, no turns may be appended",
                        ev.id
                    )));
                }
                let mut t = turn.clone();
                t.turn = ev.conversation.len() as u32 + 1;
                if ev.first_turn_at.is_none() {
                    ev.first_turn_at = Some(t.timestamp);
                }
                slot.store(t.turn as usize, Ordering::SeqCst);
                ev.conversation.push(t);
                Ok(())
            })
            .await?;
        debug_assert_eq!(assigned.load(Ordering::SeqCst), updated.conversation.len());
        Ok(assigned.load(Ordering::SeqCst) as u32)
    }

    /// Advance every sent turn with index ≤ `upto_turn` to delivered.
    /// Returns how many turns advanced (0 is a fine no-op).
    async fn mark_turns_delivered(&self, id: &str, upto_turn: u32) -> Result<usize> {
        let advanced = Arc::new(AtomicUsize::new(0));
        let slot = advanced.clone();
        self.atomic_update(id, &move |ev: &mut Event| {
            let mut n = 0;
            for t in ev.conversation.iter_mut().filter(|t| t.turn <= upto_turn) {
                if t.status == MessageStatus::Sent {
                    t.status = MessageStatus::Delivered;
                    n += 1;
                }
            }
            slot.store(n, Ordering::SeqCst);
            Ok(())
        })
        .await?;
        Ok(advanced.load(Ordering::SeqCst))
    }

    /// Advance every non-evaluated turn to evaluated. Returns the count.
    async fn mark_turns_evaluated(&self, id: &str) -> Result<usize> {
        let advanced = Arc::new(AtomicUsize::new(0));
        let slot = advanced.clone();
        self.atomic_update(id, &move |ev: &mut Event| {
            let mut n = 0;
            for t in ev.conversation.iter_mut() {
                if t.status != MessageStatus::Evaluated {
                    t.status = MessageStatus::Evaluated;
                    n += 1;
                }
            }
            slot.store(n, Ordering::SeqCst);
            Ok(())
        })
        .await?;
        Ok(advanced.load(Ordering::SeqCst))
    }

    /// Single-turn monotonic status advance. Returns `true` if the turn
    /// changed, `false` if the target was already reached or passed.
    async fn mark_turn_status(
        &self,
        id: &str,
        turn_number: u32,
        status: MessageStatus,
    ) -> Result<bool> {
        let changed = Arc::new(AtomicUsize::new(0));
        let slot = changed.clone();
        self.atomic_update(id, &move |ev: &mut Event| {
            let Some(t) = ev.conversation.iter_mut().find(|t| t.turn == turn_number) else {
                return Err(Error::NotFound(format!(
                    "turn {turn_number} in event {}",
                    ev.id
                )));
            };
            if t.status != status && t.status.can_advance_to(status) {
                t.status = status;
                slot.store(1, Ordering::SeqCst);
            } else {
                slot.store(0, Ordering::SeqCst);
            }
            Ok(())
        })
        .await?;
        Ok(changed.load(Ordering::SeqCst) == 1)
    }

    /// Optimistic status transition. With a guard, succeeds only while the
    /// current status equals it; always validates the lifecycle table.
    async fn set_event_status(
        &self,
        id: &str,
        status: EventStatus,
        guard: Option<EventStatus>,
    ) -> Result<()> {
        self.atomic_update(id, &move |ev: &mut Event| {
            if let Some(expected) = guard {
                if ev.status != expected {
                    return Err(Error::InvalidTransition(format!(
                        "event {} is {:?}, expected {:?}",
                        ev.id, ev.status, expected
                    )));
                }
            }
            if !ev.status.can_transition_to(status) {
                return Err(Error::InvalidTransition(format!(
                    "event {}: {:?} -> {:?}",
                    ev.id, ev.status, status
                )));
            }
            ev.status = status;
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// Set or clear the defer timestamp.
    async fn set_defer_until(&self, id: &str, until: Option<DateTime<Utc>>) -> Result<()> {
        self.atomic_update(id, &move |ev: &mut Event| {
            if ev.status.is_terminal() && until.is_some() {
                return Err(Error::InvalidTransition(format!(
                    "event {} is closed, cannot defer",
                    ev.id
                )));
            }
            ev.defer_until = until;
            Ok(())
        })
        .await?;
        Ok(())
    }
}
