//! Bounded-retry decorator for transient store failures.
//!
//! Wraps any [`Blackboard`] and retries calls that fail with
//! `StorageUnavailable`, doubling the delay between attempts. Once the bound
//! is hit, the error surfaces and the scheduler re-attempts on its next tick.

use std::time::Duration;

use chrono::{DateTime, Utc};

use brain_domain::event::{Event, EventStatus, MessageStatus, Turn};
use brain_domain::{Error, Result};

use crate::{Blackboard, UpdateFn};

pub struct RetryingBlackboard<B> {
    inner: B,
    max_attempts: u32,
    base_delay: Duration,
}

impl<B: Blackboard> RetryingBlackboard<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            max_attempts: 4,
            base_delay: Duration::from_millis(50),
        }
    }

    pub fn with_policy(inner: B, max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    async fn backoff(&self, attempt: u32, err: &Error) {
        let delay = self.base_delay * 2u32.saturating_pow(attempt);
        tracing::warn!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "blackboard unavailable, backing off"
        );
        tokio::time::sleep(delay).await;
    }
}

macro_rules! with_retry {
    ($self:expr, $call:expr) => {{
        let mut attempt = 0;
        loop {
            match $call {
                Err(e @ Error::StorageUnavailable(_)) if attempt + 1 < $self.max_attempts => {
                    $self.backoff(attempt, &e).await;
                    attempt += 1;
                }
                other => break other,
            }
        }
    }};
}

#[async_trait::async_trait]
impl<B: Blackboard> Blackboard for RetryingBlackboard<B> {
    async fn create_event(&self, event: Event) -> Result<()> {
        with_retry!(self, self.inner.create_event(event.clone()).await)
    }

    async fn get_event(&self, id: &str) -> Result<Event> {
        with_retry!(self, self.inner.get_event(id).await)
    }

    async fn list_active_event_ids(&self) -> Result<Vec<String>> {
        with_retry!(self, self.inner.list_active_event_ids().await)
    }

    async fn atomic_update(&self, id: &str, f: UpdateFn<'_>) -> Result<Event> {
        with_retry!(self, self.inner.atomic_update(id, f).await)
    }

    // Delegate the derived operations too, so a backend that overrides them
    // with native implementations keeps its behavior under retry.

    async fn append_turn(&self, id: &str, turn: Turn) -> Result<u32> {
        with_retry!(self, self.inner.append_turn(id, turn.clone()).await)
    }

    async fn mark_turns_delivered(&self, id: &str, upto_turn: u32) -> Result<usize> {
        with_retry!(self, self.inner.mark_turns_delivered(id, upto_turn).await)
    }

    async fn mark_turns_evaluated(&self, id: &str) -> Result<usize> {
        with_retry!(self, self.inner.mark_turns_evaluated(id).await)
    }

    async fn mark_turn_status(
        &self,
        id: &str,
        turn_number: u32,
        status: MessageStatus,
    ) -> Result<bool> {
        with_retry!(
            self,
            self.inner.mark_turn_status(id, turn_number, status).await
        )
    }

    async fn set_event_status(
        &self,
        id: &str,
        status: EventStatus,
        guard: Option<EventStatus>,
    ) -> Result<()> {
        with_retry!(self, self.inner.set_event_status(id, status, guard).await)
    }

    async fn set_defer_until(&self, id: &str, until: Option<DateTime<Utc>>) -> Result<()> {
        with_retry!(self, self.inner.set_defer_until(id, until).await)
    }
}
