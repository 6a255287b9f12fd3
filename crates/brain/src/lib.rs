//! Darwin Brain — the event scheduling and dispatch kernel.
//!
//! Anomaly events and user requests arrive as events on the blackboard; the
//! scheduler scans them, the processor reasons about each with an LLM, and
//! the dispatcher routes function calls to agent sidecars connected over
//! WebSocket. The kernel drives every event to closure while enforcing
//! at-most-one active worker and at-most-one processor invocation per event.

pub mod agents;
pub mod api;
pub mod bootstrap;
pub mod broadcast;
pub mod cancel;
pub mod chat_sessions;
pub mod dispatch;
pub mod event_lock;
pub mod functions;
pub mod ports;
pub mod processor;
pub mod scheduler;
pub mod security;
pub mod state;
pub mod tracker;
pub mod turns;
