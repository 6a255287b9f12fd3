//! Shared domain model for the Darwin Brain: the event aggregate, turn
//! read-receipt statuses, plan frontmatter, configuration, and the common
//! error type used across all crates.

pub mod config;
pub mod error;
pub mod event;
pub mod plan;

pub use error::{Error, Result};
