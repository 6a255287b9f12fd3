//! The worker boundary: registry of connected sidecars, the task bridge
//! correlating outstanding task ids to response channels, and the WebSocket
//! endpoint sidecars connect to.

pub mod bridge;
pub mod registry;
pub mod ws;
