/// Shared error type used across all Brain crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("event not found: {0}")]
    NotFound(String),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("security blocked: {0}")]
    SecurityBlocked(String),

    #[error("no agent available for role {0}")]
    AgentUnavailable(String),

    #[error("agent error (retryable): {0}")]
    RetryableAgent(String),

    #[error("agent error: {0}")]
    FatalAgent(String),

    #[error("LLM stream: {0}")]
    LlmStream(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("cancelled")]
    Cancelled,

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Errors the caller may retry after a pause without giving up on the
    /// event. Everything else is either terminal for the attempt or benign.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StorageUnavailable(_)
                | Self::AgentUnavailable(_)
                | Self::RetryableAgent(_)
                | Self::Timeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
