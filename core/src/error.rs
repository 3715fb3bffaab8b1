use thiserror::Error;

/// Error taxonomy for the management layer. Budget exhaustion in transcript
/// search is not represented here: a truncated or timed-out search is a
/// successful result with flags set.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Invalid(String),

    #[error("permission denied: {0}")]
    Denied(String),

    #[error("{0}")]
    Conflict(String),

    /// Filesystem or spawn failures; callers may retry.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AgentError>;
