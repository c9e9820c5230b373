use thiserror::Error;

/// Top-level error type for dispatch server operations.
#[derive(Debug, Error)]
pub enum DispatchError {
    // --- Hard dependency errors (the system cannot make progress) ---
    #[error("store error: {0}")]
    Store(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    // --- Operational errors ---
    #[error("transport error: {0}")]
    Transport(String),

    #[error("authentication failed")]
    AuthFailed,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Internal(String),
}

impl DispatchError {
    /// Whether this error is from a hard dependency and warrants tearing
    /// down the connection rather than replying with an error frame.
    pub fn is_hard_dependency(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Filesystem(_))
    }
}

/// Result type alias for dispatch server operations.
pub type Result<T> = std::result::Result<T, DispatchError>;
