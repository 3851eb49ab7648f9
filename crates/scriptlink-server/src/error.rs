//! Error types for the scriptlink server.

/// Server error type.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Bind address could not be parsed.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// The serving task ended abnormally.
    #[error("Server task failed: {0}")]
    Task(String),
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
