use thiserror::Error;

/// Central error type for stream-connect
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    // ============================================================================
    // Construction Errors
    // ============================================================================
    #[error("A pipeline needs at least 2 stages, got {0}")]
    InvalidPipeline(usize),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    // ============================================================================
    // Write Side Errors
    // ============================================================================
    #[error("Write after end")]
    WriteAfterEnd,

    #[error("Stage '{0}' is no longer accepting input")]
    StageClosed(String),

    // ============================================================================
    // Stage Runtime Errors
    // ============================================================================
    #[error("Stage '{stage}' failed: {message}")]
    StageFailed { stage: String, message: String },

    #[error("Invalid chunk: {0}")]
    InvalidChunk(String),

    // ============================================================================
    // Generic/System Errors
    // ============================================================================
    #[error("Mutex lock error")]
    LockError,

    #[error("{0}")]
    GenericError(String),
}

impl StreamError {
    /// Shorthand for a runtime failure raised by a named stage
    pub fn stage_failed(stage: impl Into<String>, message: impl Into<String>) -> Self {
        StreamError::StageFailed {
            stage: stage.into(),
            message: message.into(),
        }
    }
}

// Implement conversion from PoisonError for Mutex locks
impl<T> From<std::sync::PoisonError<T>> for StreamError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        StreamError::LockError
    }
}

impl From<String> for StreamError {
    fn from(err: String) -> Self {
        StreamError::GenericError(err)
    }
}

impl From<&str> for StreamError {
    fn from(err: &str) -> Self {
        StreamError::GenericError(err.to_string())
    }
}

// Helper type alias for Results
pub type StreamResult<T> = Result<T, StreamError>;
