use thiserror::Error;

/// Bad caller input. Public operations report these as structured failures.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("{0} is required")]
    EmptyField(&'static str),
    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },
}

/// The memory store could not be reached or a read/write failed.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to (de)serialize stored value: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("failed to prepare storage location: {0}")]
    Io(#[from] std::io::Error),
    #[error("memory store is closed")]
    Closed,
    #[error("memory store lock poisoned")]
    LockPoisoned,
}

/// Failures surfaced by the orchestrator's message pipeline.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("language model call failed: {0}")]
    ExternalCall(String),
    #[error("language model returned no text content")]
    EmptyResponse,
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}
