//! Error types for the attention task queue.

use uuid::Uuid;

use crate::task::TaskStatus;

/// Top-level error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Queue lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Task {id} not found")]
    TaskNotFound { id: Uuid },

    #[error("Task {id} is {status}, cannot transition to {target}")]
    InvalidTransition {
        id: Uuid,
        status: TaskStatus,
        target: TaskStatus,
    },

    #[error("Task {id} is {status}, only terminal tasks can be archived")]
    NotArchivable { id: Uuid, status: TaskStatus },
}

/// LLM provider errors, surfaced by handlers.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider request failed: {0}")]
    RequestFailed(String),

    #[error("Provider rate limited")]
    RateLimited,

    #[error("Provider request timed out")]
    Timeout,

    #[error("Invalid response from provider: {0}")]
    InvalidResponse(String),
}

/// Errors from the attention-data / user-settings collaborators.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Attention data fetch failed for user {user_id}: {reason}")]
    FetchFailed { user_id: String, reason: String },

    #[error("User settings read failed: {0}")]
    Settings(String),
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
