//! Task handler registry — maps a task type to the function executing it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::error::LlmError;
use crate::task::{Task, TaskType};

/// Classified handler failure.
///
/// The worker interprets this uniformly: `Transient` is retried per the
/// queue's backoff policy, `InvalidInput` fails immediately and its message
/// is surfaced verbatim so the UI can show something actionable.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Transient fault (network, rate limit, provider timeout).
    #[error("{0}")]
    Transient(String),

    /// Non-retryable input/business error.
    #[error("{0}")]
    InvalidInput(String),
}

impl HandlerError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<LlmError> for HandlerError {
    /// LLM failures are retryable by default.
    fn from(e: LlmError) -> Self {
        Self::Transient(e.to_string())
    }
}

/// The slice of a claimed task a handler sees.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task_id: Uuid,
    pub user_id: String,
    pub task_type: TaskType,
    pub payload: Value,
    pub retry_count: u32,
}

impl TaskContext {
    pub fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.id,
            user_id: task.user_id.clone(),
            task_type: task.task_type.clone(),
            payload: task.payload.clone(),
            retry_count: task.retry_count,
        }
    }
}

/// The function registered for a task type. Handlers are the boundary to
/// external collaborators (LLM provider, attention data) and must be
/// idempotent: the queue delivers at-least-once.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, ctx: TaskContext) -> Result<Value, HandlerError>;
}

/// Registry of task handlers. Registration is expected to happen once at
/// process startup, before the worker starts.
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<TaskType, Arc<dyn TaskHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handler for a task type, replacing any previous one.
    pub fn register(&self, task_type: TaskType, handler: Arc<dyn TaskHandler>) {
        tracing::debug!(task_type = %task_type, "Registered task handler");
        if let Ok(mut handlers) = self.handlers.write() {
            handlers.insert(task_type, handler);
        }
    }

    /// Get the handler for a task type.
    pub fn get(&self, task_type: &TaskType) -> Option<Arc<dyn TaskHandler>> {
        self.handlers
            .read()
            .ok()
            .and_then(|h| h.get(task_type).cloned())
    }

    /// Check if a handler is registered for a type.
    pub fn has(&self, task_type: &TaskType) -> bool {
        self.handlers
            .read()
            .map(|h| h.contains_key(task_type))
            .unwrap_or(false)
    }

    /// All registered task types.
    pub fn registered_types(&self) -> Vec<TaskType> {
        self.handlers
            .read()
            .map(|h| h.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
