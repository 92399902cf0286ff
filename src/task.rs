//! Task model and lifecycle state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of asynchronous work a task performs.
///
/// This is an open set: handlers register for a type string, and the four
/// built-in types below are just the ones the attention tracker ships with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(String);

impl TaskType {
    pub const FOCUS_CALCULATION: &'static str = "focus-calculation";
    pub const QUIZ_GENERATION: &'static str = "quiz-generation";
    pub const SUMMARIZATION: &'static str = "summarization";
    pub const IMAGE_SUMMARIZATION: &'static str = "image-summarization";

    /// Create a task type from an arbitrary type string.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn focus_calculation() -> Self {
        Self::new(Self::FOCUS_CALCULATION)
    }

    pub fn quiz_generation() -> Self {
        Self::new(Self::QUIZ_GENERATION)
    }

    pub fn summarization() -> Self {
        Self::new(Self::SUMMARIZATION)
    }

    pub fn image_summarization() -> Self {
        Self::new(Self::IMAGE_SUMMARIZATION)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting to be claimed by a worker.
    Pending,
    /// Claimed by a worker and currently executing.
    Processing,
    /// Finished successfully; `result` is populated.
    Completed,
    /// Finished unsuccessfully with no retry budget left, or failed a
    /// non-retryable error; `error` is populated.
    Failed,
    /// Cancelled before it ran.
    Cancelled,
}

impl TaskStatus {
    /// Check if this state allows transitioning to another state.
    ///
    /// `Processing -> Pending` is the retry path (failure with budget left,
    /// or stale recovery). No transition leaves a terminal state.
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        use TaskStatus::*;

        matches!(
            (self, target),
            (Pending, Processing)
                | (Pending, Cancelled)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Pending)
        )
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Check if the task is open (counts against the dedupe key).
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse a status string from the store.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of asynchronous work belonging to a user.
///
/// Owned exclusively by the `QueueService`; workers never mutate a task
/// directly, only through queue calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Unique task ID, generated at creation.
    pub id: Uuid,
    /// Owning user. All fairness and dedup scoping is per-user.
    pub user_id: String,
    /// Task type, dispatched through the handler registry.
    pub task_type: TaskType,
    /// Type-specific input.
    pub payload: serde_json::Value,
    /// Higher claims first among eligible pending tasks.
    pub priority: i32,
    pub status: TaskStatus,
    /// Handler output, set on successful completion.
    pub result: Option<serde_json::Value>,
    /// Last failure message; final on terminal failure, cleared on success.
    pub error: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Key under which at most one open task may exist.
    pub dedupe_key: String,
    pub created_at: DateTime<Utc>,
    /// Claim time; doubles as the heartbeat for stale-task detection.
    /// Always `None` while the task is pending.
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Earliest eligible claim time (backoff delay, recurring spacing).
    pub scheduled_for: DateTime<Utc>,
}

impl Task {
    /// The default dedupe key for a `(user, type)` pair.
    pub fn default_dedupe_key(user_id: &str, task_type: &TaskType) -> String {
        format!("{user_id}:{task_type}")
    }

    /// Whether the retry budget allows another attempt.
    pub fn has_retry_budget(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

/// Immutable snapshot of a terminal task, written when it is archived.
///
/// Exists for UI/debug visibility only; scheduling never reads it (with the
/// single exception of `last_completed_at`, so recurring cadence survives
/// archiving).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskHistoryEntry {
    pub id: Uuid,
    pub user_id: String,
    pub task_type: TaskType,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub status: TaskStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub dedupe_key: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub archived_at: DateTime<Utc>,
}

/// Whole-queue counters, always computed from the live store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub pending_count: u64,
    pub active_count: u64,
    /// Tasks completed since UTC midnight.
    pub completed_today: u64,
    /// Tasks failed since UTC midnight.
    pub failed_today: u64,
}

/// Per-user queue view for the HTTP/SSE layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserQueueStatus {
    pub pending: Vec<Task>,
    pub active: Vec<Task>,
    /// Most recent terminal tasks still in the live store.
    pub recent: Vec<Task>,
    pub stats: UserQueueStats,
}

/// Counts derived from the lists in [`UserQueueStatus`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserQueueStats {
    pub pending_count: usize,
    pub active_count: usize,
    pub recent_completed: usize,
    pub recent_failed: usize,
}

/// Event emitted on every task status transition, including creation.
///
/// The HTTP layer forwards these over SSE as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEvent {
    pub task_id: Uuid,
    pub user_id: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskEvent {
    /// Build an event from a task's current state.
    pub fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.id,
            user_id: task.user_id.clone(),
            task_type: task.task_type.clone(),
            status: task.status,
            result: task.result.clone(),
            error: task.error.clone(),
        }
    }
}
