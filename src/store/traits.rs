//! `TaskStore` trait — the durable source of truth for task lifecycle.
//!
//! Backend-agnostic so tests can swap an in-memory database under the same
//! contract. Every cross-caller invariant (atomic claim, open-dedupe
//! uniqueness) must hold at this layer, never only in process memory,
//! because the scheduler, the HTTP layer, and the worker are independent
//! callers.
//!
//! Methods that stamp lifecycle timestamps take an explicit `now` so edge
//! cases (stale heartbeats, archiving thresholds) are testable without a
//! mocked clock. The `QueueService` always passes `Utc::now()`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::task::{Task, TaskHistoryEntry, TaskStatus, TaskType};

/// Counts of live tasks per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

/// Durable record of tasks and their lifecycle.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new pending task.
    ///
    /// Fails with [`DatabaseError::Constraint`] if an open (pending or
    /// processing) task with the same dedupe key already exists.
    async fn insert_task(&self, task: &Task) -> Result<(), DatabaseError>;

    /// Get a live task by ID.
    async fn get_task(&self, id: Uuid) -> Result<Option<Task>, DatabaseError>;

    /// Get the open (pending or processing) task for a dedupe key, if any.
    async fn get_open_task(&self, dedupe_key: &str) -> Result<Option<Task>, DatabaseError>;

    /// Atomically claim the best eligible pending task: `scheduled_for ≤
    /// now`, owner not in `excluded_users`, ordered by priority DESC, then
    /// `scheduled_for`, then creation. The claimed task transitions to
    /// `processing` with `started_at = now` in the same statement, so two
    /// concurrent callers can never claim the same task.
    async fn claim_next(
        &self,
        now: DateTime<Utc>,
        excluded_users: &[String],
    ) -> Result<Option<Task>, DatabaseError>;

    /// `processing -> completed`, storing the result and clearing any
    /// earlier retry error. Returns false if the task was not processing.
    async fn mark_completed(
        &self,
        id: Uuid,
        result: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    /// `processing -> failed` (terminal). Returns false if the task was not
    /// processing.
    async fn mark_failed(
        &self,
        id: Uuid,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    /// `processing -> pending` for a retry: bumps `retry_count`, records the
    /// failure message, clears the heartbeat, and defers the next claim to
    /// `scheduled_for`. Returns false if the task was not processing.
    async fn mark_retrying(
        &self,
        id: Uuid,
        error: &str,
        retry_count: u32,
        scheduled_for: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    /// `pending -> cancelled`. Returns false if the task was not pending —
    /// a processing task cannot be interrupted.
    async fn mark_cancelled(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, DatabaseError>;

    /// Live tasks for a user in any of the given statuses, soonest
    /// `scheduled_for` first.
    async fn list_user_tasks(
        &self,
        user_id: &str,
        statuses: &[TaskStatus],
        limit: usize,
    ) -> Result<Vec<Task>, DatabaseError>;

    /// Most recent terminal tasks for a user still in the live store.
    async fn recent_user_tasks(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<Task>, DatabaseError>;

    /// Live task counts per status.
    async fn count_by_status(&self) -> Result<StatusCounts, DatabaseError>;

    /// `(completed, failed)` counts with `completed_at >= since`, across
    /// live tasks and history.
    async fn terminal_counts_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<(u64, u64), DatabaseError>;

    /// Processing tasks whose heartbeat (`started_at`) is older than
    /// `cutoff` — presumed abandoned by a crashed or hung worker.
    async fn list_stale_processing(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Task>, DatabaseError>;

    /// Latest completion time of the given task type for a user, across
    /// live tasks and history. Drives recurring cadence.
    async fn last_completed_at(
        &self,
        user_id: &str,
        task_type: &TaskType,
    ) -> Result<Option<DateTime<Utc>>, DatabaseError>;

    /// Move a single terminal task into history and delete it from the
    /// live store. Returns false if the task is missing or not terminal.
    async fn archive_task(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, DatabaseError>;

    /// Move terminal tasks with `completed_at <= cutoff` into history and
    /// delete them from the live store. Returns the number archived.
    async fn archive_terminal_before(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<usize, DatabaseError>;

    /// Delete history entries archived before `cutoff`. Returns the number
    /// pruned.
    async fn prune_history_before(&self, cutoff: DateTime<Utc>) -> Result<usize, DatabaseError>;

    /// Archived tasks for a user, most recently archived first.
    async fn user_history(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<TaskHistoryEntry>, DatabaseError>;
}
