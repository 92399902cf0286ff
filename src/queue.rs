//! Queue service — the sole mutator of the task store.
//!
//! Every lifecycle transition goes through here so the state machine and
//! the dedupe guarantee are enforced in one place. Each transition
//! (including creation) is broadcast as a [`TaskEvent`] for the HTTP layer
//! to fan out over SSE.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::{DatabaseError, Error, QueueError, Result};
use crate::store::TaskStore;
use crate::task::{
    QueueStats, Task, TaskEvent, TaskHistoryEntry, TaskStatus, TaskType, UserQueueStats,
    UserQueueStatus,
};

/// Options for [`QueueService::push_task`].
#[derive(Debug, Clone, Default)]
pub struct PushOptions {
    /// Higher claims first among eligible pending tasks.
    pub priority: i32,
    /// Retry budget; defaults to the queue's configured budget.
    pub max_retries: Option<u32>,
    /// Explicit dedupe key; defaults to `"{user_id}:{task_type}"`.
    pub dedupe_key: Option<String>,
    /// Earliest claim delay from now.
    pub delay: Option<Duration>,
}

/// A classified handler failure, reported by the worker.
#[derive(Debug, Clone)]
pub struct TaskFailure {
    pub message: String,
    pub retryable: bool,
}

impl TaskFailure {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

/// Outcome of a stale-task sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StaleRecovery {
    /// Tasks reverted to pending with an incremented retry count.
    pub retried: usize,
    /// Tasks failed terminally because their budget was exhausted.
    pub failed: usize,
}

/// Creation, deduplication, and lifecycle transition API over the task store.
pub struct QueueService {
    store: Arc<dyn TaskStore>,
    config: QueueConfig,
    events: broadcast::Sender<TaskEvent>,
}

impl QueueService {
    pub fn new(store: Arc<dyn TaskStore>, config: QueueConfig) -> Arc<Self> {
        let (events, _rx) = broadcast::channel(config.event_capacity);
        Arc::new(Self {
            store,
            config,
            events,
        })
    }

    /// Subscribe to task status transition events.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    fn emit(&self, task: &Task) {
        // Ok if no receivers are listening.
        let _ = self.events.send(TaskEvent::from_task(task));
    }

    // ── Enqueue ─────────────────────────────────────────────────────

    /// Enqueue a task, or return the existing open task for the same
    /// dedupe key (idempotent enqueue).
    ///
    /// The store's partial unique index backs this: if another caller
    /// inserts between our lookup and our insert, the insert fails on the
    /// constraint and we return the winner instead.
    pub async fn push_task(
        &self,
        user_id: &str,
        task_type: TaskType,
        payload: serde_json::Value,
        opts: PushOptions,
    ) -> Result<Task> {
        let dedupe_key = opts
            .dedupe_key
            .clone()
            .unwrap_or_else(|| Task::default_dedupe_key(user_id, &task_type));

        for _ in 0..3 {
            if let Some(existing) = self.store.get_open_task(&dedupe_key).await? {
                debug!(
                    task_id = %existing.id,
                    dedupe_key = %dedupe_key,
                    "Returning existing open task"
                );
                return Ok(existing);
            }

            let now = Utc::now();
            let task = Task {
                id: Uuid::new_v4(),
                user_id: user_id.to_string(),
                task_type: task_type.clone(),
                payload: payload.clone(),
                priority: opts.priority,
                status: TaskStatus::Pending,
                result: None,
                error: None,
                retry_count: 0,
                max_retries: opts.max_retries.unwrap_or(self.config.default_max_retries),
                dedupe_key: dedupe_key.clone(),
                created_at: now,
                started_at: None,
                completed_at: None,
                scheduled_for: now + opts.delay.unwrap_or_default(),
            };

            match self.store.insert_task(&task).await {
                Ok(()) => {
                    info!(
                        task_id = %task.id,
                        user_id = %user_id,
                        task_type = %task.task_type,
                        "Task enqueued"
                    );
                    self.emit(&task);
                    return Ok(task);
                }
                // Lost the race — loop around and pick up the winner.
                Err(DatabaseError::Constraint(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(DatabaseError::Constraint(format!(
            "could not enqueue or find open task for dedupe key {dedupe_key}"
        ))
        .into())
    }

    /// Enqueue a recurring task, spacing it by the user's last completed
    /// run of the same type. Called early, the task is deferred to
    /// `last_completed + interval`; the dedupe key keeps a still-open
    /// previous run from double-firing.
    pub async fn schedule_recurring(
        &self,
        user_id: &str,
        task_type: TaskType,
        payload: serde_json::Value,
        interval: Duration,
    ) -> Result<Task> {
        let now = Utc::now();
        let delay = match self.store.last_completed_at(user_id, &task_type).await? {
            Some(last) => {
                let due = last
                    + chrono::Duration::from_std(interval).unwrap_or(chrono::Duration::zero());
                (due - now).to_std().unwrap_or_default()
            }
            None => Duration::ZERO,
        };

        self.push_task(
            user_id,
            task_type,
            payload,
            PushOptions {
                delay: Some(delay),
                ..Default::default()
            },
        )
        .await
    }

    // ── Convenience enqueues for the HTTP layer ─────────────────────

    pub async fn push_focus_calculation(&self, user_id: &str) -> Result<Task> {
        self.push_task(
            user_id,
            TaskType::focus_calculation(),
            serde_json::json!({ "userId": user_id }),
            PushOptions::default(),
        )
        .await
    }

    pub async fn push_quiz_generation(
        &self,
        user_id: &str,
        options: serde_json::Value,
    ) -> Result<Task> {
        let mut payload = serde_json::json!({ "userId": user_id });
        if let (Some(obj), Some(opts)) = (payload.as_object_mut(), options.as_object()) {
            // Options never override the task owner.
            for (k, v) in opts.iter().filter(|(k, _)| *k != "userId") {
                obj.insert(k.clone(), v.clone());
            }
        }
        self.push_task(
            user_id,
            TaskType::quiz_generation(),
            payload,
            PushOptions::default(),
        )
        .await
    }

    pub async fn push_summarization(
        &self,
        user_id: &str,
        visit_ids: Option<Vec<String>>,
    ) -> Result<Task> {
        let payload = match visit_ids {
            Some(ids) => serde_json::json!({ "userId": user_id, "visitIds": ids }),
            None => serde_json::json!({ "userId": user_id }),
        };
        self.push_task(
            user_id,
            TaskType::summarization(),
            payload,
            PushOptions::default(),
        )
        .await
    }

    // ── Claim & transitions ─────────────────────────────────────────

    /// Atomically claim the next eligible pending task, excluding users
    /// already at their concurrency cap.
    pub async fn claim_next(&self, excluded_users: &[String]) -> Result<Option<Task>> {
        match self.store.claim_next(Utc::now(), excluded_users).await? {
            Some(task) => {
                self.emit(&task);
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }

    /// Record a successful handler result. `processing -> completed`.
    pub async fn complete_task(&self, id: Uuid, result: serde_json::Value) -> Result<Task> {
        if !self.store.mark_completed(id, &result, Utc::now()).await? {
            return Err(self.transition_error(id, TaskStatus::Completed).await);
        }

        let task = self.must_get(id).await?;
        info!(task_id = %id, task_type = %task.task_type, "Task completed");
        self.emit(&task);
        Ok(task)
    }

    /// Record a handler failure: retryable failures with budget left go
    /// back to `pending` with exponential backoff, everything else is
    /// terminal `failed`.
    pub async fn fail_task(&self, id: Uuid, failure: TaskFailure) -> Result<Task> {
        let task = self
            .store
            .get_task(id)
            .await?
            .ok_or(Error::Queue(QueueError::TaskNotFound { id }))?;

        let applied = if failure.retryable && task.has_retry_budget() {
            let attempt = task.retry_count + 1;
            let delay = self.backoff_delay(attempt);
            warn!(
                task_id = %id,
                task_type = %task.task_type,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %failure.message,
                "Task failed, scheduling retry"
            );
            self.store
                .mark_retrying(id, &failure.message, attempt, Utc::now() + delay)
                .await?
        } else {
            warn!(
                task_id = %id,
                task_type = %task.task_type,
                retryable = failure.retryable,
                retry_count = task.retry_count,
                error = %failure.message,
                "Task failed terminally"
            );
            self.store
                .mark_failed(id, &failure.message, Utc::now())
                .await?
        };

        if !applied {
            return Err(self.transition_error(id, TaskStatus::Failed).await);
        }

        let task = self.must_get(id).await?;
        self.emit(&task);
        Ok(task)
    }

    /// Cancel a pending task. A processing task cannot be interrupted;
    /// cancelling it (or a terminal task) is an invalid transition.
    pub async fn cancel_task(&self, id: Uuid) -> Result<Task> {
        if !self.store.mark_cancelled(id, Utc::now()).await? {
            return Err(self.transition_error(id, TaskStatus::Cancelled).await);
        }

        let task = self.must_get(id).await?;
        info!(task_id = %id, "Task cancelled");
        self.emit(&task);
        Ok(task)
    }

    // ── Maintenance ─────────────────────────────────────────────────

    /// Recover processing tasks whose heartbeat exceeded `stale_threshold`:
    /// back to `pending` with `retry_count + 1` while budget remains,
    /// terminal `failed` otherwise.
    pub async fn recover_stale_tasks(&self, stale_threshold: Duration) -> Result<StaleRecovery> {
        let now = Utc::now();
        let cutoff = now
            - chrono::Duration::from_std(stale_threshold).unwrap_or(chrono::Duration::zero());

        let mut outcome = StaleRecovery::default();
        for task in self.store.list_stale_processing(cutoff).await? {
            const STALE_MSG: &str = "stale task: worker heartbeat expired";

            if task.has_retry_budget() {
                warn!(
                    task_id = %task.id,
                    task_type = %task.task_type,
                    started_at = ?task.started_at,
                    "Recovering stale task for retry"
                );
                if self
                    .store
                    .mark_retrying(task.id, STALE_MSG, task.retry_count + 1, now)
                    .await?
                {
                    outcome.retried += 1;
                    if let Some(task) = self.store.get_task(task.id).await? {
                        self.emit(&task);
                    }
                }
            } else {
                warn!(
                    task_id = %task.id,
                    task_type = %task.task_type,
                    "Stale task out of retries, failing"
                );
                if self
                    .store
                    .mark_failed(task.id, &format!("{STALE_MSG}; retries exhausted"), now)
                    .await?
                {
                    outcome.failed += 1;
                    if let Some(task) = self.store.get_task(task.id).await? {
                        self.emit(&task);
                    }
                }
            }
        }
        Ok(outcome)
    }

    /// Move a single terminal task into history immediately, without
    /// waiting for the periodic sweep.
    pub async fn archive_task(&self, id: Uuid) -> Result<()> {
        if self.store.archive_task(id, Utc::now()).await? {
            info!(task_id = %id, "Task archived");
            return Ok(());
        }
        match self.store.get_task(id).await? {
            Some(task) => Err(Error::Queue(QueueError::NotArchivable {
                id,
                status: task.status,
            })),
            None => Err(Error::Queue(QueueError::TaskNotFound { id })),
        }
    }

    /// Move terminal tasks older than `max_age` into history.
    pub async fn archive_old_tasks(&self, max_age: Duration) -> Result<usize> {
        let now = Utc::now();
        let cutoff = now - chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::zero());
        Ok(self.store.archive_terminal_before(cutoff, now).await?)
    }

    /// Prune history entries archived more than `max_age` ago.
    pub async fn cleanup_old_history(&self, max_age: Duration) -> Result<usize> {
        let cutoff =
            Utc::now() - chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::zero());
        Ok(self.store.prune_history_before(cutoff).await?)
    }

    // ── Read-only projections ───────────────────────────────────────

    pub async fn get_task(&self, id: Uuid) -> Result<Option<Task>> {
        Ok(self.store.get_task(id).await?)
    }

    pub async fn get_user_pending_tasks(&self, user_id: &str) -> Result<Vec<Task>> {
        Ok(self
            .store
            .list_user_tasks(user_id, &[TaskStatus::Pending], 100)
            .await?)
    }

    pub async fn get_user_queue_status(&self, user_id: &str) -> Result<UserQueueStatus> {
        let pending = self
            .store
            .list_user_tasks(user_id, &[TaskStatus::Pending], 100)
            .await?;
        let active = self
            .store
            .list_user_tasks(user_id, &[TaskStatus::Processing], 100)
            .await?;
        let recent = self.store.recent_user_tasks(user_id, 20).await?;

        let stats = UserQueueStats {
            pending_count: pending.len(),
            active_count: active.len(),
            recent_completed: recent
                .iter()
                .filter(|t| t.status == TaskStatus::Completed)
                .count(),
            recent_failed: recent
                .iter()
                .filter(|t| t.status == TaskStatus::Failed)
                .count(),
        };

        Ok(UserQueueStatus {
            pending,
            active,
            recent,
            stats,
        })
    }

    pub async fn get_queue_stats(&self) -> Result<QueueStats> {
        let counts = self.store.count_by_status().await?;
        let midnight = utc_midnight(Utc::now());
        let (completed_today, failed_today) = self.store.terminal_counts_since(midnight).await?;

        Ok(QueueStats {
            pending_count: counts.pending,
            active_count: counts.processing,
            completed_today,
            failed_today,
        })
    }

    pub async fn get_user_history(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<TaskHistoryEntry>> {
        Ok(self.store.user_history(user_id, limit).await?)
    }

    /// Latest completion time of a task type for a user. Used by the
    /// recurring scheduler to compute due-ness.
    pub async fn last_completed_at(
        &self,
        user_id: &str,
        task_type: &TaskType,
    ) -> Result<Option<DateTime<Utc>>> {
        Ok(self.store.last_completed_at(user_id, task_type).await?)
    }

    // ── Internals ───────────────────────────────────────────────────

    async fn must_get(&self, id: Uuid) -> Result<Task> {
        self.store
            .get_task(id)
            .await?
            .ok_or(Error::Queue(QueueError::TaskNotFound { id }))
    }

    async fn transition_error(&self, id: Uuid, target: TaskStatus) -> Error {
        match self.store.get_task(id).await {
            Ok(Some(task)) => Error::Queue(QueueError::InvalidTransition {
                id,
                status: task.status,
                target,
            }),
            Ok(None) => Error::Queue(QueueError::TaskNotFound { id }),
            Err(e) => e.into(),
        }
    }

    /// Exponential backoff with a cap and up to 10% jitter.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let exp = self.config.backoff_base.saturating_mul(1 << shift);
        let capped = exp.min(self.config.backoff_cap);
        let jitter_ms = (capped.as_millis() as u64 / 10).max(1);
        capped + Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
    }
}

fn utc_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(chrono::NaiveTime::MIN).and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlStore;

    async fn make_queue() -> (Arc<dyn TaskStore>, Arc<QueueService>) {
        let store: Arc<dyn TaskStore> = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let queue = QueueService::new(store.clone(), QueueConfig::default());
        (store, queue)
    }

    /// A pending task that was already due at `due`, so a back-dated
    /// `claim_next(due, ..)` can pick it up (simulating an old heartbeat).
    fn backdated_task(user: &str, ty: TaskType, max_retries: u32, due: DateTime<Utc>) -> Task {
        Task {
            id: Uuid::new_v4(),
            user_id: user.to_string(),
            task_type: ty.clone(),
            payload: serde_json::json!({ "userId": user }),
            priority: 0,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            retry_count: 0,
            max_retries,
            dedupe_key: Task::default_dedupe_key(user, &ty),
            created_at: due,
            started_at: None,
            completed_at: None,
            scheduled_for: due,
        }
    }

    #[tokio::test]
    async fn push_is_idempotent_per_dedupe_key() {
        let (_, queue) = make_queue().await;

        let first = queue.push_focus_calculation("u1").await.unwrap();
        let second = queue.push_focus_calculation("u1").await.unwrap();
        assert_eq!(first.id, second.id);

        // Once terminal, a new push creates a new task.
        queue.claim_next(&[]).await.unwrap().unwrap();
        queue
            .complete_task(first.id, serde_json::json!({}))
            .await
            .unwrap();
        let third = queue.push_focus_calculation("u1").await.unwrap();
        assert_ne!(first.id, third.id);
    }

    #[tokio::test]
    async fn explicit_dedupe_key_overrides_default() {
        let (_, queue) = make_queue().await;

        let opts = PushOptions {
            dedupe_key: Some("custom".into()),
            ..Default::default()
        };
        let a = queue
            .push_task(
                "u1",
                TaskType::focus_calculation(),
                serde_json::json!({}),
                opts.clone(),
            )
            .await
            .unwrap();
        let b = queue
            .push_task(
                "u2",
                TaskType::quiz_generation(),
                serde_json::json!({}),
                opts,
            )
            .await
            .unwrap();
        // Same explicit key dedupes across users and types.
        assert_eq!(a.id, b.id);
    }

    #[tokio::test]
    async fn retryable_failure_backs_off_then_exhausts() {
        let (store, queue) = make_queue().await;
        let task = queue
            .push_task(
                "u1",
                TaskType::quiz_generation(),
                serde_json::json!({}),
                PushOptions {
                    max_retries: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        queue.claim_next(&[]).await.unwrap().unwrap();
        let retried = queue
            .fail_task(task.id, TaskFailure::retryable("rate limited"))
            .await
            .unwrap();
        assert_eq!(retried.status, TaskStatus::Pending);
        assert_eq!(retried.retry_count, 1);
        assert!(retried.scheduled_for > Utc::now());

        // Backoff defers the retry, so it is not claimable yet.
        assert!(queue.claim_next(&[]).await.unwrap().is_none());

        // Claim once the backoff has elapsed, then fail again: the budget
        // of 1 is spent, so even a retryable failure is terminal.
        let claimed = store
            .claim_next(Utc::now() + chrono::Duration::minutes(10), &[])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, task.id);

        let failed = queue
            .fail_task(task.id, TaskFailure::retryable("rate limited again"))
            .await
            .unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.retry_count, failed.max_retries);
        assert_eq!(failed.error.as_deref(), Some("rate limited again"));

        // Terminal: never claimable again.
        assert!(
            store
                .claim_next(Utc::now() + chrono::Duration::hours(1), &[])
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn non_retryable_failure_is_terminal() {
        let (_, queue) = make_queue().await;
        let task = queue.push_quiz_generation("u1", serde_json::json!({})).await.unwrap();

        queue.claim_next(&[]).await.unwrap().unwrap();
        let failed = queue
            .fail_task(task.id, TaskFailure::fatal("not enough activity data"))
            .await
            .unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.retry_count, 0);
        assert_eq!(failed.error.as_deref(), Some("not enough activity data"));
    }

    #[tokio::test]
    async fn cancel_rejected_while_processing() {
        let (_, queue) = make_queue().await;
        let task = queue.push_focus_calculation("u1").await.unwrap();

        queue.claim_next(&[]).await.unwrap().unwrap();
        let err = queue.cancel_task(task.id).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Queue(QueueError::InvalidTransition {
                status: TaskStatus::Processing,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn events_emitted_on_transitions() {
        let (_, queue) = make_queue().await;
        let mut rx = queue.subscribe();

        let task = queue.push_focus_calculation("u1").await.unwrap();
        let created = rx.recv().await.unwrap();
        assert_eq!(created.task_id, task.id);
        assert_eq!(created.status, TaskStatus::Pending);

        queue.claim_next(&[]).await.unwrap().unwrap();
        assert_eq!(rx.recv().await.unwrap().status, TaskStatus::Processing);

        queue
            .complete_task(task.id, serde_json::json!({"ok": true}))
            .await
            .unwrap();
        let done = rx.recv().await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.result, Some(serde_json::json!({"ok": true})));
    }

    #[tokio::test]
    async fn stale_recovery_retries_then_fails() {
        let (store, queue) = make_queue().await;

        // Simulate a crashed worker: claim with an old heartbeat.
        let old = Utc::now() - chrono::Duration::minutes(30);
        let with_budget = backdated_task("u1", TaskType::focus_calculation(), 3, old);
        store.insert_task(&with_budget).await.unwrap();
        store.claim_next(old, &[]).await.unwrap().unwrap();

        let outcome = queue
            .recover_stale_tasks(Duration::from_secs(600))
            .await
            .unwrap();
        assert_eq!(outcome.retried, 1);
        assert_eq!(outcome.failed, 0);

        let recovered = queue.get_task(with_budget.id).await.unwrap().unwrap();
        assert_eq!(recovered.status, TaskStatus::Pending);
        assert_eq!(recovered.retry_count, 1);

        // Exhaust the budget, then go stale again.
        let task = backdated_task("u2", TaskType::summarization(), 0, old);
        store.insert_task(&task).await.unwrap();
        store
            .claim_next(old, &["u1".to_string()])
            .await
            .unwrap()
            .unwrap();

        let outcome = queue
            .recover_stale_tasks(Duration::from_secs(600))
            .await
            .unwrap();
        assert_eq!(outcome.failed, 1);
        let dead = queue.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(dead.status, TaskStatus::Failed);
        assert!(dead.error.as_deref().unwrap_or_default().contains("stale"));
    }

    #[tokio::test]
    async fn quiz_options_cannot_override_owner() {
        let (_, queue) = make_queue().await;

        let task = queue
            .push_quiz_generation(
                "u1",
                serde_json::json!({ "userId": "someone-else", "questionCount": 3 }),
            )
            .await
            .unwrap();

        assert_eq!(task.user_id, "u1");
        assert_eq!(task.payload["userId"], "u1");
        assert_eq!(task.payload["questionCount"], 3);
    }

    #[tokio::test]
    async fn archive_single_task_requires_terminal() {
        let (_, queue) = make_queue().await;
        let task = queue.push_focus_calculation("u1").await.unwrap();

        // Still pending — not archivable.
        let err = queue.archive_task(task.id).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Queue(QueueError::NotArchivable {
                status: TaskStatus::Pending,
                ..
            })
        ));

        queue.claim_next(&[]).await.unwrap().unwrap();
        queue
            .complete_task(task.id, serde_json::json!({}))
            .await
            .unwrap();
        queue.archive_task(task.id).await.unwrap();

        // Gone from the live store, visible in history, and a second
        // archive reports not-found.
        assert!(queue.get_task(task.id).await.unwrap().is_none());
        let history = queue.get_user_history("u1", 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, task.id);
        assert!(matches!(
            queue.archive_task(task.id).await.unwrap_err(),
            Error::Queue(QueueError::TaskNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn queue_stats_counts_today() {
        let (_, queue) = make_queue().await;

        let a = queue.push_focus_calculation("u1").await.unwrap();
        queue.push_focus_calculation("u2").await.unwrap();
        queue.claim_next(&[]).await.unwrap().unwrap();
        queue.complete_task(a.id, serde_json::json!({})).await.unwrap();

        let stats = queue.get_queue_stats().await.unwrap();
        assert_eq!(stats.pending_count, 1);
        assert_eq!(stats.active_count, 0);
        assert_eq!(stats.completed_today, 1);
        assert_eq!(stats.failed_today, 0);
    }

    #[tokio::test]
    async fn recurring_defers_until_interval_elapses() {
        let (_, queue) = make_queue().await;
        let interval = Duration::from_secs(3600);

        // No previous run: due immediately.
        let first = queue
            .schedule_recurring(
                "u1",
                TaskType::focus_calculation(),
                serde_json::json!({ "userId": "u1" }),
                interval,
            )
            .await
            .unwrap();
        assert!(first.scheduled_for <= Utc::now());

        queue.claim_next(&[]).await.unwrap().unwrap();
        queue
            .complete_task(first.id, serde_json::json!({}))
            .await
            .unwrap();

        // Immediately re-scheduled: deferred by the interval.
        let second = queue
            .schedule_recurring(
                "u1",
                TaskType::focus_calculation(),
                serde_json::json!({ "userId": "u1" }),
                interval,
            )
            .await
            .unwrap();
        assert_ne!(second.id, first.id);
        assert!(second.scheduled_for > Utc::now() + chrono::Duration::minutes(50));

        // Calling again before the interval elapses dedupes onto the
        // deferred task instead of double-firing.
        let third = queue
            .schedule_recurring(
                "u1",
                TaskType::focus_calculation(),
                serde_json::json!({ "userId": "u1" }),
                interval,
            )
            .await
            .unwrap();
        assert_eq!(third.id, second.id);
    }
}
