//! Worker — drives task execution without violating fairness or
//! concurrency limits.
//!
//! One logical claim loop per process. Handler invocations are spawned so
//! their I/O waits interleave, but all claim/completion bookkeeping runs
//! through this instance's counters, owned here rather than in module
//! globals so tests can isolate workers.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::queue::{QueueService, TaskFailure};
use crate::task::{Task, TaskType};
use crate::worker::registry::{HandlerRegistry, TaskContext, TaskHandler};

/// Snapshot of the worker's execution state.
#[derive(Debug, Clone)]
pub struct WorkerStatus {
    pub running: bool,
    /// Tasks currently executing.
    pub processing: usize,
    /// Executing task counts per user.
    pub processing_by_user: HashMap<String, usize>,
}

#[derive(Default)]
struct Inflight {
    total: usize,
    by_user: HashMap<String, usize>,
}

/// The execution loop over the queue service.
pub struct Worker {
    config: WorkerConfig,
    queue: Arc<QueueService>,
    registry: Arc<HandlerRegistry>,
    inflight: Mutex<Inflight>,
    running: AtomicBool,
    shutdown: watch::Sender<bool>,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl Worker {
    pub fn new(
        queue: Arc<QueueService>,
        registry: Arc<HandlerRegistry>,
        config: WorkerConfig,
    ) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            config,
            queue,
            registry,
            inflight: Mutex::new(Inflight::default()),
            running: AtomicBool::new(false),
            shutdown,
            loops: Mutex::new(Vec::new()),
        })
    }

    /// Register a handler for a task type. Expected before `start`.
    pub fn register_handler(&self, task_type: TaskType, handler: Arc<dyn TaskHandler>) {
        self.registry.register(task_type, handler);
    }

    pub fn has_handler(&self, task_type: &TaskType) -> bool {
        self.registry.has(task_type)
    }

    /// Start the claim loop and the maintenance loop.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("Worker already running");
            return;
        }
        let _ = self.shutdown.send(false);

        info!(
            max_concurrent = self.config.max_concurrent,
            max_per_user = self.config.max_per_user,
            poll_ms = self.config.poll_interval.as_millis() as u64,
            "Worker starting"
        );

        let poll = {
            let worker = Arc::clone(self);
            tokio::spawn(async move { worker.poll_loop().await })
        };
        let maintenance = {
            let worker = Arc::clone(self);
            tokio::spawn(async move { worker.maintenance_loop().await })
        };

        if let Ok(mut loops) = self.loops.lock() {
            loops.push(poll);
            loops.push(maintenance);
        }
    }

    /// Stop the loops and wait for in-flight handlers to finish. Handlers
    /// are never preempted.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown.send(true);

        let handles: Vec<JoinHandle<()>> = self
            .loops
            .lock()
            .map(|mut l| l.drain(..).collect())
            .unwrap_or_default();
        for handle in handles {
            let _ = handle.await;
        }

        // Drain in-flight handler invocations.
        loop {
            let total = self.inflight.lock().map(|i| i.total).unwrap_or(0);
            if total == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }

        info!("Worker stopped");
    }

    pub fn status(&self) -> WorkerStatus {
        let (processing, processing_by_user) = self
            .inflight
            .lock()
            .map(|i| (i.total, i.by_user.clone()))
            .unwrap_or((0, HashMap::new()));

        WorkerStatus {
            running: self.running.load(Ordering::SeqCst),
            processing,
            processing_by_user,
        }
    }

    // ── Claim loop ──────────────────────────────────────────────────

    async fn poll_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        let mut shutdown = self.shutdown.subscribe();

        loop {
            tokio::select! {
                _ = ticker.tick() => self.drain_eligible().await,
                _ = shutdown.changed() => break,
            }
        }
    }

    /// Claim tasks while both caps have headroom. Saturated users are
    /// excluded from eligibility before claiming — a claimed task is
    /// committed to `processing` and must run.
    async fn drain_eligible(self: &Arc<Self>) {
        loop {
            let excluded = {
                let Ok(inflight) = self.inflight.lock() else {
                    return;
                };
                if inflight.total >= self.config.max_concurrent {
                    return;
                }
                inflight
                    .by_user
                    .iter()
                    .filter(|(_, count)| **count >= self.config.max_per_user)
                    .map(|(user, _)| user.clone())
                    .collect::<Vec<_>>()
            };

            match self.queue.claim_next(&excluded).await {
                Ok(Some(task)) => {
                    if let Ok(mut inflight) = self.inflight.lock() {
                        inflight.total += 1;
                        *inflight.by_user.entry(task.user_id.clone()).or_insert(0) += 1;
                    }
                    let worker = Arc::clone(self);
                    tokio::spawn(async move { worker.dispatch(task).await });
                }
                Ok(None) => return,
                Err(e) => {
                    warn!(error = %e, "Claim failed, retrying next tick");
                    return;
                }
            }
        }
    }

    /// Execute one claimed task and report exactly one terminal queue call,
    /// whatever the handler does.
    async fn dispatch(self: Arc<Self>, task: Task) {
        let outcome = match self.registry.get(&task.task_type) {
            None => {
                // A deployment bug, not a runtime fault.
                error!(
                    task_id = %task.id,
                    task_type = %task.task_type,
                    "No handler registered for task type"
                );
                Err(TaskFailure::fatal(format!(
                    "unknown task type: {}",
                    task.task_type
                )))
            }
            Some(handler) => {
                let ctx = TaskContext::from_task(&task);
                match AssertUnwindSafe(handler.run(ctx)).catch_unwind().await {
                    Ok(Ok(result)) => Ok(result),
                    Ok(Err(e)) => Err(TaskFailure {
                        retryable: e.is_retryable(),
                        message: e.to_string(),
                    }),
                    Err(_) => Err(TaskFailure::retryable("task handler panicked")),
                }
            }
        };

        let report = match outcome {
            Ok(result) => self.queue.complete_task(task.id, result).await,
            Err(failure) => self.queue.fail_task(task.id, failure).await,
        };
        if let Err(e) = report {
            error!(task_id = %task.id, error = %e, "Failed to record task outcome");
        }

        self.release(&task.user_id);
    }

    fn release(&self, user_id: &str) {
        if let Ok(mut inflight) = self.inflight.lock() {
            inflight.total = inflight.total.saturating_sub(1);
            if let Some(count) = inflight.by_user.get_mut(user_id) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    inflight.by_user.remove(user_id);
                }
            }
        }
    }

    // ── Maintenance loop ────────────────────────────────────────────

    async fn maintenance_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.maintenance_interval);
        // Skip the immediate first tick.
        ticker.tick().await;
        let mut shutdown = self.shutdown.subscribe();

        loop {
            tokio::select! {
                _ = ticker.tick() => self.run_maintenance().await,
                _ = shutdown.changed() => break,
            }
        }
    }

    async fn run_maintenance(&self) {
        match self
            .queue
            .recover_stale_tasks(self.config.stale_threshold)
            .await
        {
            Ok(outcome) if outcome.retried + outcome.failed > 0 => {
                info!(
                    retried = outcome.retried,
                    failed = outcome.failed,
                    "Recovered stale tasks"
                );
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Stale task recovery failed"),
        }

        if let Err(e) = self.queue.archive_old_tasks(self.config.archive_after).await {
            warn!(error = %e, "Task archiving failed");
        }
        if let Err(e) = self
            .queue
            .cleanup_old_history(self.config.history_retention)
            .await
        {
            warn!(error = %e, "History cleanup failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::store::{LibSqlStore, TaskStore};
    use crate::task::TaskStatus;
    use async_trait::async_trait;
    use serde_json::Value;
    use crate::worker::registry::HandlerError;

    struct OkHandler;

    #[async_trait]
    impl TaskHandler for OkHandler {
        async fn run(&self, ctx: TaskContext) -> Result<Value, HandlerError> {
            Ok(serde_json::json!({ "echo": ctx.payload }))
        }
    }

    async fn make_worker(config: WorkerConfig) -> (Arc<QueueService>, Arc<Worker>) {
        let store: Arc<dyn TaskStore> = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let queue = QueueService::new(store, QueueConfig::default());
        let worker = Worker::new(
            queue.clone(),
            Arc::new(HandlerRegistry::new()),
            config,
        );
        (queue, worker)
    }

    fn fast_config() -> WorkerConfig {
        WorkerConfig {
            poll_interval: Duration::from_millis(10),
            maintenance_interval: Duration::from_secs(3600),
            ..Default::default()
        }
    }

    async fn wait_for_status(
        queue: &QueueService,
        id: uuid::Uuid,
        status: TaskStatus,
    ) -> crate::task::Task {
        for _ in 0..200 {
            if let Some(task) = queue.get_task(id).await.unwrap()
                && task.status == status
            {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {id} never reached {status}");
    }

    #[tokio::test]
    async fn executes_registered_handler() {
        let (queue, worker) = make_worker(fast_config()).await;
        worker.register_handler(TaskType::focus_calculation(), Arc::new(OkHandler));
        worker.start();

        let task = queue.push_focus_calculation("u1").await.unwrap();
        let done = wait_for_status(&queue, task.id, TaskStatus::Completed).await;
        assert!(done.result.is_some());
        assert!(done.started_at.unwrap() <= done.completed_at.unwrap());

        worker.stop().await;
        let status = worker.status();
        assert!(!status.running);
        assert_eq!(status.processing, 0);
        assert!(status.processing_by_user.is_empty());
    }

    #[tokio::test]
    async fn unknown_task_type_fails_fatally() {
        let (queue, worker) = make_worker(fast_config()).await;
        worker.start();

        let task = queue
            .push_task(
                "u1",
                TaskType::new("no-such-type"),
                serde_json::json!({}),
                Default::default(),
            )
            .await
            .unwrap();

        let failed = wait_for_status(&queue, task.id, TaskStatus::Failed).await;
        assert_eq!(failed.retry_count, 0);
        assert!(
            failed
                .error
                .as_deref()
                .unwrap_or_default()
                .contains("unknown task type")
        );

        worker.stop().await;
    }

    #[tokio::test]
    async fn panicking_handler_is_retried() {
        struct PanicOnce;

        #[async_trait]
        impl TaskHandler for PanicOnce {
            async fn run(&self, ctx: TaskContext) -> Result<Value, HandlerError> {
                if ctx.retry_count == 0 {
                    panic!("boom");
                }
                Ok(serde_json::json!({ "recovered": true }))
            }
        }

        let (queue, worker) = make_worker(fast_config()).await;
        worker.register_handler(TaskType::quiz_generation(), Arc::new(PanicOnce));
        worker.start();

        let task = queue
            .push_task(
                "u1",
                TaskType::quiz_generation(),
                serde_json::json!({}),
                crate::queue::PushOptions {
                    max_retries: Some(2),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        // First attempt panics, the retry is deferred by backoff; just
        // verify the panic was recorded as a retryable failure. Poll for
        // the retried state (not bare `Pending`, which also matches the
        // task's initial state before the worker claims it).
        let mut retried = None;
        for _ in 0..200 {
            if let Some(t) = queue.get_task(task.id).await.unwrap()
                && t.status == TaskStatus::Pending
                && t.retry_count > 0
            {
                retried = Some(t);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let retried = retried.expect("task was never retried");
        assert_eq!(retried.retry_count, 1);
        assert!(
            retried
                .error
                .as_deref()
                .unwrap_or_default()
                .contains("panicked")
        );

        worker.stop().await;
    }
}
