//! Recurring task scheduling.
//!
//! One ticker per recurring task type, each firing more often than any
//! user's configured interval so a newly-due user is picked up promptly.
//! Due-ness itself lives in the queue: `schedule_recurring` defers the
//! task via `scheduled_for` and the dedupe key blocks double enqueue, so
//! a tick can safely re-offer every enabled user.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::error::ProviderError;
use crate::queue::QueueService;
use crate::task::TaskType;

/// Per-user recurring task configuration.
#[derive(Debug, Clone)]
pub struct RecurringUserSettings {
    pub user_id: String,
    pub enabled: bool,
    /// How often this user wants the task to run.
    pub interval: Duration,
}

/// Source of per-user enable flags and intervals.
#[async_trait]
pub trait UserSettingsStore: Send + Sync {
    async fn recurring_settings(
        &self,
        task_type: &TaskType,
    ) -> Result<Vec<RecurringUserSettings>, ProviderError>;
}

/// Enqueues recurring tasks for every enabled user on a fixed cadence.
pub struct RecurringScheduler {
    queue: Arc<QueueService>,
    settings: Arc<dyn UserSettingsStore>,
    config: SchedulerConfig,
    running: AtomicBool,
    shutdown: watch::Sender<bool>,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl RecurringScheduler {
    pub fn new(
        queue: Arc<QueueService>,
        settings: Arc<dyn UserSettingsStore>,
        config: SchedulerConfig,
    ) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            queue,
            settings,
            config,
            running: AtomicBool::new(false),
            shutdown,
            loops: Mutex::new(Vec::new()),
        })
    }

    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("Scheduler already running");
            return;
        }
        let _ = self.shutdown.send(false);

        info!(
            focus_ms = self.config.focus_tick.as_millis() as u64,
            summarization_ms = self.config.summarization_tick.as_millis() as u64,
            "Scheduler starting"
        );

        let tickers = [
            (TaskType::focus_calculation(), self.config.focus_tick),
            (TaskType::summarization(), self.config.summarization_tick),
        ];
        let mut handles = Vec::new();
        for (task_type, period) in tickers {
            let scheduler = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                scheduler.ticker(task_type, period).await;
            }));
        }
        if let Ok(mut loops) = self.loops.lock() {
            loops.extend(handles);
        }
    }

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
        info!("Scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn ticker(self: Arc<Self>, task_type: TaskType, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        let mut shutdown = self.shutdown.subscribe();
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick_now(&task_type).await;
                }
                _ = shutdown.changed() => break,
            }
        }
    }

    /// Run one scheduling pass for a task type. Returns how many tasks
    /// were offered to the queue. Per-user failures are logged and
    /// skipped; a settings fetch failure skips the whole tick.
    pub async fn tick_now(&self, task_type: &TaskType) -> usize {
        let settings = match self.settings.recurring_settings(task_type).await {
            Ok(settings) => settings,
            Err(e) => {
                warn!(task_type = %task_type, error = %e, "Settings fetch failed, skipping tick");
                return 0;
            }
        };

        let mut offered = 0;
        for user in settings.into_iter().filter(|s| s.enabled) {
            let payload = serde_json::json!({ "userId": user.user_id });
            match self
                .queue
                .schedule_recurring(&user.user_id, task_type.clone(), payload, user.interval)
                .await
            {
                Ok(_) => offered += 1,
                Err(e) => {
                    warn!(
                        user_id = %user.user_id,
                        task_type = %task_type,
                        error = %e,
                        "Recurring enqueue failed"
                    );
                }
            }
        }
        offered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::store::{LibSqlStore, TaskStore};
    use crate::task::TaskStatus;

    struct FixedSettings(Vec<RecurringUserSettings>);

    #[async_trait]
    impl UserSettingsStore for FixedSettings {
        async fn recurring_settings(
            &self,
            _task_type: &TaskType,
        ) -> Result<Vec<RecurringUserSettings>, ProviderError> {
            Ok(self.0.clone())
        }
    }

    async fn make_scheduler(settings: Vec<RecurringUserSettings>) -> (Arc<QueueService>, Arc<RecurringScheduler>) {
        let store: Arc<dyn TaskStore> = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let queue = QueueService::new(store, QueueConfig::default());
        let scheduler = RecurringScheduler::new(
            queue.clone(),
            Arc::new(FixedSettings(settings)),
            SchedulerConfig::default(),
        );
        (queue, scheduler)
    }

    fn enabled(user: &str) -> RecurringUserSettings {
        RecurringUserSettings {
            user_id: user.to_string(),
            enabled: true,
            interval: Duration::from_secs(600),
        }
    }

    #[tokio::test]
    async fn tick_enqueues_enabled_users_only() {
        let mut disabled = enabled("u2");
        disabled.enabled = false;
        let (queue, scheduler) = make_scheduler(vec![enabled("u1"), disabled]).await;

        let offered = scheduler.tick_now(&TaskType::focus_calculation()).await;
        assert_eq!(offered, 1);

        assert_eq!(queue.get_user_pending_tasks("u1").await.unwrap().len(), 1);
        assert!(queue.get_user_pending_tasks("u2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn repeated_ticks_do_not_duplicate() {
        let (queue, scheduler) = make_scheduler(vec![enabled("u1")]).await;

        scheduler.tick_now(&TaskType::focus_calculation()).await;
        scheduler.tick_now(&TaskType::focus_calculation()).await;
        scheduler.tick_now(&TaskType::focus_calculation()).await;

        let pending = queue.get_user_pending_tasks("u1").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].status, TaskStatus::Pending);
    }
}
