//! Configuration types.

use std::time::Duration;

/// Queue service configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Default retry budget for tasks enqueued without an explicit one.
    pub default_max_retries: u32,
    /// First retry delay; doubles per attempt.
    pub backoff_base: Duration,
    /// Upper bound on the retry delay.
    pub backoff_cap: Duration,
    /// Capacity of the task event broadcast channel.
    pub event_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_max_retries: 3,
            backoff_base: Duration::from_secs(5),
            backoff_cap: Duration::from_secs(300), // 5 minutes
            event_capacity: 256,
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Claim loop interval.
    pub poll_interval: Duration,
    /// Maintenance sweep interval (stale recovery, archiving).
    pub maintenance_interval: Duration,
    /// Maximum simultaneously processing tasks across all users.
    pub max_concurrent: usize,
    /// Maximum simultaneously processing tasks per user.
    pub max_per_user: usize,
    /// Processing tasks whose heartbeat is older than this are presumed
    /// abandoned by a crashed worker.
    pub stale_threshold: Duration,
    /// Terminal tasks older than this are moved into history.
    pub archive_after: Duration,
    /// History entries older than this are pruned.
    pub history_retention: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            maintenance_interval: Duration::from_secs(60),
            max_concurrent: 5,
            max_per_user: 1,
            stale_threshold: Duration::from_secs(600), // 10 minutes
            archive_after: Duration::from_secs(3600),  // 1 hour
            history_retention: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

/// Recurring scheduler configuration.
///
/// Tick intervals are deliberately finer-grained than any per-user interval
/// so a user's own cadence is honored promptly once due.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often due users are evaluated for focus calculation.
    pub focus_tick: Duration,
    /// How often due users are evaluated for summarization.
    pub summarization_tick: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            focus_tick: Duration::from_secs(10),
            summarization_tick: Duration::from_secs(30),
        }
    }
}
