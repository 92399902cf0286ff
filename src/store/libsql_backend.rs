//! libSQL task store — async `TaskStore` implementation.
//!
//! Supports local file and in-memory databases. Claims and lifecycle
//! transitions are single-statement conditional updates, so the uniqueness
//! of a claim holds even with multiple claim loops over the same file.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{StatusCounts, TaskStore};
use crate::task::{Task, TaskHistoryEntry, TaskStatus, TaskType};

/// libSQL task store.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to open database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;
        info!(path = %path.display(), "Task store opened");

        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    /// Create an in-memory store (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;

        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

const TASK_COLUMNS: &str = "id, user_id, task_type, payload, priority, status, result, error, \
     retry_count, max_retries, dedupe_key, created_at, started_at, completed_at, scheduled_for";

const TERMINAL_STATUSES: &str = "('completed', 'failed', 'cancelled')";

/// Canonical timestamp write format. Fixed-width microseconds in UTC keeps
/// lexicographic SQL comparisons consistent with chronological order.
fn fmt_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn opt_text(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

/// Serialize a status slice as a JSON array for `json_each` binding.
fn statuses_json(statuses: &[TaskStatus]) -> String {
    let strs: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
    serde_json::to_string(&strs).unwrap_or_else(|_| "[]".to_string())
}

fn row_to_task(row: &libsql::Row) -> Result<Task, libsql::Error> {
    let id_str: String = row.get(0)?;
    let user_id: String = row.get(1)?;
    let task_type: String = row.get(2)?;
    let payload_str: String = row.get(3)?;
    let priority: i64 = row.get(4)?;
    let status_str: String = row.get(5)?;
    let result_str: Option<String> = row.get(6).ok();
    let error: Option<String> = row.get(7).ok();
    let retry_count: i64 = row.get(8)?;
    let max_retries: i64 = row.get(9)?;
    let dedupe_key: String = row.get(10)?;
    let created_str: String = row.get(11)?;
    let started_str: Option<String> = row.get(12).ok();
    let completed_str: Option<String> = row.get(13).ok();
    let scheduled_str: String = row.get(14)?;

    Ok(Task {
        id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
        user_id,
        task_type: TaskType::new(task_type),
        payload: serde_json::from_str(&payload_str).unwrap_or(serde_json::Value::Null),
        priority: priority as i32,
        status: TaskStatus::parse(&status_str).unwrap_or(TaskStatus::Failed),
        result: result_str.and_then(|s| serde_json::from_str(&s).ok()),
        error,
        retry_count: retry_count as u32,
        max_retries: max_retries as u32,
        dedupe_key,
        created_at: parse_datetime(&created_str),
        started_at: started_str.as_deref().map(parse_datetime),
        completed_at: completed_str.as_deref().map(parse_datetime),
        scheduled_for: parse_datetime(&scheduled_str),
    })
}

fn row_to_history(row: &libsql::Row) -> Result<TaskHistoryEntry, libsql::Error> {
    let id_str: String = row.get(0)?;
    let user_id: String = row.get(1)?;
    let task_type: String = row.get(2)?;
    let payload_str: String = row.get(3)?;
    let priority: i64 = row.get(4)?;
    let status_str: String = row.get(5)?;
    let result_str: Option<String> = row.get(6).ok();
    let error: Option<String> = row.get(7).ok();
    let retry_count: i64 = row.get(8)?;
    let max_retries: i64 = row.get(9)?;
    let dedupe_key: String = row.get(10)?;
    let created_str: String = row.get(11)?;
    let started_str: Option<String> = row.get(12).ok();
    let completed_str: Option<String> = row.get(13).ok();
    // Column 14 is scheduled_for, not surfaced on history entries.
    let archived_str: String = row.get(15)?;

    Ok(TaskHistoryEntry {
        id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
        user_id,
        task_type: TaskType::new(task_type),
        payload: serde_json::from_str(&payload_str).unwrap_or(serde_json::Value::Null),
        priority: priority as i32,
        status: TaskStatus::parse(&status_str).unwrap_or(TaskStatus::Failed),
        result: result_str.and_then(|s| serde_json::from_str(&s).ok()),
        error,
        retry_count: retry_count as u32,
        max_retries: max_retries as u32,
        dedupe_key,
        created_at: parse_datetime(&created_str),
        started_at: started_str.as_deref().map(parse_datetime),
        completed_at: completed_str.as_deref().map(parse_datetime),
        archived_at: parse_datetime(&archived_str),
    })
}

fn map_insert_err(e: libsql::Error) -> DatabaseError {
    let msg = e.to_string();
    if msg.contains("UNIQUE constraint failed") {
        DatabaseError::Constraint(format!("open task exists for dedupe key: {msg}"))
    } else {
        DatabaseError::Query(format!("insert_task: {msg}"))
    }
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl TaskStore for LibSqlStore {
    async fn insert_task(&self, task: &Task) -> Result<(), DatabaseError> {
        let payload = serde_json::to_string(&task.payload)
            .map_err(|e| DatabaseError::Serialization(format!("task payload: {e}")))?;
        let result = task
            .result
            .as_ref()
            .map(|r| serde_json::to_string(r))
            .transpose()
            .map_err(|e| DatabaseError::Serialization(format!("task result: {e}")))?;

        self.conn()
            .execute(
                &format!(
                    "INSERT INTO tasks ({TASK_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
                ),
                params![
                    task.id.to_string(),
                    task.user_id.clone(),
                    task.task_type.as_str(),
                    payload,
                    task.priority as i64,
                    task.status.as_str(),
                    opt_text(result),
                    opt_text(task.error.clone()),
                    task.retry_count as i64,
                    task.max_retries as i64,
                    task.dedupe_key.clone(),
                    fmt_ts(task.created_at),
                    opt_text(task.started_at.map(fmt_ts)),
                    opt_text(task.completed_at.map(fmt_ts)),
                    fmt_ts(task.scheduled_for),
                ],
            )
            .await
            .map_err(map_insert_err)?;

        debug!(task_id = %task.id, task_type = %task.task_type, user_id = %task.user_id, "Task inserted");
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<Task>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_task: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let task = row_to_task(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_task row parse: {e}")))?;
                Ok(Some(task))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_task: {e}"))),
        }
    }

    async fn get_open_task(&self, dedupe_key: &str) -> Result<Option<Task>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM tasks \
                     WHERE dedupe_key = ?1 AND status IN ('pending', 'processing')"
                ),
                params![dedupe_key],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_open_task: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let task = row_to_task(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_open_task row parse: {e}")))?;
                Ok(Some(task))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_open_task: {e}"))),
        }
    }

    async fn claim_next(
        &self,
        now: DateTime<Utc>,
        excluded_users: &[String],
    ) -> Result<Option<Task>, DatabaseError> {
        let excluded = serde_json::to_string(excluded_users)
            .map_err(|e| DatabaseError::Serialization(format!("excluded users: {e}")))?;

        // Select-and-claim in one statement. The inner SELECT picks the
        // best eligible candidate, the outer UPDATE only fires if it is
        // still pending, and RETURNING hands back the claimed row. A
        // concurrent claimer sees either a different candidate or zero
        // affected rows.
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "UPDATE tasks SET status = 'processing', started_at = ?1 \
                     WHERE id = ( \
                         SELECT id FROM tasks \
                         WHERE status = 'pending' AND scheduled_for <= ?1 \
                           AND user_id NOT IN (SELECT value FROM json_each(?2)) \
                         ORDER BY priority DESC, scheduled_for ASC, created_at ASC \
                         LIMIT 1 \
                     ) AND status = 'pending' \
                     RETURNING {TASK_COLUMNS}"
                ),
                params![fmt_ts(now), excluded],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("claim_next: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let task = row_to_task(&row)
                    .map_err(|e| DatabaseError::Query(format!("claim_next row parse: {e}")))?;
                debug!(task_id = %task.id, task_type = %task.task_type, "Task claimed");
                Ok(Some(task))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("claim_next: {e}"))),
        }
    }

    async fn mark_completed(
        &self,
        id: Uuid,
        result: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let result = serde_json::to_string(result)
            .map_err(|e| DatabaseError::Serialization(format!("task result: {e}")))?;

        let affected = self
            .conn()
            .execute(
                "UPDATE tasks SET status = 'completed', result = ?1, error = NULL, \
                 completed_at = ?2 WHERE id = ?3 AND status = 'processing'",
                params![result, fmt_ts(now), id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_completed: {e}")))?;

        Ok(affected > 0)
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE tasks SET status = 'failed', error = ?1, result = NULL, \
                 completed_at = ?2 WHERE id = ?3 AND status = 'processing'",
                params![error, fmt_ts(now), id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_failed: {e}")))?;

        Ok(affected > 0)
    }

    async fn mark_retrying(
        &self,
        id: Uuid,
        error: &str,
        retry_count: u32,
        scheduled_for: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE tasks SET status = 'pending', error = ?1, retry_count = ?2, \
                 started_at = NULL, scheduled_for = ?3 \
                 WHERE id = ?4 AND status = 'processing'",
                params![
                    error,
                    retry_count as i64,
                    fmt_ts(scheduled_for),
                    id.to_string()
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_retrying: {e}")))?;

        Ok(affected > 0)
    }

    async fn mark_cancelled(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE tasks SET status = 'cancelled', completed_at = ?1 \
                 WHERE id = ?2 AND status = 'pending'",
                params![fmt_ts(now), id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_cancelled: {e}")))?;

        Ok(affected > 0)
    }

    async fn list_user_tasks(
        &self,
        user_id: &str,
        statuses: &[TaskStatus],
        limit: usize,
    ) -> Result<Vec<Task>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM tasks \
                     WHERE user_id = ?1 AND status IN (SELECT value FROM json_each(?2)) \
                     ORDER BY scheduled_for ASC, created_at ASC LIMIT ?3"
                ),
                params![user_id, statuses_json(statuses), limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_user_tasks: {e}")))?;

        let mut tasks = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_user_tasks: {e}")))?
        {
            tasks.push(
                row_to_task(&row)
                    .map_err(|e| DatabaseError::Query(format!("list_user_tasks row parse: {e}")))?,
            );
        }
        Ok(tasks)
    }

    async fn recent_user_tasks(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<Task>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM tasks \
                     WHERE user_id = ?1 AND status IN {TERMINAL_STATUSES} \
                     ORDER BY completed_at DESC LIMIT ?2"
                ),
                params![user_id, limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("recent_user_tasks: {e}")))?;

        let mut tasks = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("recent_user_tasks: {e}")))?
        {
            tasks.push(row_to_task(&row).map_err(|e| {
                DatabaseError::Query(format!("recent_user_tasks row parse: {e}"))
            })?);
        }
        Ok(tasks)
    }

    async fn count_by_status(&self) -> Result<StatusCounts, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT status, COUNT(*) FROM tasks GROUP BY status", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("count_by_status: {e}")))?;

        let mut counts = StatusCounts::default();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("count_by_status: {e}")))?
        {
            let status: String = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("count_by_status: {e}")))?;
            let count: i64 = row
                .get(1)
                .map_err(|e| DatabaseError::Query(format!("count_by_status: {e}")))?;
            match TaskStatus::parse(&status) {
                Some(TaskStatus::Pending) => counts.pending = count as u64,
                Some(TaskStatus::Processing) => counts.processing = count as u64,
                Some(TaskStatus::Completed) => counts.completed = count as u64,
                Some(TaskStatus::Failed) => counts.failed = count as u64,
                Some(TaskStatus::Cancelled) => counts.cancelled = count as u64,
                None => {}
            }
        }
        Ok(counts)
    }

    async fn terminal_counts_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<(u64, u64), DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT \
                   (SELECT COUNT(*) FROM tasks \
                      WHERE status = 'completed' AND completed_at >= ?1) + \
                   (SELECT COUNT(*) FROM task_history \
                      WHERE status = 'completed' AND completed_at >= ?1), \
                   (SELECT COUNT(*) FROM tasks \
                      WHERE status = 'failed' AND completed_at >= ?1) + \
                   (SELECT COUNT(*) FROM task_history \
                      WHERE status = 'failed' AND completed_at >= ?1)",
                params![fmt_ts(since)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("terminal_counts_since: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let completed: i64 = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("terminal_counts_since: {e}")))?;
                let failed: i64 = row
                    .get(1)
                    .map_err(|e| DatabaseError::Query(format!("terminal_counts_since: {e}")))?;
                Ok((completed as u64, failed as u64))
            }
            Ok(None) => Ok((0, 0)),
            Err(e) => Err(DatabaseError::Query(format!("terminal_counts_since: {e}"))),
        }
    }

    async fn list_stale_processing(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Task>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM tasks \
                     WHERE status = 'processing' AND started_at <= ?1 \
                     ORDER BY started_at ASC"
                ),
                params![fmt_ts(cutoff)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_stale_processing: {e}")))?;

        let mut tasks = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_stale_processing: {e}")))?
        {
            tasks.push(row_to_task(&row).map_err(|e| {
                DatabaseError::Query(format!("list_stale_processing row parse: {e}"))
            })?);
        }
        Ok(tasks)
    }

    async fn last_completed_at(
        &self,
        user_id: &str,
        task_type: &TaskType,
    ) -> Result<Option<DateTime<Utc>>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT MAX(t) FROM ( \
                     SELECT MAX(completed_at) AS t FROM tasks \
                       WHERE user_id = ?1 AND task_type = ?2 AND status = 'completed' \
                     UNION ALL \
                     SELECT MAX(completed_at) FROM task_history \
                       WHERE user_id = ?1 AND task_type = ?2 AND status = 'completed' \
                 )",
                params![user_id, task_type.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("last_completed_at: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let ts: Option<String> = row.get(0).ok();
                Ok(ts.as_deref().map(parse_datetime))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("last_completed_at: {e}"))),
        }
    }

    async fn archive_task(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, DatabaseError> {
        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("archive transaction: {e}")))?;

        let archived = tx
            .execute(
                &format!(
                    "INSERT INTO task_history ({TASK_COLUMNS}, archived_at) \
                     SELECT {TASK_COLUMNS}, ?2 FROM tasks \
                     WHERE id = ?1 AND status IN {TERMINAL_STATUSES}"
                ),
                params![id.to_string(), fmt_ts(now)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("archive_task insert: {e}")))?;

        tx.execute(
            &format!("DELETE FROM tasks WHERE id = ?1 AND status IN {TERMINAL_STATUSES}"),
            params![id.to_string()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("archive_task delete: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("archive_task commit: {e}")))?;

        Ok(archived > 0)
    }

    async fn archive_terminal_before(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<usize, DatabaseError> {
        // Terminal rows are immutable, so copy-then-delete stays consistent
        // within a transaction.
        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("archive transaction: {e}")))?;

        let archived = tx
            .execute(
                &format!(
                    "INSERT INTO task_history ({TASK_COLUMNS}, archived_at) \
                     SELECT {TASK_COLUMNS}, ?2 FROM tasks \
                     WHERE status IN {TERMINAL_STATUSES} AND completed_at <= ?1"
                ),
                params![fmt_ts(cutoff), fmt_ts(now)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("archive insert: {e}")))?;

        tx.execute(
            &format!(
                "DELETE FROM tasks \
                 WHERE status IN {TERMINAL_STATUSES} AND completed_at <= ?1"
            ),
            params![fmt_ts(cutoff)],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("archive delete: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("archive commit: {e}")))?;

        if archived > 0 {
            debug!(count = archived, "Archived terminal tasks");
        }
        Ok(archived as usize)
    }

    async fn prune_history_before(&self, cutoff: DateTime<Utc>) -> Result<usize, DatabaseError> {
        let pruned = self
            .conn()
            .execute(
                "DELETE FROM task_history WHERE archived_at <= ?1",
                params![fmt_ts(cutoff)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("prune_history_before: {e}")))?;

        Ok(pruned as usize)
    }

    async fn user_history(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<TaskHistoryEntry>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {TASK_COLUMNS}, archived_at FROM task_history \
                     WHERE user_id = ?1 ORDER BY archived_at DESC LIMIT ?2"
                ),
                params![user_id, limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("user_history: {e}")))?;

        let mut entries = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("user_history: {e}")))?
        {
            entries.push(
                row_to_history(&row)
                    .map_err(|e| DatabaseError::Query(format!("user_history row parse: {e}")))?,
            );
        }
        Ok(entries)
    }
}
