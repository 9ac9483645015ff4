//! Task queue CRUD, exclusive claims and crash recovery.
//!
//! Only non-terminal tasks live in the `tasks` table. Completion and
//! cancellation delete the row; failures stay with status 3 until retried or
//! dismissed. Transitions out of DOWNLOADING are guarded with `AND status = 1`
//! so only the slot holding the claim can resolve the task.

use crate::error::{DatabaseError, TaskError};
use crate::types::{ChapterId, DownloadTask, NovelId, TaskId, TaskStatus};
use crate::{Error, Result};
use sqlx::{QueryBuilder, Sqlite};

use super::{Database, NewTask, TaskRow};

const TASK_COLUMNS: &str = "id, novel_id, chapter_id, download_type, format, status, attempt, \
     position, bytes_written, total_bytes, last_error, novel_title, chapter_name, retry_after, \
     created_at, started_at";

const QUEUED: i32 = 0;
const DOWNLOADING: i32 = 1;
const ERROR: i32 = 3;

/// Outcome of inserting a task
#[derive(Debug, Clone, PartialEq)]
pub enum Enqueued {
    /// A new task was appended to the queue tail
    New(DownloadTask),
    /// An equivalent task is already queued or downloading
    Existing(DownloadTask),
    /// An equivalent task had failed and was put back in the queue
    Revived(DownloadTask),
}

impl Enqueued {
    /// The task the caller should refer to
    pub fn task(&self) -> &DownloadTask {
        match self {
            Enqueued::New(task) | Enqueued::Existing(task) | Enqueued::Revived(task) => task,
        }
    }

    /// Id of that task
    pub fn id(&self) -> TaskId {
        self.task().id
    }
}

fn query_failed(what: &str, e: impl std::fmt::Display) -> Error {
    Error::Database(DatabaseError::QueryFailed(format!("Failed to {}: {}", what, e)))
}

fn to_task(row: TaskRow) -> Result<DownloadTask> {
    DownloadTask::try_from(row).map_err(Error::Database)
}

fn to_tasks(rows: Vec<TaskRow>) -> Result<Vec<DownloadTask>> {
    rows.into_iter().map(to_task).collect()
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl Database {
    /// Insert a QUEUED task at the tail unless an equivalent task exists
    ///
    /// Equivalence is `(novel, chapter, format)`. An equivalent ERROR task is
    /// revived in place (attempt reset, position kept) instead of duplicated.
    pub async fn insert_task(&self, task: &NewTask) -> Result<Enqueued> {
        let now = chrono::Utc::now().timestamp();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| query_failed("begin enqueue transaction", e))?;

        let inserted = sqlx::query_as::<_, TaskRow>(&format!(
            r#"
            INSERT INTO tasks (
                novel_id, chapter_id, download_type, format, status, attempt,
                position, novel_title, chapter_name, created_at
            ) VALUES (
                ?, ?, ?, ?, 0, 0,
                (SELECT COALESCE(MAX(position), 0) + 1 FROM tasks), ?, ?, ?
            )
            ON CONFLICT(novel_id, chapter_id, format) DO NOTHING
            RETURNING {}
            "#,
            TASK_COLUMNS
        ))
        .bind(task.novel)
        .bind(task.chapter)
        .bind(task.download_type.to_i32())
        .bind(task.format.to_i32())
        .bind(&task.novel_title)
        .bind(&task.chapter_name)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| query_failed("insert task", e))?;

        let outcome = match inserted {
            Some(row) => Enqueued::New(to_task(row)?),
            None => {
                let existing = sqlx::query_as::<_, TaskRow>(&format!(
                    "SELECT {} FROM tasks WHERE novel_id = ? AND chapter_id = ? AND format = ?",
                    TASK_COLUMNS
                ))
                .bind(task.novel)
                .bind(task.chapter)
                .bind(task.format.to_i32())
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| query_failed("load existing task", e))?;

                if existing.status == ERROR {
                    let revived = sqlx::query_as::<_, TaskRow>(&format!(
                        r#"
                        UPDATE tasks
                        SET status = 0, attempt = 0, last_error = NULL, retry_after = NULL,
                            bytes_written = 0
                        WHERE id = ?
                        RETURNING {}
                        "#,
                        TASK_COLUMNS
                    ))
                    .bind(existing.id)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(|e| query_failed("revive failed task", e))?;
                    Enqueued::Revived(to_task(revived)?)
                } else {
                    Enqueued::Existing(to_task(existing)?)
                }
            }
        };

        tx.commit()
            .await
            .map_err(|e| query_failed("commit enqueue", e))?;

        Ok(outcome)
    }

    /// Get a task by ID
    pub async fn get_task(&self, id: TaskId) -> Result<Option<DownloadTask>> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {} FROM tasks WHERE id = ?",
            TASK_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_failed("get task", e))?;

        row.map(to_task).transpose()
    }

    /// List all tasks in queue order
    pub async fn list_tasks(&self) -> Result<Vec<DownloadTask>> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {} FROM tasks ORDER BY position ASC",
            TASK_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed("list tasks", e))?;

        to_tasks(rows)
    }

    /// List tasks with a specific status, in queue order
    pub async fn list_tasks_by_status(&self, status: TaskStatus) -> Result<Vec<DownloadTask>> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {} FROM tasks WHERE status = ? ORDER BY position ASC",
            TASK_COLUMNS
        ))
        .bind(status.to_i32())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed("list tasks by status", e))?;

        to_tasks(rows)
    }

    /// Claim the oldest claimable QUEUED task and mark it DOWNLOADING
    ///
    /// The select and the update are one statement, so concurrent callers can
    /// never receive the same task. Requeued tasks whose backoff has not
    /// elapsed are skipped.
    pub async fn claim_next_task(&self, excluding: &[TaskId]) -> Result<Option<DownloadTask>> {
        let now = chrono::Utc::now().timestamp();

        let mut qb = QueryBuilder::<Sqlite>::new(
            "UPDATE tasks SET status = 1, bytes_written = 0, last_error = NULL, started_at = ",
        );
        qb.push_bind(now);
        qb.push(
            " WHERE status = 0 AND id = (SELECT id FROM tasks WHERE status = 0 \
             AND (retry_after IS NULL OR retry_after <= ",
        );
        qb.push_bind(now_millis());
        qb.push(")");
        if !excluding.is_empty() {
            qb.push(" AND id NOT IN (");
            let mut ids = qb.separated(", ");
            for id in excluding {
                ids.push_bind(id.0);
            }
            ids.push_unseparated(")");
        }
        qb.push(" ORDER BY position ASC LIMIT 1) RETURNING ");
        qb.push(TASK_COLUMNS);

        let row = qb
            .build_query_as::<TaskRow>()
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| query_failed("claim next task", e))?;

        row.map(to_task).transpose()
    }

    /// Record byte progress of a DOWNLOADING task
    pub async fn update_progress(
        &self,
        id: TaskId,
        bytes_written: u64,
        total_bytes: Option<u64>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE tasks
            SET bytes_written = ?, total_bytes = COALESCE(?, total_bytes)
            WHERE id = ? AND status = 1
            "#,
        )
        .bind(bytes_written as i64)
        .bind(total_bytes.map(|b| b as i64))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("update progress", e))?;

        Ok(())
    }

    /// Remove a DOWNLOADING task that completed or was cancelled in flight
    ///
    /// Returns false if the task is no longer held as DOWNLOADING.
    pub async fn finish_task(&self, id: TaskId) -> Result<bool> {
        self.delete_task_with_status(id, DOWNLOADING).await
    }

    /// Put a DOWNLOADING task back at the queue tail after a transient failure
    ///
    /// The task is not claimable again until `retry_after_ms` (unix millis).
    pub async fn requeue_task(
        &self,
        id: TaskId,
        attempt: u32,
        retry_after_ms: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 0, attempt = ?, retry_after = ?, bytes_written = 0,
                last_error = NULL, started_at = NULL,
                position = (SELECT MAX(position) + 1 FROM tasks)
            WHERE id = ? AND status = 1
            "#,
        )
        .bind(attempt as i64)
        .bind(retry_after_ms)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("requeue task", e))?;

        Ok(result.rows_affected() > 0)
    }

    /// Move a DOWNLOADING task to ERROR
    pub async fn fail_task(&self, id: TaskId, attempt: u32, error: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 3, attempt = ?, last_error = ?, bytes_written = 0,
                retry_after = NULL, started_at = NULL
            WHERE id = ? AND status = 1
            "#,
        )
        .bind(attempt as i64)
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("fail task", e))?;

        Ok(result.rows_affected() > 0)
    }

    /// Explicit retry: ERROR -> QUEUED with a fresh budget, position kept
    pub async fn retry_task(&self, id: TaskId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 0, attempt = 0, last_error = NULL, retry_after = NULL
            WHERE id = ? AND status = 3
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("retry task", e))?;

        Ok(result.rows_affected() > 0)
    }

    /// Retry every failed task, returning their ids in queue order
    pub async fn retry_all_failed(&self) -> Result<Vec<TaskId>> {
        let ids: Vec<TaskId> = sqlx::query_scalar(
            r#"
            UPDATE tasks
            SET status = 0, attempt = 0, last_error = NULL, retry_after = NULL
            WHERE status = 3
            RETURNING id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed("retry failed tasks", e))?;

        Ok(self.in_queue_order(ids).await?)
    }

    /// Delete a task regardless of status
    pub async fn delete_task(&self, id: TaskId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| query_failed("delete task", e))?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a task only if it is still QUEUED
    pub async fn delete_queued_task(&self, id: TaskId) -> Result<bool> {
        self.delete_task_with_status(id, QUEUED).await
    }

    /// Delete a task only if it is in ERROR
    pub async fn delete_failed_task(&self, id: TaskId) -> Result<bool> {
        self.delete_task_with_status(id, ERROR).await
    }

    async fn delete_task_with_status(&self, id: TaskId, status: i32) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ? AND status = ?")
            .bind(id)
            .bind(status)
            .execute(&self.pool)
            .await
            .map_err(|e| query_failed("delete task", e))?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete every ERROR task, returning the removed ids
    pub async fn clear_errors(&self) -> Result<Vec<TaskId>> {
        sqlx::query_scalar("DELETE FROM tasks WHERE status = 3 RETURNING id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| query_failed("clear errors", e))
    }

    /// Delete every QUEUED and ERROR task, returning the removed ids
    ///
    /// DOWNLOADING tasks stay; their slots resolve them.
    pub async fn clear_pending(&self) -> Result<Vec<TaskId>> {
        sqlx::query_scalar("DELETE FROM tasks WHERE status IN (0, 3) RETURNING id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| query_failed("clear queue", e))
    }

    /// Move a task to `new_position` (0-based) and return the full new order
    pub async fn reorder(&self, id: TaskId, new_position: usize) -> Result<Vec<TaskId>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| query_failed("begin reorder transaction", e))?;

        let mut order: Vec<TaskId> =
            sqlx::query_scalar("SELECT id FROM tasks ORDER BY position ASC")
                .fetch_all(&mut *tx)
                .await
                .map_err(|e| query_failed("load queue order", e))?;

        let current = order
            .iter()
            .position(|t| *t == id)
            .ok_or(Error::Task(TaskError::NotFound { id: id.0 }))?;

        if new_position >= order.len() {
            return Err(Error::Task(TaskError::PositionOutOfRange {
                position: new_position,
                len: order.len(),
            }));
        }

        let moved = order.remove(current);
        order.insert(new_position, moved);

        for (index, task_id) in order.iter().enumerate() {
            sqlx::query("UPDATE tasks SET position = ? WHERE id = ?")
                .bind(index as i64 + 1)
                .bind(task_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| query_failed("rewrite queue position", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| query_failed("commit reorder", e))?;

        Ok(order)
    }

    /// Crash recovery: every DOWNLOADING task goes back to QUEUED with one more attempt
    ///
    /// Partial output of an interrupted attempt is never trusted, so byte
    /// progress is cleared. The known total size is kept for the idempotence check.
    pub async fn reset_interrupted_tasks(&self) -> Result<Vec<TaskId>> {
        sqlx::query_scalar(
            r#"
            UPDATE tasks
            SET status = 0, attempt = attempt + 1, bytes_written = 0,
                started_at = NULL, retry_after = NULL
            WHERE status = 1
            RETURNING id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed("reset interrupted tasks", e))
    }

    /// Chapters of a novel with an ORIGINAL task queued or in flight
    pub async fn queued_chapter_ids(&self, novel: NovelId) -> Result<Vec<ChapterId>> {
        sqlx::query_scalar(
            r#"
            SELECT DISTINCT chapter_id FROM tasks
            WHERE novel_id = ? AND download_type = 0 AND status IN (0, 1)
            ORDER BY chapter_id ASC
            "#,
        )
        .bind(novel)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed("list queued chapters", e))
    }

    async fn in_queue_order(&self, ids: Vec<TaskId>) -> Result<Vec<TaskId>> {
        if ids.len() < 2 {
            return Ok(ids);
        }
        let order: Vec<TaskId> = sqlx::query_scalar("SELECT id FROM tasks ORDER BY position ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| query_failed("load queue order", e))?;
        Ok(order.into_iter().filter(|id| ids.contains(id)).collect())
    }
}
