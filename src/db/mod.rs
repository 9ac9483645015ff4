//! Persistent queue store for novel-dl
//!
//! Handles SQLite persistence for download tasks and runtime state. Every
//! mutation is committed before the call returns, so a restart can rebuild the
//! queue from disk.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`]: Database lifecycle, schema migrations
//! - [`tasks`]: Task queue CRUD, claims and crash recovery
//! - [`state`]: Runtime state (shutdown tracking, queue running switch)

use crate::error::DatabaseError;
use crate::types::{
    ChapterId, DownloadFormat, DownloadTask, DownloadType, NovelId, Progress, TaskId, TaskStatus,
};
use sqlx::{FromRow, sqlite::SqlitePool};

mod migrations;
mod tasks;
mod state;

pub use tasks::Enqueued;

/// New task to be inserted into the database
#[derive(Debug, Clone)]
pub struct NewTask {
    /// Novel the chapter belongs to
    pub novel: NovelId,
    /// Chapter to download
    pub chapter: ChapterId,
    /// Raw or derived content
    pub download_type: DownloadType,
    /// Target on-disk encoding
    pub format: DownloadFormat,
    /// Novel title for display
    pub novel_title: Option<String>,
    /// Chapter name for display
    pub chapter_name: Option<String>,
}

/// Task record from database
#[derive(Debug, Clone, FromRow)]
pub struct TaskRow {
    /// Unique database ID
    pub id: i64,
    /// Novel reference
    pub novel_id: i64,
    /// Chapter reference
    pub chapter_id: i64,
    /// Download type code (0=original, 1=transformed)
    pub download_type: i32,
    /// Format code (0=html, 1=epub, 2=plain text, 3=docx)
    pub format: i32,
    /// Status code (0=queued, 1=downloading, 3=error)
    pub status: i32,
    /// Retry counter
    pub attempt: i64,
    /// Queue position (ascending = claimed first)
    pub position: i64,
    /// Bytes written so far
    pub bytes_written: i64,
    /// Rendered output size, once known
    pub total_bytes: Option<i64>,
    /// Error message if the task failed
    pub last_error: Option<String>,
    /// Novel title for display
    pub novel_title: Option<String>,
    /// Chapter name for display
    pub chapter_name: Option<String>,
    /// Unix timestamp (milliseconds) before which a requeued task is not claimed
    pub retry_after: Option<i64>,
    /// Unix timestamp when the task was enqueued
    pub created_at: i64,
    /// Unix timestamp when the current attempt was claimed
    pub started_at: Option<i64>,
}

impl TryFrom<TaskRow> for DownloadTask {
    type Error = DatabaseError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let corrupt = |field: &str, value: i64| {
            DatabaseError::Corrupt(format!("task {} has unknown {} {}", row.id, field, value))
        };

        let download_type = DownloadType::from_i32(row.download_type)
            .ok_or_else(|| corrupt("download_type", row.download_type as i64))?;
        let format = DownloadFormat::from_i32(row.format)
            .ok_or_else(|| corrupt("format", row.format as i64))?;
        let status =
            TaskStatus::from_i32(row.status).ok_or_else(|| corrupt("status", row.status as i64))?;

        Ok(DownloadTask {
            id: TaskId(row.id),
            novel: NovelId(row.novel_id),
            chapter: ChapterId(row.chapter_id),
            download_type,
            format,
            status,
            attempt: row.attempt.max(0) as u32,
            progress: Progress {
                bytes_written: row.bytes_written.max(0) as u64,
                total_bytes: row.total_bytes.map(|b| b.max(0) as u64),
            },
            last_error: row.last_error,
            novel_title: row.novel_title,
            chapter_name: row.chapter_name,
            created_at: row.created_at,
        })
    }
}

/// Database handle for novel-dl
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
