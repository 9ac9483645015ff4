//! Core task execution: fetch, render, publish, then resolve the claim.
//!
//! Every failure is caught here and translated into a status transition; no
//! error escapes a worker slot.

use crate::error::{Error, FetchError, Result};
use crate::retry::{self, RetryDecision};
use crate::storage::{self, WriteResult};
use crate::types::{DownloadTask, Event, FailureKind, Progress};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::NovelDownloader;

impl NovelDownloader {
    /// Drive a claimed task to COMPLETED, QUEUED (retry), ERROR or CANCELLED
    pub(crate) async fn run_download_task(
        &self,
        task: DownloadTask,
        cancel_token: &CancellationToken,
    ) {
        let outcome = self.execute_task(&task, cancel_token).await;

        if let Err(e) = self.resolve_task(&task, outcome).await {
            // The row stays DOWNLOADING and is reset on the next start
            tracing::error!(task_id = task.id.0, error = %e, "Failed to record task outcome");
        }
    }

    async fn execute_task(
        &self,
        task: &DownloadTask,
        cancel_token: &CancellationToken,
    ) -> Result<WriteResult> {
        let novel = self
            .library
            .novel(task.novel)
            .await?
            .ok_or_else(|| Error::NotFound(format!("novel {}", task.novel)))?;
        let chapter = self
            .library
            .chapter(task.chapter)
            .await?
            .ok_or_else(|| Error::NotFound(format!("chapter {}", task.chapter)))?;

        let path = self.storage.task_path(task, &novel, &chapter);

        // Output published by an earlier run that never got to record completion
        if let Some(expected) = task.progress.total_bytes {
            if storage::existing_output(&path).await == Some(expected) {
                tracing::info!(
                    task_id = task.id.0,
                    path = %path.display(),
                    "Output already published, skipping fetch"
                );
                return self
                    .storage
                    .adopt_existing(&novel, &chapter, task.download_type, &path, expected)
                    .await;
            }
        }

        if cancel_token.is_cancelled() {
            return Err(FetchError::Cancelled.into());
        }

        let timeout = self.config.download.fetch_timeout;
        let content = tokio::select! {
            _ = cancel_token.cancelled() => return Err(FetchError::Cancelled.into()),
            fetched = tokio::time::timeout(
                timeout,
                self.source.fetch(&chapter, task.download_type),
            ) => fetched.map_err(|_| FetchError::Timeout(timeout))??,
        };

        let bytes = self.storage.render(task, &novel, &chapter, &content)?;
        let total = bytes.len() as u64;

        self.db.update_progress(task.id, 0, Some(total)).await?;
        self.bus.publish(Event::Progress {
            id: task.id,
            progress: Progress {
                bytes_written: 0,
                total_bytes: Some(total),
            },
        });

        let bus = Arc::clone(&self.bus);
        let id = task.id;
        let on_chunk = move |written| {
            bus.publish(Event::Progress {
                id,
                progress: Progress {
                    bytes_written: written,
                    total_bytes: Some(total),
                },
            });
        };
        self.storage
            .publish(
                &novel,
                &chapter,
                task.download_type,
                &path,
                &bytes,
                cancel_token,
                on_chunk,
            )
            .await
    }

    async fn resolve_task(&self, task: &DownloadTask, outcome: Result<WriteResult>) -> Result<()> {
        let id = task.id;
        // A retry or requeue must be reported before anything can claim it again
        let _claim = self.queue_state.claim_lock.lock().await;

        let error = match outcome {
            Ok(result) => {
                if self.db.finish_task(id).await? {
                    tracing::info!(
                        task_id = id.0,
                        path = %result.path.display(),
                        bytes = result.bytes,
                        "Chapter downloaded"
                    );
                    self.bus.publish(Event::Completed {
                        id,
                        path: result.path,
                        bytes: result.bytes,
                    });
                }
                return Ok(());
            }
            Err(e) => e,
        };

        let kind = error.failure_kind();
        if kind == FailureKind::Cancelled {
            if self.db.finish_task(id).await? {
                tracing::info!(task_id = id.0, "Task cancelled in flight");
                self.bus.publish(Event::Cancelled { id });
            }
            return Ok(());
        }

        let message = error.to_string();
        match retry::decide(&self.config.retry, task.attempt, &error) {
            RetryDecision::Requeue { attempt, delay } => {
                let retry_after = chrono::Utc::now().timestamp_millis() + delay.as_millis() as i64;
                if self.db.requeue_task(id, attempt, retry_after).await? {
                    tracing::warn!(
                        task_id = id.0,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "Transient failure, retry scheduled"
                    );
                    self.bus.publish(Event::Requeued {
                        id,
                        attempt,
                        error: message,
                    });
                }
            }
            RetryDecision::GiveUp { attempt } => {
                if self.db.fail_task(id, attempt, &message).await? {
                    tracing::error!(
                        task_id = id.0,
                        kind = ?kind,
                        attempt,
                        error = %message,
                        "Download failed"
                    );
                    self.bus.publish(Event::Failed {
                        id,
                        kind,
                        attempt,
                        error: message.clone(),
                    });
                    if kind == FailureKind::Storage {
                        self.bus.publish(Event::StorageWarning { message });
                    }
                }
            }
        }

        Ok(())
    }
}
