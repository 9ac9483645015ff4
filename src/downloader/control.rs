//! Queue control: pause/resume, cancel, retry, dismiss, clear and concurrency.
//!
//! These are the only entry points that mutate queue contents apart from
//! enqueue and the worker slots themselves.

use crate::error::{Error, Result, TaskError};
use crate::types::{Event, TaskId, TaskStatus};
use std::sync::atomic::Ordering;

use super::NovelDownloader;

impl NovelDownloader {
    /// Pause the queue
    ///
    /// No new task is claimed once this returns. Tasks already DOWNLOADING
    /// are left to finish or fail on their own (cooperative drain). The switch
    /// is persisted, so a paused queue stays paused across restarts.
    pub async fn pause(&self) -> Result<()> {
        let _claim = self.queue_state.claim_lock.lock().await;
        if !self.queue_state.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        self.db.set_queue_running(false).await?;
        tracing::info!("Queue paused");
        self.bus.publish(Event::QueuePaused);
        Ok(())
    }

    /// Resume the queue
    ///
    /// Claiming restarts from the oldest QUEUED task; nothing that already
    /// completed or was cancelled runs again. Also clears a queue-wide storage
    /// warning, since resuming is how a user acknowledges it.
    pub async fn resume(&self) -> Result<()> {
        let _claim = self.queue_state.claim_lock.lock().await;
        let was_running = self.queue_state.running.swap(true, Ordering::SeqCst);
        if was_running && self.bus.snapshot().storage_warning.is_none() {
            return Ok(());
        }

        if !was_running {
            self.db.set_queue_running(true).await?;
            tracing::info!("Queue resumed");
        }
        self.bus.publish(Event::QueueResumed);
        self.queue_state.wake.notify_one();
        Ok(())
    }

    /// Cancel a task
    ///
    /// A QUEUED task is removed immediately. A DOWNLOADING task has its
    /// cancellation token fired; its worker stops at the next checkpoint,
    /// discards the temporary output and reports [`Event::Cancelled`].
    ///
    /// # Errors
    ///
    /// - [`TaskError::NotFound`] if no such task exists
    /// - [`TaskError::InvalidState`] for a failed task (use [`dismiss`](Self::dismiss))
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use novel_dl::*;
    /// # async fn example(downloader: NovelDownloader, id: TaskId) -> Result<()> {
    /// downloader.cancel(id).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn cancel(&self, id: TaskId) -> Result<()> {
        let _claim = self.queue_state.claim_lock.lock().await;

        if self.db.delete_queued_task(id).await? {
            tracing::info!(task_id = id.0, "Queued task cancelled");
            self.bus.publish(Event::Cancelled { id });
            return Ok(());
        }

        if let Some(token) = self.queue_state.active_downloads.lock().await.get(&id) {
            tracing::info!(task_id = id.0, "Cancelling in-flight task");
            token.cancel();
            return Ok(());
        }

        Err(self.state_error(id, "cancel").await)
    }

    /// Retry a failed task
    ///
    /// The task goes back to QUEUED at its current position with a fresh retry
    /// budget.
    pub async fn retry(&self, id: TaskId) -> Result<()> {
        let _claim = self.queue_state.claim_lock.lock().await;
        if !self.db.retry_task(id).await? {
            return Err(self.state_error(id, "retry").await);
        }

        tracing::info!(task_id = id.0, "Failed task retried");
        self.bus.publish(Event::Retried { id });
        self.queue_state.wake.notify_one();
        Ok(())
    }

    /// Retry every failed task and make sure the queue is running
    ///
    /// Returns the retried ids in queue order.
    pub async fn retry_all_failed(&self) -> Result<Vec<TaskId>> {
        let ids = {
            let _claim = self.queue_state.claim_lock.lock().await;
            let ids = self.db.retry_all_failed().await?;
            for id in &ids {
                self.bus.publish(Event::Retried { id: *id });
            }
            ids
        };
        tracing::info!(count = ids.len(), "Retried all failed tasks");

        self.resume().await?;
        self.queue_state.wake.notify_one();
        Ok(ids)
    }

    /// Remove a failed task without retrying it
    pub async fn dismiss(&self, id: TaskId) -> Result<()> {
        let _claim = self.queue_state.claim_lock.lock().await;
        if !self.db.delete_failed_task(id).await? {
            return Err(self.state_error(id, "dismiss").await);
        }

        tracing::info!(task_id = id.0, "Failed task dismissed");
        self.bus.publish(Event::Removed { id });
        Ok(())
    }

    /// Remove every failed task, returning the removed ids
    pub async fn clear_errors(&self) -> Result<Vec<TaskId>> {
        let _claim = self.queue_state.claim_lock.lock().await;
        let ids = self.db.clear_errors().await?;
        for id in &ids {
            self.bus.publish(Event::Removed { id: *id });
        }
        tracing::info!(count = ids.len(), "Cleared failed tasks");
        Ok(ids)
    }

    /// Empty the queue
    ///
    /// QUEUED tasks are cancelled, failed tasks removed, and every in-flight
    /// task has its cancellation token fired. Returns the number of tasks
    /// affected.
    pub async fn clear_queue(&self) -> Result<usize> {
        let _claim = self.queue_state.claim_lock.lock().await;

        let snapshot = self.bus.snapshot();
        let removed = self.db.clear_pending().await?;
        for id in &removed {
            let failed = snapshot
                .task(*id)
                .is_some_and(|task| task.status == TaskStatus::Error);
            if failed {
                self.bus.publish(Event::Removed { id: *id });
            } else {
                self.bus.publish(Event::Cancelled { id: *id });
            }
        }

        let active = self.queue_state.active_downloads.lock().await;
        for token in active.values() {
            token.cancel();
        }

        tracing::info!(
            removed = removed.len(),
            in_flight = active.len(),
            "Queue cleared"
        );
        Ok(removed.len() + active.len())
    }

    /// Change the concurrency ceiling
    ///
    /// Raising it lets the processor fill the new slots right away. Lowering
    /// it never interrupts in-flight tasks; the extra slots are retired as
    /// those tasks finish.
    pub async fn set_concurrency(&self, concurrency: usize) -> Result<()> {
        if concurrency == 0 {
            return Err(Error::Config {
                message: "concurrency must be at least 1".to_string(),
                key: Some("max_concurrent_downloads".to_string()),
            });
        }

        let _claim = self.queue_state.claim_lock.lock().await;
        let previous = self.queue_state.concurrency.swap(concurrency, Ordering::SeqCst);
        if concurrency == previous {
            return Ok(());
        }

        let limit = &self.queue_state.concurrent_limit;
        if concurrency > previous {
            limit.add_permits(concurrency - previous);
        } else {
            let excess = previous - concurrency;
            let forgotten = limit.forget_permits(excess);
            let outstanding = excess - forgotten;
            if outstanding > 0 {
                // Retire the remaining slots as busy workers release them
                let limit = limit.clone();
                tokio::spawn(async move {
                    if let Ok(permits) = limit.acquire_many_owned(outstanding as u32).await {
                        permits.forget();
                    }
                });
            }
        }

        tracing::info!(previous, concurrency, "Concurrency changed");
        self.bus.publish(Event::ConcurrencyChanged { concurrency });
        self.queue_state.wake.notify_one();
        Ok(())
    }

    /// Build the error for an operation the task's state does not allow
    async fn state_error(&self, id: TaskId, operation: &str) -> Error {
        match self.db.get_task(id).await {
            Ok(Some(task)) => Error::Task(TaskError::InvalidState {
                id: id.0,
                operation: operation.to_string(),
                current_state: format!("{:?}", task.status),
            }),
            Ok(None) => Error::Task(TaskError::NotFound { id: id.0 }),
            Err(e) => e,
        }
    }
}
