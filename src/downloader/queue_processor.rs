//! Queue processor: claims QUEUED tasks into free worker slots.

use crate::types::{DownloadTask, Event, TaskId};
use tokio::sync::OwnedSemaphorePermit;
use tokio_util::sync::CancellationToken;

use super::NovelDownloader;

impl NovelDownloader {
    /// Start the queue processor task
    ///
    /// This method spawns a background task that continuously:
    /// 1. Waits while the queue is paused
    /// 2. Acquires a permit from the concurrency limiter (one per worker slot)
    /// 3. Atomically claims the oldest claimable QUEUED task
    /// 4. Spawns a worker for that task, which holds the permit until the task
    ///    leaves DOWNLOADING
    ///
    /// When nothing is claimable the processor sleeps until woken by an
    /// enqueue/resume/retry or until the poll interval elapses (delayed retries
    /// become claimable on their own). The loop ends on shutdown.
    pub fn start_queue_processor(&self) -> tokio::task::JoinHandle<()> {
        let downloader = self.clone();
        tokio::spawn(async move { downloader.run_queue_processor().await })
    }

    async fn run_queue_processor(&self) {
        let shutdown = self.queue_state.shutdown.clone();
        tracing::info!(concurrency = self.concurrency(), "Queue processor started");

        while !shutdown.is_cancelled() {
            if !self.is_running() {
                self.wait_for_work().await;
                continue;
            }

            let permit = tokio::select! {
                permit = self.queue_state.concurrent_limit.clone().acquire_owned() => {
                    match permit {
                        Ok(p) => p,
                        // Semaphore closed
                        Err(_) => break,
                    }
                }
                _ = shutdown.cancelled() => break,
            };

            match self.claim_next(permit).await {
                Ok(true) => {}
                Ok(false) => self.wait_for_work().await,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to claim next task");
                    self.wait_for_work().await;
                }
            }
        }

        tracing::info!("Queue processor stopped");
    }

    /// Claim one task into the slot represented by `permit`
    ///
    /// Returns false (dropping the permit) if the queue is paused, shutting
    /// down or has nothing claimable.
    async fn claim_next(&self, permit: OwnedSemaphorePermit) -> crate::Result<bool> {
        let _claim = self.queue_state.claim_lock.lock().await;
        if !self.is_running() || self.queue_state.shutdown.is_cancelled() {
            return Ok(false);
        }

        let mut active = self.queue_state.active_downloads.lock().await;
        let excluding: Vec<TaskId> = active.keys().copied().collect();
        let Some(task) = self.db.claim_next_task(&excluding).await? else {
            return Ok(false);
        };

        let cancel_token = CancellationToken::new();
        active.insert(task.id, cancel_token.clone());
        drop(active);

        tracing::debug!(task_id = task.id.0, attempt = task.attempt, "Task claimed");
        self.bus.publish(Event::Started { id: task.id });

        let downloader = self.clone();
        tokio::spawn(async move {
            downloader.run_slot(task, cancel_token, permit).await;
        });
        Ok(true)
    }

    async fn run_slot(
        &self,
        task: DownloadTask,
        cancel_token: CancellationToken,
        permit: OwnedSemaphorePermit,
    ) {
        let id = task.id;
        self.run_download_task(task, &cancel_token).await;

        self.queue_state.active_downloads.lock().await.remove(&id);
        drop(permit);
        self.queue_state.wake.notify_one();
    }

    async fn wait_for_work(&self) {
        tokio::select! {
            _ = self.queue_state.wake.notified() => {}
            _ = tokio::time::sleep(self.config.polling.queue_poll_interval) => {}
            _ = self.queue_state.shutdown.cancelled() => {}
        }
    }
}
