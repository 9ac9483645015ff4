//! Queue management: enqueue, ordering, inspection and startup restore.

use crate::db::{Enqueued, NewTask};
use crate::error::{Error, Result};
use crate::status::StatusSubscription;
use crate::types::{
    ChapterId, DownloadFormat, DownloadTask, DownloadType, Event, NovelId, QueueSnapshot, TaskId,
};
use std::collections::BTreeSet;
use std::sync::atomic::Ordering;

use super::NovelDownloader;

impl NovelDownloader {
    /// Add a chapter download to the queue tail
    ///
    /// At most one task per (novel, chapter, format) exists at a time. If an
    /// equivalent task is already queued or downloading, its id is returned and
    /// nothing changes. If an equivalent task had failed, it is put back in
    /// the queue with a fresh retry budget and keeps its id.
    ///
    /// # Errors
    ///
    /// - [`Error::ShuttingDown`] once [`shutdown`](Self::shutdown) has started
    /// - [`Error::NotFound`] if the library does not know the novel or chapter,
    ///   or the chapter belongs to another novel
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use novel_dl::*;
    /// # async fn example(downloader: NovelDownloader) -> Result<()> {
    /// let id = downloader
    ///     .enqueue(NovelId(1), ChapterId(42), DownloadType::Original, DownloadFormat::Epub)
    ///     .await?;
    /// println!("queued task {}", id);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn enqueue(
        &self,
        novel: NovelId,
        chapter: ChapterId,
        download_type: DownloadType,
        format: DownloadFormat,
    ) -> Result<TaskId> {
        if !self.queue_state.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let novel_info = self
            .library
            .novel(novel)
            .await?
            .ok_or_else(|| Error::NotFound(format!("novel {}", novel)))?;
        let chapter_info = self
            .library
            .chapter(chapter)
            .await?
            .ok_or_else(|| Error::NotFound(format!("chapter {}", chapter)))?;
        if chapter_info.novel != novel {
            return Err(Error::NotFound(format!("chapter {} in novel {}", chapter, novel)));
        }

        // Insert and publish as one step so no claim can report the task first
        let _claim = self.queue_state.claim_lock.lock().await;
        let outcome = self
            .db
            .insert_task(&NewTask {
                novel,
                chapter,
                download_type,
                format,
                novel_title: Some(novel_info.title),
                chapter_name: Some(chapter_info.name),
            })
            .await?;

        let id = outcome.id();
        match outcome {
            Enqueued::New(task) => {
                tracing::info!(
                    task_id = id.0,
                    novel_id = novel.0,
                    chapter_id = chapter.0,
                    format = format.extension(),
                    "Task queued"
                );
                self.bus.publish(Event::Queued { task });
                self.queue_state.wake.notify_one();
            }
            Enqueued::Existing(_) => {
                tracing::debug!(task_id = id.0, "Equivalent task already queued");
            }
            Enqueued::Revived(_) => {
                tracing::info!(task_id = id.0, "Failed task re-queued by enqueue");
                self.bus.publish(Event::Retried { id });
                self.queue_state.wake.notify_one();
            }
        }

        Ok(id)
    }

    /// Enqueue several chapters of one novel, in the given order
    ///
    /// Returns one task id per chapter, following the same dedup rule as
    /// [`enqueue`](Self::enqueue). Stops at the first error.
    pub async fn enqueue_many(
        &self,
        novel: NovelId,
        chapters: &[ChapterId],
        download_type: DownloadType,
        format: DownloadFormat,
    ) -> Result<Vec<TaskId>> {
        let mut ids = Vec::with_capacity(chapters.len());
        for chapter in chapters {
            ids.push(self.enqueue(novel, *chapter, download_type, format).await?);
        }
        Ok(ids)
    }

    /// All tasks in queue order
    pub async fn list_tasks(&self) -> Result<Vec<DownloadTask>> {
        self.db.list_tasks().await
    }

    /// Look up one task
    pub async fn get_task(&self, id: TaskId) -> Result<Option<DownloadTask>> {
        self.db.get_task(id).await
    }

    /// Move a task to `new_position` (0-based) in the queue
    ///
    /// Returns the full queue order after the move.
    pub async fn reorder(&self, id: TaskId, new_position: usize) -> Result<Vec<TaskId>> {
        let _claim = self.queue_state.claim_lock.lock().await;
        let order = self.db.reorder(id, new_position).await?;
        tracing::debug!(task_id = id.0, new_position, "Task reordered");
        self.bus.publish(Event::Reordered {
            order: order.clone(),
        });
        Ok(order)
    }

    /// Chapters of `novel` with an original download queued or in flight
    pub async fn queued_chapter_ids(&self, novel: NovelId) -> Result<BTreeSet<ChapterId>> {
        Ok(self.db.queued_chapter_ids(novel).await?.into_iter().collect())
    }

    /// Subscribe to queue state: the current snapshot plus every later change
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use novel_dl::*;
    /// # async fn example(downloader: NovelDownloader) {
    /// let mut status = downloader.subscribe();
    /// println!("{} tasks queued", status.snapshot.queue_count());
    /// while let Some(update) = status.next_state().await {
    ///     println!("{:?}", update);
    /// }
    /// # }
    /// ```
    pub fn subscribe(&self) -> StatusSubscription {
        self.bus.subscribe()
    }

    /// Current queue state
    pub fn snapshot(&self) -> QueueSnapshot {
        self.bus.snapshot()
    }

    /// Latest-value channel of queue snapshots
    pub fn watch(&self) -> tokio::sync::watch::Receiver<QueueSnapshot> {
        self.bus.watch()
    }

    /// Raw event receiver without snapshot replay
    pub fn events(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.bus.events()
    }

    /// Rebuild queue state from the database on startup
    ///
    /// Tasks left DOWNLOADING by the previous session go back to QUEUED with
    /// one more attempt; their partial output is never trusted. The status bus
    /// is then reset to the stored queue.
    pub(crate) async fn restore_queue(&self) -> Result<()> {
        let interrupted = self.db.reset_interrupted_tasks().await?;
        for id in &interrupted {
            tracing::warn!(task_id = id.0, "Task was interrupted mid-download, re-queued");
        }

        let tasks = self.db.list_tasks().await?;
        tracing::info!(
            tasks = tasks.len(),
            interrupted = interrupted.len(),
            running = self.is_running(),
            "Queue restored"
        );

        self.bus.reset(QueueSnapshot {
            running: self.is_running(),
            concurrency: self.concurrency(),
            tasks,
            storage_warning: None,
        });
        Ok(())
    }
}
