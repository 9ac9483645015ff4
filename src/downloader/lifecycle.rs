//! Startup and shutdown coordination.

use crate::config::Config;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::library::LibraryStore;
use crate::source::SourceProvider;
use crate::status::StatusBus;
use crate::storage::StorageWriter;
use crate::types::{Event, QueueSnapshot};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use super::{NovelDownloader, QueueState};

/// How long shutdown waits for in-flight tasks to drain
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

impl NovelDownloader {
    /// Create a new NovelDownloader instance
    ///
    /// This initializes all core components:
    /// - Validates the configuration
    /// - Creates the download directory
    /// - Opens/creates the SQLite queue store and runs migrations
    /// - Restores the queue from the previous session, resetting tasks that
    ///   were interrupted mid-download
    ///
    /// The queue processor is not started; call
    /// [`start_queue_processor`](Self::start_queue_processor) once subscribers
    /// are in place.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use novel_dl::{Config, HttpSourceProvider, MemoryLibrary, NovelDownloader};
    /// use std::sync::Arc;
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let config = Config::default();
    ///     let source = Arc::new(HttpSourceProvider::new(config.download.fetch_timeout)?);
    ///     let library = Arc::new(MemoryLibrary::new());
    ///
    ///     let downloader = NovelDownloader::new(config, source, library).await?;
    ///     downloader.start_queue_processor();
    ///     Ok(())
    /// }
    /// ```
    pub async fn new(
        config: Config,
        source: Arc<dyn SourceProvider>,
        library: Arc<dyn LibraryStore>,
    ) -> Result<Self> {
        config.validate()?;

        tokio::fs::create_dir_all(&config.download.download_dir)
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create download directory '{}': {}",
                        config.download.download_dir.display(),
                        e
                    ),
                ))
            })?;

        let db = Database::new(&config.persistence.database_path).await?;

        if db.was_unclean_shutdown().await? {
            tracing::warn!("Previous session did not shut down cleanly, recovering queue");
        }
        // Mark that we're starting up (for unclean shutdown detection)
        db.set_clean_start().await?;

        let running = db.queue_running().await?.unwrap_or(true);
        let concurrency = config.download.max_concurrent_downloads;

        let bus = StatusBus::new(
            QueueSnapshot {
                running,
                concurrency,
                ..Default::default()
            },
            config.persistence.event_buffer,
        );

        let storage = StorageWriter::new(
            config.download.download_dir.clone(),
            config.download.write_chunk_size,
            config.disk_space.clone(),
            Arc::clone(&library),
        );

        let downloader = Self {
            db: Arc::new(db),
            bus: Arc::new(bus),
            config: Arc::new(config),
            source,
            library,
            storage: Arc::new(storage),
            queue_state: QueueState::new(concurrency, running),
        };

        downloader.restore_queue().await?;

        Ok(downloader)
    }

    /// Gracefully shut down the downloader
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Stops accepting new tasks
    /// 2. Stops the queue processor so nothing new is claimed
    /// 3. Waits for in-flight tasks to drain, up to 30 seconds
    /// 4. Marks a clean shutdown in the database
    /// 5. Emits [`Event::Shutdown`]
    ///
    /// Tasks still in flight when the timeout expires stay DOWNLOADING in the
    /// store and are reset to QUEUED on the next start.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        self.queue_state.accepting_new.store(false, Ordering::SeqCst);
        {
            // Taking the claim lock waits out a claim in progress
            let _claim = self.queue_state.claim_lock.lock().await;
            self.queue_state.shutdown.cancel();
        }
        tracing::info!("Stopped accepting and claiming tasks");

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.wait_for_active_downloads()).await {
            Ok(()) => tracing::info!("All in-flight tasks drained"),
            Err(_) => {
                let remaining = self.active_task_ids().await;
                tracing::warn!(
                    remaining = remaining.len(),
                    "Timeout waiting for in-flight tasks, proceeding with shutdown"
                );
            }
        }

        if let Err(e) = self.db.set_clean_shutdown().await {
            tracing::error!(error = %e, "Failed to mark clean shutdown in database");
            // Continue with shutdown even if this fails
        } else {
            tracing::info!("Marked clean shutdown in database");
        }

        self.bus.publish(Event::Shutdown);

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    /// Wait until no worker slot holds a task
    pub(crate) async fn wait_for_active_downloads(&self) {
        loop {
            let active_count = self.queue_state.active_downloads.lock().await.len();
            if active_count == 0 {
                return;
            }

            tracing::debug!(active_count, "Waiting for in-flight tasks to complete");
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}
