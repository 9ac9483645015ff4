//! Core downloader implementation split into focused submodules.
//!
//! The `NovelDownloader` struct and its methods are organized by domain:
//! - [`queue`] - Enqueue, ordering, queue inspection and startup restore
//! - [`control`] - Queue-level and per-task control (pause/resume/cancel/retry)
//! - [`queue_processor`] - Claims tasks up to the concurrency ceiling
//! - [`download_task`] - Fetch, render, publish and resolve one task
//! - [`library_ops`] - Storage accounting and deletion by library id
//! - [`lifecycle`] - Construction and graceful shutdown

mod control;
mod download_task;
mod library_ops;
mod lifecycle;
mod queue;
mod queue_processor;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use crate::config::Config;
use crate::db::Database;
use crate::library::LibraryStore;
use crate::source::SourceProvider;
use crate::status::StatusBus;
use crate::storage::StorageWriter;
use crate::types::TaskId;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{Mutex, Notify, Semaphore};
use tokio_util::sync::CancellationToken;

/// Scheduler state shared by the processor, worker slots and control calls
#[derive(Clone)]
pub(crate) struct QueueState {
    /// One permit per worker slot (respects the concurrency ceiling)
    pub(crate) concurrent_limit: Arc<Semaphore>,
    /// Current concurrency ceiling
    pub(crate) concurrency: Arc<AtomicUsize>,
    /// Queue-level pause switch
    pub(crate) running: Arc<AtomicBool>,
    /// In-flight tasks and their cancellation tokens
    pub(crate) active_downloads: Arc<Mutex<HashMap<TaskId, CancellationToken>>>,
    /// Cleared during shutdown; enqueue is refused afterwards
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// Held across every task status write and the event that reports it, so
    /// the published snapshot changes in the same order as the store
    pub(crate) claim_lock: Arc<Mutex<()>>,
    /// Nudges the processor when new work may be claimable
    pub(crate) wake: Arc<Notify>,
    /// Stops the processor loop
    pub(crate) shutdown: CancellationToken,
}

impl QueueState {
    fn new(concurrency: usize, running: bool) -> Self {
        Self {
            concurrent_limit: Arc::new(Semaphore::new(concurrency)),
            concurrency: Arc::new(AtomicUsize::new(concurrency)),
            running: Arc::new(AtomicBool::new(running)),
            active_downloads: Arc::new(Mutex::new(HashMap::new())),
            accepting_new: Arc::new(AtomicBool::new(true)),
            claim_lock: Arc::new(Mutex::new(())),
            wake: Arc::new(Notify::new()),
            shutdown: CancellationToken::new(),
        }
    }
}

/// Main downloader instance (cloneable - all fields are Arc-wrapped)
///
/// Owns the persistent queue, the status bus and the storage writer, and
/// drives tasks through their state machine. Construct one explicitly with
/// [`NovelDownloader::new`] and hand clones to whatever needs the control
/// surface.
#[derive(Clone)]
pub struct NovelDownloader {
    /// Persistent queue store
    /// Public for integration tests to inspect task rows
    pub db: Arc<Database>,
    /// Status bus
    pub(crate) bus: Arc<StatusBus>,
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Fetches chapter content
    pub(crate) source: Arc<dyn SourceProvider>,
    /// Novel and chapter metadata plus download bookkeeping
    pub(crate) library: Arc<dyn LibraryStore>,
    /// Renders and publishes outputs
    pub(crate) storage: Arc<StorageWriter>,
    /// Scheduler state
    pub(crate) queue_state: QueueState,
}

impl NovelDownloader {
    /// Whether the queue is claiming new tasks
    pub fn is_running(&self) -> bool {
        self.queue_state.running.load(Ordering::SeqCst)
    }

    /// Current concurrency ceiling
    pub fn concurrency(&self) -> usize {
        self.queue_state.concurrency.load(Ordering::SeqCst)
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// The storage writer, for read paths that take library entities directly
    pub fn storage(&self) -> &StorageWriter {
        &self.storage
    }

    /// Ids of tasks currently held by a worker slot
    pub async fn active_task_ids(&self) -> Vec<TaskId> {
        let active = self.queue_state.active_downloads.lock().await;
        let mut ids: Vec<TaskId> = active.keys().copied().collect();
        ids.sort();
        ids
    }
}
