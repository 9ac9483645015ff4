//! # novel-dl
//!
//! Persistent download queue and scheduler for novel reader applications.
//!
//! ## Design Philosophy
//!
//! novel-dl is designed to be:
//! - **Durable** - The queue lives in SQLite and survives crashes and restarts
//! - **Bounded** - A fixed number of worker slots, adjustable at runtime
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Observable** - Consumers get a snapshot plus deltas, no polling required
//!
//! The host application supplies two collaborators: a [`SourceProvider`]
//! that fetches chapter content and a [`LibraryStore`] that knows novels and
//! chapters and keeps download bookkeeping. [`MemoryLibrary`] and
//! [`HttpSourceProvider`] cover the simple cases.
//!
//! ## Quick Start
//!
//! ```no_run
//! use novel_dl::{
//!     ChapterId, Config, DownloadFormat, DownloadType, HttpSourceProvider, MemoryLibrary,
//!     NovelDownloader, NovelId,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let source = Arc::new(HttpSourceProvider::new(config.download.fetch_timeout)?);
//!     let library = Arc::new(MemoryLibrary::new());
//!
//!     let downloader = NovelDownloader::new(config, source, library).await?;
//!
//!     // Subscribe before starting so no transition is missed
//!     let mut status = downloader.subscribe();
//!     tokio::spawn(async move {
//!         while let Some(update) = status.next_state().await {
//!             println!("Update: {:?}", update);
//!         }
//!     });
//!
//!     downloader.start_queue_processor();
//!     downloader
//!         .enqueue(NovelId(1), ChapterId(42), DownloadType::Original, DownloadFormat::Epub)
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Core downloader implementation (decomposed into focused submodules)
pub mod downloader;
/// Error types
pub mod error;
/// Library collaborator: novel and chapter lookup plus download bookkeeping
pub mod library;
/// Turns queue snapshots into user-facing notices
pub mod notifier;
/// Heartbeat decisions for observers of a paused queue
pub mod poll_gate;
/// Retry logic with exponential backoff
pub mod retry;
/// Source collaborator: fetches chapter content
pub mod source;
/// Status broadcast: snapshot plus ordered deltas
pub mod status;
/// Output layout and atomic publishing
pub mod storage;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use db::Database;
pub use downloader::NovelDownloader;
pub use error::{DatabaseError, Error, FetchError, Result, StorageError, TaskError};
pub use library::{ChapterInfo, DownloadStats, LibraryStore, MemoryLibrary, NovelInfo};
pub use notifier::{QueueNotice, QueueNotifier};
pub use poll_gate::{PollCadence, next_poll_cadence, should_keep_polling_while_paused};
pub use source::{HttpSourceProvider, SourceProvider};
pub use status::{StatusBus, StatusSubscription, StatusUpdate};
pub use storage::{StorageWriter, WriteResult};
pub use types::{
    ChapterId, DownloadFormat, DownloadTask, DownloadType, Event, FailureKind, NovelId, Progress,
    QueueSnapshot, TaskId, TaskStatus,
};

/// Helper function to run the downloader with graceful signal handling.
///
/// Waits for a termination signal and then calls the downloader's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use novel_dl::{Config, HttpSourceProvider, MemoryLibrary, NovelDownloader, run_with_shutdown};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::default();
///     let source = Arc::new(HttpSourceProvider::new(config.download.fetch_timeout)?);
///     let downloader = NovelDownloader::new(config, source, Arc::new(MemoryLibrary::new())).await?;
///     downloader.start_queue_processor();
///
///     // Run with automatic signal handling
///     run_with_shutdown(downloader).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(downloader: NovelDownloader) -> Result<()> {
    wait_for_signal().await;
    downloader.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM signal");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
