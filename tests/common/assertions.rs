//! Custom test assertions for end-to-end tests

use novel_dl::{Event, FailureKind, NovelDownloader, QueueSnapshot, TaskId};
use std::path::PathBuf;
use std::time::Duration;

/// Result of waiting for a task to leave the queue
#[derive(Debug)]
pub enum WaitResult {
    /// Output published at this path
    Completed(PathBuf),
    /// Task ended in ERROR
    Failed {
        /// Failure classification
        kind: FailureKind,
        /// Attempts consumed
        attempt: u32,
        /// Error summary
        error: String,
    },
    /// Task was cancelled
    Cancelled,
    /// Timeout waiting for a terminal event
    Timeout,
    /// Event channel closed unexpectedly
    ChannelClosed,
}

/// Wait for a task's terminal event
///
/// Subscribe before the task can finish, i.e. before starting the processor
/// or enqueueing, or the event is missed.
pub async fn wait_for_terminal(
    events: &mut tokio::sync::broadcast::Receiver<Event>,
    id: TaskId,
    timeout: Duration,
) -> WaitResult {
    let result = tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(Event::Completed { id: event_id, path, .. }) if event_id == id => {
                    return WaitResult::Completed(path);
                }
                Ok(Event::Failed {
                    id: event_id,
                    kind,
                    attempt,
                    error,
                }) if event_id == id => {
                    return WaitResult::Failed {
                        kind,
                        attempt,
                        error,
                    };
                }
                Ok(Event::Cancelled { id: event_id }) if event_id == id => {
                    return WaitResult::Cancelled;
                }
                Ok(_) => continue,
                // Lagging only drops deltas; keep waiting for ours
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    return WaitResult::ChannelClosed;
                }
            }
        }
    })
    .await;

    result.unwrap_or(WaitResult::Timeout)
}

/// Wait until the published queue state satisfies `pred`
pub async fn wait_for_state<F>(
    downloader: &NovelDownloader,
    timeout: Duration,
    mut pred: F,
) -> Option<QueueSnapshot>
where
    F: FnMut(&QueueSnapshot) -> bool,
{
    let mut rx = downloader.watch();
    tokio::time::timeout(timeout, async {
        loop {
            {
                let snapshot = rx.borrow_and_update();
                if pred(&snapshot) {
                    return Some(snapshot.clone());
                }
            }
            if rx.changed().await.is_err() {
                return None;
            }
        }
    })
    .await
    .ok()
    .flatten()
}

/// Assert that a task completed and return its output path
pub fn assert_completed(result: WaitResult) -> PathBuf {
    match result {
        WaitResult::Completed(path) => path,
        other => panic!("expected completion, got {:?}", other),
    }
}
