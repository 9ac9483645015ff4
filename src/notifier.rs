//! Queue summary transitions for a foreground progress notification.
//!
//! The notifier is fed successive snapshots and reports what a notification
//! surface should do. It renders nothing itself.

use crate::types::{DownloadTask, QueueSnapshot, TaskStatus};

/// What a progress notification should show after a snapshot
#[derive(Clone, Debug, PartialEq)]
pub enum QueueNotice {
    /// Work remains; show counts and the task most likely in progress
    Progress {
        /// QUEUED tasks
        pending: usize,
        /// DOWNLOADING tasks
        active: usize,
        /// ERROR tasks
        failed: usize,
        /// First DOWNLOADING task, else first QUEUED task
        current: Option<DownloadTask>,
    },
    /// The queue just drained
    Complete {
        /// ERROR tasks left behind
        failed: usize,
    },
    /// Nothing to show; hide any progress notification
    Dismiss,
    /// Failures are still on display; leave the notification alone
    Unchanged,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Summary {
    pending: usize,
    active: usize,
    failed: usize,
}

impl Summary {
    fn of(snapshot: &QueueSnapshot) -> Self {
        Self {
            pending: snapshot.pending_count(),
            active: snapshot.active_count(),
            failed: snapshot.failed_count(),
        }
    }

    fn active_total(&self) -> usize {
        self.pending + self.active
    }
}

/// Tracks the previously notified summary
#[derive(Debug, Default)]
pub struct QueueNotifier {
    previous: Summary,
}

impl QueueNotifier {
    /// Create a notifier that has not seen any work yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in the latest snapshot
    pub fn observe(&mut self, snapshot: &QueueSnapshot) -> QueueNotice {
        let summary = Summary::of(snapshot);
        let was_active = self.previous.active_total() > 0;
        self.previous = summary;

        if summary.active_total() > 0 {
            let current = snapshot
                .tasks
                .iter()
                .find(|t| t.status == TaskStatus::Downloading)
                .or_else(|| snapshot.tasks.iter().find(|t| t.status == TaskStatus::Queued))
                .cloned();
            QueueNotice::Progress {
                pending: summary.pending,
                active: summary.active,
                failed: summary.failed,
                current,
            }
        } else if was_active {
            QueueNotice::Complete {
                failed: summary.failed,
            }
        } else if summary.failed == 0 {
            QueueNotice::Dismiss
        } else {
            QueueNotice::Unchanged
        }
    }
}
