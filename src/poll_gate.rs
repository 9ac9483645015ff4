//! Decides whether an external heartbeat must keep polling.
//!
//! A paused queue makes no new claims, but slots already DOWNLOADING are
//! allowed to drain. Observers keep their short interval until that drain is
//! over and may then back off to the idle interval.

use crate::config::PollingConfig;
use crate::types::{QueueSnapshot, TaskStatus};
use std::time::Duration;

/// True iff at least one task is in flight
///
/// Empty queues and queues holding only QUEUED or ERROR tasks have nothing
/// left to observe while paused.
pub fn should_keep_polling_while_paused(snapshot: &QueueSnapshot) -> bool {
    snapshot
        .tasks
        .iter()
        .any(|task| task.status == TaskStatus::Downloading)
}

/// Heartbeat cadence chosen for a snapshot
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollCadence {
    /// Work is running or draining; poll at the short interval
    Active(Duration),
    /// Nothing to observe; poll at the long interval
    Idle(Duration),
}

impl PollCadence {
    /// Interval to sleep before the next poll
    pub fn interval(&self) -> Duration {
        match self {
            PollCadence::Active(d) | PollCadence::Idle(d) => *d,
        }
    }
}

/// Pick the cadence for the next heartbeat tick
///
/// A running queue with pending or active work polls actively. A paused queue
/// polls actively only while it drains.
pub fn next_poll_cadence(snapshot: &QueueSnapshot, config: &PollingConfig) -> PollCadence {
    let busy = if snapshot.running {
        snapshot.pending_count() + snapshot.active_count() > 0
    } else {
        should_keep_polling_while_paused(snapshot)
    };

    if busy {
        PollCadence::Active(config.active_interval)
    } else {
        PollCadence::Idle(config.idle_interval)
    }
}
