//! Status bus: replay-latest snapshot plus a live stream of deltas
//!
//! Every queue mutation is published here exactly once, after it is durable.
//! The bus keeps the folded [`QueueSnapshot`] and a broadcast channel of
//! [`Event`]s. A publish updates both while holding the snapshot lock, and a
//! subscribe reads the snapshot and registers its receiver under the same
//! lock, so a subscriber sees every event that happened after its snapshot
//! and none that happened before it.
//!
//! A subscriber that falls more than `event_buffer` events behind gets a
//! [`StatusUpdate::Resync`] with a fresh snapshot instead of the missed events,
//! so it can never silently miss a terminal transition.

use crate::types::{Event, QueueSnapshot};
use futures::Stream;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::WatchStream;

/// Publish/subscribe hub for queue state
pub struct StatusBus {
    snapshot: watch::Sender<QueueSnapshot>,
    events: broadcast::Sender<Event>,
}

/// One item delivered to a subscriber
#[derive(Clone, Debug, PartialEq)]
pub enum StatusUpdate {
    /// A single state change, in publish order
    Event(Event),
    /// The subscriber lagged; this snapshot replaces its local state
    Resync(QueueSnapshot),
}

/// A subscriber's view of the bus
pub struct StatusSubscription {
    /// Queue state at the moment of subscription
    pub snapshot: QueueSnapshot,
    receiver: broadcast::Receiver<Event>,
    bus: Arc<StatusBus>,
}

impl StatusBus {
    /// Create a bus that buffers up to `capacity` events per subscriber
    pub fn new(initial: QueueSnapshot, capacity: usize) -> Self {
        let (snapshot, _) = watch::channel(initial);
        let (events, _) = broadcast::channel(capacity.max(1));
        Self { snapshot, events }
    }

    /// Fold `event` into the snapshot and deliver it to every subscriber
    ///
    /// If there are no active subscribers, the event is only folded.
    pub fn publish(&self, event: Event) {
        self.snapshot.send_modify(|snapshot| {
            snapshot.apply(&event);
            self.events.send(event).ok();
        });
    }

    /// Replace the whole snapshot without emitting an event (startup restore)
    pub fn reset(&self, snapshot: QueueSnapshot) {
        self.snapshot.send_replace(snapshot);
    }

    /// Current queue state
    pub fn snapshot(&self) -> QueueSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Subscribe: current snapshot plus every later event
    pub fn subscribe(self: &Arc<Self>) -> StatusSubscription {
        // Holding the borrow blocks publish() until the receiver exists
        let guard = self.snapshot.borrow();
        let receiver = self.events.subscribe();
        let snapshot = guard.clone();
        drop(guard);

        StatusSubscription {
            snapshot,
            receiver,
            bus: Arc::clone(self),
        }
    }

    /// Latest-value channel of full snapshots, for observers that only need
    /// the current state (heartbeats, progress notifications)
    pub fn watch(&self) -> watch::Receiver<QueueSnapshot> {
        self.snapshot.subscribe()
    }

    /// [`watch`](Self::watch) as a stream, starting with the current snapshot
    pub fn snapshots(&self) -> WatchStream<QueueSnapshot> {
        WatchStream::new(self.snapshot.subscribe())
    }

    /// Raw event receiver without snapshot replay
    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }
}

impl StatusSubscription {
    /// Next update, or `None` once the bus is gone
    pub async fn recv(&mut self) -> Option<StatusUpdate> {
        match self.receiver.recv().await {
            Ok(event) => Some(StatusUpdate::Event(event)),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "status subscriber lagged, resyncing");
                let fresh = self.bus.subscribe();
                self.receiver = fresh.receiver;
                Some(StatusUpdate::Resync(fresh.snapshot))
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    /// Keep a local snapshot current by folding updates into it
    ///
    /// Returns the update that was applied, or `None` once the bus is gone.
    pub async fn next_state(&mut self) -> Option<StatusUpdate> {
        let update = self.recv().await?;
        match &update {
            StatusUpdate::Event(event) => self.snapshot.apply(event),
            StatusUpdate::Resync(snapshot) => self.snapshot = snapshot.clone(),
        }
        Some(update)
    }

    /// Convert into a stream of updates
    pub fn into_stream(self) -> impl Stream<Item = StatusUpdate> {
        futures::stream::unfold(self, |mut sub| async move {
            let update = sub.recv().await?;
            Some((update, sub))
        })
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        ChapterId, DownloadFormat, DownloadTask, DownloadType, NovelId, Progress, TaskId,
        TaskStatus,
    };
    use futures::StreamExt;

    fn queued(id: i64) -> DownloadTask {
        DownloadTask {
            id: TaskId(id),
            novel: NovelId(1),
            chapter: ChapterId(id),
            download_type: DownloadType::Original,
            format: DownloadFormat::Html,
            status: TaskStatus::Queued,
            attempt: 0,
            progress: Progress::default(),
            last_error: None,
            novel_title: None,
            chapter_name: None,
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn late_subscriber_sees_current_state_then_deltas() {
        let bus = Arc::new(StatusBus::new(QueueSnapshot::default(), 16));
        bus.publish(Event::Queued { task: queued(1) });
        bus.publish(Event::Started { id: TaskId(1) });

        let mut sub = bus.subscribe();
        assert_eq!(
            sub.snapshot.task(TaskId(1)).unwrap().status,
            TaskStatus::Downloading
        );

        bus.publish(Event::Completed {
            id: TaskId(1),
            path: "/tmp/1.html".into(),
            bytes: 3,
        });

        match sub.next_state().await.unwrap() {
            StatusUpdate::Event(Event::Completed { id, .. }) => assert_eq!(id, TaskId(1)),
            other => panic!("expected completion, got {:?}", other),
        }
        assert!(sub.snapshot.tasks.is_empty());
    }

    #[tokio::test]
    async fn lagging_subscriber_is_resynced() {
        let bus = Arc::new(StatusBus::new(QueueSnapshot::default(), 2));
        let mut sub = bus.subscribe();

        for id in 1..=5 {
            bus.publish(Event::Queued { task: queued(id) });
        }

        match sub.recv().await.unwrap() {
            StatusUpdate::Resync(snapshot) => assert_eq!(snapshot.tasks.len(), 5),
            other => panic!("expected resync, got {:?}", other),
        }

        bus.publish(Event::Removed { id: TaskId(3) });
        assert_eq!(
            sub.recv().await.unwrap(),
            StatusUpdate::Event(Event::Removed { id: TaskId(3) })
        );
    }

    #[tokio::test]
    async fn per_task_order_is_preserved() {
        let bus = Arc::new(StatusBus::new(QueueSnapshot::default(), 64));
        let sub = bus.subscribe();

        bus.publish(Event::Queued { task: queued(7) });
        bus.publish(Event::Started { id: TaskId(7) });
        bus.publish(Event::Completed {
            id: TaskId(7),
            path: "/tmp/7.html".into(),
            bytes: 1,
        });

        let statuses: Vec<TaskStatus> = sub
            .into_stream()
            .take(3)
            .filter_map(|update| async move {
                match update {
                    StatusUpdate::Event(event) => event.status(),
                    StatusUpdate::Resync(_) => None,
                }
            })
            .collect()
            .await;

        assert_eq!(
            statuses,
            vec![
                TaskStatus::Queued,
                TaskStatus::Downloading,
                TaskStatus::Completed
            ]
        );
    }

    #[tokio::test]
    async fn watch_reflects_latest_snapshot() {
        let bus = StatusBus::new(QueueSnapshot::default(), 4);
        let mut rx = bus.watch();

        bus.publish(Event::QueuePaused);
        rx.changed().await.unwrap();
        assert!(!rx.borrow().running);

        bus.publish(Event::QueueResumed);
        assert!(bus.snapshot().running);
    }
}
