//! Core types for novel-dl

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Declares an `i64`-backed identifier with the conversions and sqlx bindings
/// shared by every id in this crate.
macro_rules! id_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Create a new id from its raw value
            pub fn new(id: i64) -> Self {
                Self(id)
            }

            /// Get the inner i64 value
            pub fn get(&self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.parse()?))
            }
        }

        impl sqlx::Type<sqlx::Sqlite> for $name {
            fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
                <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
            }

            fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
                <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
            ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
                sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for $name {
            fn decode(
                value: sqlx::sqlite::SqliteValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
                Ok(Self(id))
            }
        }
    };
}

id_newtype!(
    /// Unique identifier for a download task. Assigned by the queue store and never reused.
    TaskId
);

id_newtype!(
    /// Opaque reference to a novel owned by the library store
    NovelId
);

id_newtype!(
    /// Opaque reference to a chapter owned by the library store
    ChapterId
);

/// Whether a task stores the source's raw payload or a derived representation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadType {
    /// Raw chapter content as returned by the source
    #[default]
    Original,
    /// Derived content (e.g. a translation) produced for the chapter
    Transformed,
}

impl DownloadType {
    /// Convert integer code from the database to a DownloadType
    ///
    /// Returns `None` for unknown codes so callers can reject corrupt rows
    /// instead of guessing.
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(DownloadType::Original),
            1 => Some(DownloadType::Transformed),
            _ => None,
        }
    }

    /// Convert DownloadType to its database code
    pub fn to_i32(&self) -> i32 {
        match self {
            DownloadType::Original => 0,
            DownloadType::Transformed => 1,
        }
    }
}

/// Target on-disk encoding for a downloaded chapter
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadFormat {
    /// Source markup written verbatim
    #[default]
    Html,
    /// Single-chapter EPUB container
    Epub,
    /// Markup stripped to paragraphs of text
    PlainText,
    /// Minimal WordprocessingML document
    Docx,
}

impl DownloadFormat {
    /// Every supported format
    pub const ALL: [DownloadFormat; 4] = [
        DownloadFormat::Html,
        DownloadFormat::Epub,
        DownloadFormat::PlainText,
        DownloadFormat::Docx,
    ];

    /// Convert integer code from the database to a DownloadFormat
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(DownloadFormat::Html),
            1 => Some(DownloadFormat::Epub),
            2 => Some(DownloadFormat::PlainText),
            3 => Some(DownloadFormat::Docx),
            _ => None,
        }
    }

    /// Convert DownloadFormat to its database code
    pub fn to_i32(&self) -> i32 {
        match self {
            DownloadFormat::Html => 0,
            DownloadFormat::Epub => 1,
            DownloadFormat::PlainText => 2,
            DownloadFormat::Docx => 3,
        }
    }

    /// File extension used for outputs of this format
    pub fn extension(&self) -> &'static str {
        match self {
            DownloadFormat::Html => "html",
            DownloadFormat::Epub => "epub",
            DownloadFormat::PlainText => "txt",
            DownloadFormat::Docx => "docx",
        }
    }
}

/// Task status
///
/// Only `Queued` and `Error` are resting states; `Downloading` always resolves to
/// one of `Completed`, `Error`, `Queued` (automatic retry) or `Cancelled`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting to be claimed by a worker slot
    Queued,
    /// Claimed by a worker slot and in flight
    Downloading,
    /// Output published; the task has left the store
    Completed,
    /// Failed; kept in the store until retried or dismissed
    Error,
    /// Cancelled by the user; the task has left the store
    Cancelled,
}

impl TaskStatus {
    /// Convert integer status code to TaskStatus
    pub fn from_i32(status: i32) -> Option<Self> {
        match status {
            0 => Some(TaskStatus::Queued),
            1 => Some(TaskStatus::Downloading),
            2 => Some(TaskStatus::Completed),
            3 => Some(TaskStatus::Error),
            4 => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }

    /// Convert TaskStatus to integer status code
    pub fn to_i32(&self) -> i32 {
        match self {
            TaskStatus::Queued => 0,
            TaskStatus::Downloading => 1,
            TaskStatus::Completed => 2,
            TaskStatus::Error => 3,
            TaskStatus::Cancelled => 4,
        }
    }

    /// Completed and Cancelled tasks are removed from the store
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled)
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Queued, Downloading)
                | (Queued, Cancelled)
                | (Downloading, Completed)
                | (Downloading, Error)
                | (Downloading, Queued)
                | (Downloading, Cancelled)
                | (Error, Queued)
        )
    }
}

/// Byte-level progress of an in-flight task
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Bytes written to the temporary output so far
    pub bytes_written: u64,
    /// Total bytes of the rendered output, once known
    pub total_bytes: Option<u64>,
}

impl Progress {
    /// Progress as a percentage (0.0 to 100.0), if the total is known
    pub fn percent(&self) -> Option<f32> {
        match self.total_bytes {
            Some(0) => Some(100.0),
            Some(total) => Some((self.bytes_written as f64 / total as f64 * 100.0) as f32),
            None => None,
        }
    }
}

/// One unit of work tracked by the queue
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DownloadTask {
    /// Unique task identifier
    pub id: TaskId,
    /// Novel the chapter belongs to
    pub novel: NovelId,
    /// Chapter to download
    pub chapter: ChapterId,
    /// Raw or derived content
    pub download_type: DownloadType,
    /// Target on-disk encoding
    pub format: DownloadFormat,
    /// Current status
    pub status: TaskStatus,
    /// Retry counter, starts at 0
    pub attempt: u32,
    /// Byte progress
    pub progress: Progress,
    /// Summary of the last failure; present only when status is Error
    pub last_error: Option<String>,
    /// Novel title captured at enqueue time, for display
    pub novel_title: Option<String>,
    /// Chapter name captured at enqueue time, for display
    pub chapter_name: Option<String>,
    /// Unix timestamp of enqueue
    pub created_at: i64,
}

/// Full queue state as seen by observers
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Queue-level running switch
    pub running: bool,
    /// Current concurrency ceiling
    pub concurrency: usize,
    /// Every task still in the store, in queue order
    pub tasks: Vec<DownloadTask>,
    /// Queue-wide storage warning raised by the last storage failure
    pub storage_warning: Option<String>,
}

impl QueueSnapshot {
    /// Number of tasks waiting to be claimed
    pub fn pending_count(&self) -> usize {
        self.count(TaskStatus::Queued)
    }

    /// Number of tasks in flight
    pub fn active_count(&self) -> usize {
        self.count(TaskStatus::Downloading)
    }

    /// Number of failed tasks awaiting retry or dismissal
    pub fn failed_count(&self) -> usize {
        self.count(TaskStatus::Error)
    }

    /// Pending + active + failed
    pub fn queue_count(&self) -> usize {
        self.pending_count() + self.active_count() + self.failed_count()
    }

    /// Look up a task by id
    pub fn task(&self, id: TaskId) -> Option<&DownloadTask> {
        self.tasks.iter().find(|t| t.id == id)
    }

    fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    fn task_mut(&mut self, id: TaskId) -> Option<&mut DownloadTask> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    fn remove(&mut self, id: TaskId) {
        self.tasks.retain(|t| t.id != id);
    }

    /// Fold an event into the snapshot
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::Queued { task } => {
                if self.task(task.id).is_none() {
                    self.tasks.push(task.clone());
                }
            }
            Event::Started { id } => {
                if let Some(task) = self.task_mut(*id) {
                    task.status = TaskStatus::Downloading;
                    task.progress = Progress::default();
                    task.last_error = None;
                }
            }
            Event::Progress { id, progress } => {
                if let Some(task) = self.task_mut(*id) {
                    task.progress = *progress;
                }
            }
            Event::Completed { id, .. } => {
                self.remove(*id);
                // A successful publish means the output root is writable again
                self.storage_warning = None;
            }
            Event::Cancelled { id } | Event::Removed { id } => {
                self.remove(*id);
            }
            Event::Requeued { id, attempt, .. } => {
                // Automatic retry re-enters at the tail
                if let Some(pos) = self.tasks.iter().position(|t| t.id == *id) {
                    let mut task = self.tasks.remove(pos);
                    task.status = TaskStatus::Queued;
                    task.attempt = *attempt;
                    task.progress = Progress::default();
                    task.last_error = None;
                    self.tasks.push(task);
                }
            }
            Event::Failed { id, attempt, error, .. } => {
                if let Some(task) = self.task_mut(*id) {
                    task.status = TaskStatus::Error;
                    task.attempt = *attempt;
                    task.progress = Progress::default();
                    task.last_error = Some(error.clone());
                }
            }
            Event::Retried { id } => {
                if let Some(task) = self.task_mut(*id) {
                    task.status = TaskStatus::Queued;
                    task.attempt = 0;
                    task.last_error = None;
                }
            }
            Event::Reordered { order } => {
                let mut reordered = Vec::with_capacity(self.tasks.len());
                for id in order {
                    if let Some(pos) = self.tasks.iter().position(|t| t.id == *id) {
                        reordered.push(self.tasks.remove(pos));
                    }
                }
                // Anything the order did not mention keeps its relative position at the end
                reordered.append(&mut self.tasks);
                self.tasks = reordered;
            }
            Event::QueuePaused => self.running = false,
            Event::QueueResumed => {
                self.running = true;
                self.storage_warning = None;
            }
            Event::ConcurrencyChanged { concurrency } => self.concurrency = *concurrency,
            Event::StorageWarning { message } => self.storage_warning = Some(message.clone()),
            Event::Shutdown => {}
        }
    }
}

/// Why a task ended up in Error
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network timeout or temporary source failure; retried up to the budget
    Transient,
    /// Source can no longer resolve the chapter or returned malformed data
    Fatal,
    /// Output could not be written; likely affects every queued task
    Storage,
    /// User cancellation; never reported as a failure
    Cancelled,
}

/// Status bus events
///
/// Every queue mutation is published as one of these. Folding them in order
/// over the subscription snapshot (see [`QueueSnapshot::apply`]) reproduces the
/// store's current state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Task appended to the queue
    Queued {
        /// The new task
        task: DownloadTask,
    },

    /// Task claimed by a worker slot (QUEUED -> DOWNLOADING)
    Started {
        /// Task ID
        id: TaskId,
    },

    /// Bytes written for an in-flight task
    Progress {
        /// Task ID
        id: TaskId,
        /// Current progress
        progress: Progress,
    },

    /// Output published and library updated (DOWNLOADING -> COMPLETED)
    Completed {
        /// Task ID
        id: TaskId,
        /// Final output path
        path: PathBuf,
        /// Size of the published output
        bytes: u64,
    },

    /// Transient failure within budget; back at the queue tail (DOWNLOADING -> QUEUED)
    Requeued {
        /// Task ID
        id: TaskId,
        /// Attempt counter after the failure
        attempt: u32,
        /// Failure that triggered the retry
        error: String,
    },

    /// Task failed (DOWNLOADING -> ERROR)
    Failed {
        /// Task ID
        id: TaskId,
        /// Failure classification
        kind: FailureKind,
        /// Attempt counter at failure
        attempt: u32,
        /// Error summary
        error: String,
    },

    /// Task cancelled by the user
    Cancelled {
        /// Task ID
        id: TaskId,
    },

    /// Explicit retry of a failed task (ERROR -> QUEUED)
    Retried {
        /// Task ID
        id: TaskId,
    },

    /// Failed task dismissed from the store
    Removed {
        /// Task ID
        id: TaskId,
    },

    /// Queue order changed explicitly
    Reordered {
        /// Full queue order after the change
        order: Vec<TaskId>,
    },

    /// Queue-level switch turned off; no new claims
    QueuePaused,

    /// Queue-level switch turned on
    QueueResumed,

    /// Concurrency ceiling changed
    ConcurrencyChanged {
        /// New ceiling
        concurrency: usize,
    },

    /// A storage failure that probably affects every queued task
    StorageWarning {
        /// Error summary
        message: String,
    },

    /// Downloader is shutting down
    Shutdown,
}

impl Event {
    /// Task this event concerns, if any
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            Event::Queued { task } => Some(task.id),
            Event::Started { id }
            | Event::Progress { id, .. }
            | Event::Completed { id, .. }
            | Event::Requeued { id, .. }
            | Event::Failed { id, .. }
            | Event::Cancelled { id }
            | Event::Retried { id }
            | Event::Removed { id } => Some(*id),
            Event::Reordered { .. }
            | Event::QueuePaused
            | Event::QueueResumed
            | Event::ConcurrencyChanged { .. }
            | Event::StorageWarning { .. }
            | Event::Shutdown => None,
        }
    }

    /// Status the task reaches through this event, if it is a transition
    pub fn status(&self) -> Option<TaskStatus> {
        match self {
            Event::Queued { .. } | Event::Requeued { .. } | Event::Retried { .. } => {
                Some(TaskStatus::Queued)
            }
            Event::Started { .. } => Some(TaskStatus::Downloading),
            Event::Completed { .. } => Some(TaskStatus::Completed),
            Event::Failed { .. } => Some(TaskStatus::Error),
            Event::Cancelled { .. } => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }
}
