//! Error types for novel-dl
//!
//! Failures are grouped by who produced them:
//! - [`FetchError`] from the source provider (retried or fatal)
//! - [`StorageError`] from the storage writer (fatal, surfaced queue-wide)
//! - [`TaskError`] from control operations on the queue
//! - [`DatabaseError`] from the persistent queue store
//!
//! [`Error::failure_kind`] maps any of them onto the task state machine.

use crate::types::FailureKind;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for novel-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for novel-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "max_attempts")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Queue control error
    #[error("task error: {0}")]
    Task(#[from] TaskError),

    /// Source provider failure
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Output could not be written
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Library entity not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Shutdown in progress - not accepting new tasks
    #[error("shutdown in progress: not accepting new tasks")]
    ShuttingDown,

    /// The task's cancellation token fired
    #[error("task cancelled")]
    Cancelled,

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Classify this error for the task state machine
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Error::Fetch(e) => e.failure_kind(),
            Error::Storage(_) | Error::Io(_) => FailureKind::Storage,
            Error::Cancelled => FailureKind::Cancelled,
            // The library store or queue store could not record the result
            Error::Database(_) | Error::Sqlx(_) => FailureKind::Storage,
            Error::Task(_)
            | Error::NotFound(_)
            | Error::Config { .. }
            | Error::Serialization(_)
            | Error::ShuttingDown
            | Error::Other(_) => FailureKind::Fatal,
        }
    }
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),

    /// Stored row could not be decoded
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Queue control errors
#[derive(Debug, Error)]
pub enum TaskError {
    /// Task not found in the store
    #[error("task {id} not found")]
    NotFound {
        /// The task ID that was not found
        id: i64,
    },

    /// Cannot perform operation in current state
    #[error("cannot {operation} task {id} in state {current_state}")]
    InvalidState {
        /// The task ID that is in an invalid state for the operation
        id: i64,
        /// The operation that was attempted (e.g., "retry", "dismiss")
        operation: String,
        /// The current state that prevents the operation
        current_state: String,
    },

    /// Requested queue position is outside the queue
    #[error("position {position} is out of range for a queue of {len} tasks")]
    PositionOutOfRange {
        /// Requested position
        position: usize,
        /// Queue length
        len: usize,
    },
}

/// Source provider failures
#[derive(Debug, Error)]
pub enum FetchError {
    /// The chapter reference no longer resolves at the source
    #[error("chapter not found at source: {0}")]
    NotFound(String),

    /// Network failure or temporary server-side error
    #[error("network error: {0}")]
    Network(String),

    /// The fetch exceeded its time budget
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),

    /// The source returned something unusable
    #[error("source error: {0}")]
    Source(String),

    /// The task was cancelled while fetching
    #[error("fetch cancelled")]
    Cancelled,
}

impl FetchError {
    /// Classify this failure for the task state machine
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            FetchError::Network(_) | FetchError::Timeout(_) => FailureKind::Transient,
            FetchError::NotFound(_) | FetchError::Source(_) => FailureKind::Fatal,
            FetchError::Cancelled => FailureKind::Cancelled,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_request() {
            FetchError::Network(e.to_string())
        } else if let Some(status) = e.status() {
            classify_status(status.as_u16(), e.to_string())
        } else {
            FetchError::Source(e.to_string())
        }
    }
}

/// Map an HTTP status code onto a fetch failure
pub(crate) fn classify_status(code: u16, message: String) -> FetchError {
    match code {
        404 | 410 => FetchError::NotFound(message),
        408 | 425 | 429 | 500..=599 => FetchError::Network(message),
        _ => FetchError::Source(message),
    }
}

/// Storage writer failures
#[derive(Debug, Error)]
pub enum StorageError {
    /// Not enough free space for the rendered output
    #[error("insufficient disk space: need {required} bytes, have {available} bytes")]
    InsufficientSpace {
        /// Number of bytes required, including the configured reserve
        required: u64,
        /// Number of bytes currently available on disk
        available: u64,
    },

    /// Filesystem operation failed at a path
    #[error("{operation} failed for {}: {source}", path.display())]
    Io {
        /// What was being done (e.g. "rename")
        operation: &'static str,
        /// Path involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The payload could not be converted to the requested format
    #[error("failed to render {format}: {reason}")]
    Render {
        /// Target format extension
        format: &'static str,
        /// Why rendering failed
        reason: String,
    },
}

impl StorageError {
    pub(crate) fn io(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        StorageError::Io {
            operation,
            path: path.into(),
            source,
        }
    }
}
