//! Configuration types for novel-dl

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Download behavior configuration (output root, concurrency, fetch limits)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Root directory for chapter output (default: "./downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Maximum concurrent worker slots (default: 3)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_downloads: usize,

    /// Upper bound on a single source fetch (default: 30 seconds)
    ///
    /// Expiry is treated as a transient failure and feeds the retry path.
    #[serde(default = "default_fetch_timeout", with = "duration_serde")]
    pub fetch_timeout: Duration,

    /// Bytes written between cancellation checkpoints (default: 64 KiB)
    #[serde(default = "default_write_chunk_size")]
    pub write_chunk_size: usize,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            max_concurrent_downloads: default_max_concurrent(),
            fetch_timeout: default_fetch_timeout(),
            write_chunk_size: default_write_chunk_size(),
        }
    }
}

/// Retry configuration for transient fetch failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retry budget: a task whose attempt counter reaches this value ends in Error (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before a requeued task becomes claimable again (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Queue store and status bus configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "./novel-dl.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Events buffered per status subscriber before it is resynced (default: 1000)
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            event_buffer: default_event_buffer(),
        }
    }
}

/// Disk space checking configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiskSpaceConfig {
    /// Enable disk space checking before each write (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Minimum free space to keep after a write (default: 64 MiB)
    #[serde(default = "default_min_free_space")]
    pub min_free_space: u64,
}

impl Default for DiskSpaceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_free_space: default_min_free_space(),
        }
    }
}

/// Polling cadence for external heartbeats (e.g. a foreground notification refresher)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Interval while work is being observed (default: 1 second)
    #[serde(default = "default_active_interval", with = "duration_serde")]
    pub active_interval: Duration,

    /// Interval once nothing is in flight (default: 30 seconds)
    #[serde(default = "default_idle_interval", with = "duration_serde")]
    pub idle_interval: Duration,

    /// How often the queue processor re-checks for retries whose backoff elapsed
    /// (default: 250 milliseconds)
    #[serde(default = "default_queue_poll_interval", with = "millis_serde")]
    pub queue_poll_interval: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            active_interval: default_active_interval(),
            idle_interval: default_idle_interval(),
            queue_poll_interval: default_queue_poll_interval(),
        }
    }
}

/// Main configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Download behavior
    #[serde(default)]
    pub download: DownloadConfig,

    /// Retry policy for transient failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Queue store and status bus
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Disk space pre-checks
    #[serde(default)]
    pub disk_space: DiskSpaceConfig,

    /// Heartbeat polling cadence
    #[serde(default)]
    pub polling: PollingConfig,
}

impl Config {
    /// Output root directory
    pub fn download_dir(&self) -> &PathBuf {
        &self.download.download_dir
    }

    /// Reject settings the scheduler cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.download.max_concurrent_downloads == 0 {
            return Err(Error::Config {
                message: "concurrency must be at least 1".to_string(),
                key: Some("max_concurrent_downloads".to_string()),
            });
        }
        if self.download.write_chunk_size == 0 {
            return Err(Error::Config {
                message: "write chunk size must be at least 1 byte".to_string(),
                key: Some("write_chunk_size".to_string()),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config {
                message: "retry budget must be at least 1".to_string(),
                key: Some("max_attempts".to_string()),
            });
        }
        if !self.retry.backoff_multiplier.is_finite() || self.retry.backoff_multiplier < 1.0 {
            return Err(Error::Config {
                message: "backoff multiplier must be a finite number of at least 1.0".to_string(),
                key: Some("backoff_multiplier".to_string()),
            });
        }
        if self.retry.max_delay < self.retry.initial_delay {
            return Err(Error::Config {
                message: "max retry delay must not be shorter than the initial delay".to_string(),
                key: Some("max_delay".to_string()),
            });
        }
        if self.persistence.event_buffer == 0 {
            return Err(Error::Config {
                message: "event buffer must hold at least one event".to_string(),
                key: Some("event_buffer".to_string()),
            });
        }
        Ok(())
    }
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_max_concurrent() -> usize {
    3
}

fn default_fetch_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_write_chunk_size() -> usize {
    64 * 1024
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./novel-dl.db")
}

fn default_event_buffer() -> usize {
    1000
}

fn default_min_free_space() -> u64 {
    64 * 1024 * 1024
}

fn default_active_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_idle_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_queue_poll_interval() -> Duration {
    Duration::from_millis(250)
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds)
mod millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
