//! Runtime state tracking: shutdown detection and the queue running switch.

use crate::error::DatabaseError;
use crate::{Error, Result};

use super::Database;

impl Database {
    /// Check if the last shutdown was unclean
    ///
    /// Returns true if the previous session did not call set_clean_shutdown(),
    /// indicating a crash or forced termination.
    pub async fn was_unclean_shutdown(&self) -> Result<bool> {
        let value = self.get_state("clean_shutdown").await?;

        // If the value is missing or "false", it was an unclean shutdown
        Ok(value.is_none_or(|v| v != "true"))
    }

    /// Mark that the downloader has started
    ///
    /// If shutdown() is not called before the next startup,
    /// was_unclean_shutdown() will return true.
    pub async fn set_clean_start(&self) -> Result<()> {
        self.set_state("clean_shutdown", "false").await
    }

    /// Mark that the downloader is shutting down cleanly
    pub async fn set_clean_shutdown(&self) -> Result<()> {
        self.set_state("clean_shutdown", "true").await
    }

    /// Persisted queue-level running switch, if it was ever set
    pub async fn queue_running(&self) -> Result<Option<bool>> {
        Ok(self
            .get_state("queue_running")
            .await?
            .map(|value| value == "true"))
    }

    /// Persist the queue-level running switch so a pause survives restarts
    pub async fn set_queue_running(&self, running: bool) -> Result<()> {
        self.set_state("queue_running", if running { "true" } else { "false" })
            .await
    }

    async fn get_state(&self, key: &str) -> Result<Option<String>> {
        sqlx::query_scalar("SELECT value FROM runtime_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to read runtime state '{}': {}",
                    key, e
                )))
            })
    }

    async fn set_state(&self, key: &str, value: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO runtime_state (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to write runtime state '{}': {}",
                key, e
            )))
        })?;

        Ok(())
    }
}
