//! Cursor Store — durable `key -> i64` mapping used by the Watcher to resume
//! a relay/firehose subscription or a poll cycle after a restart.
//!
//! Cursor values are created lazily on first successful event; they are
//! never deleted, only overwritten (§3 Lifecycles). A single writer updates
//! a given key at a time; many readers may read concurrently.

use chrono::Utc;
use sqlx::Row;

use crate::{Database, DatabaseDriver, StorageError};

/// A stored cursor row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorRecord {
    pub key: String,
    pub value: i64,
}

impl Database {
    /// Reads the current cursor value for `key`, or `None` if it has never
    /// been written. Callers must treat a missing cursor as "start from the
    /// beginning", not as a failure.
    pub async fn get_cursor(&self, key: &str) -> Result<Option<i64>, StorageError> {
        let select = match self.driver() {
            DatabaseDriver::Sqlite => "SELECT value FROM cursors WHERE key = ?",
            DatabaseDriver::Postgres => "SELECT value FROM cursors WHERE key = $1",
        };
        let row = sqlx::query(select)
            .bind(key)
            .fetch_optional(self.pool())
            .await?;

        match row {
            Some(row) => Ok(Some(row.try_get::<i64, _>("value")?)),
            None => Ok(None),
        }
    }

    /// Atomically inserts or replaces the cursor value for `key`.
    pub async fn set_cursor(&self, key: &str, value: i64) -> Result<(), StorageError> {
        let now = Utc::now().to_rfc3339();
        match self.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(
                    "INSERT INTO cursors (key, value, updated_at) VALUES (?, ?, ?)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                )
                .bind(key)
                .bind(value)
                .bind(now)
                .execute(self.pool())
                .await?;
            }
            DatabaseDriver::Postgres => {
                sqlx::query(
                    "INSERT INTO cursors (key, value, updated_at) VALUES ($1, $2, $3)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                )
                .bind(key)
                .bind(value)
                .bind(now)
                .execute(self.pool())
                .await?;
            }
        }
        Ok(())
    }

    /// Lists every stored cursor, mainly for diagnostics/admin status views.
    pub async fn list_cursors(&self) -> Result<Vec<CursorRecord>, StorageError> {
        let mut rows = sqlx::query("SELECT key, value FROM cursors ORDER BY key ASC")
            .fetch(self.pool());

        let mut out = Vec::new();
        while let Some(row) = futures::TryStreamExt::try_next(&mut rows).await? {
            out.push(CursorRecord {
                key: row.try_get("key")?,
                value: row.try_get("value")?,
            });
        }
        Ok(out)
    }
}
