//! Durable persistence layer for the Watcher's cursor bookkeeping and the
//! append-only Change Log.
//!
//! Mirrors the connection-handling shape of the platform's other `sqlx::Any`
//! backed stores: a single [`Database`] handle wraps either a SQLite or
//! Postgres pool chosen from the connection URL, runs embedded migrations on
//! connect, and exposes narrow, purpose-built query methods rather than a
//! generic SQL surface.

pub mod changelog;
pub mod cursor;
pub mod error;

pub use changelog::{ChangeLogEntry, ChangeLogFilters, EventKind, NewChangeLogEntry};
pub use cursor::CursorRecord;
pub use error::StorageError;

use std::{path::Path, sync::Once};

use sqlx::{
    any::AnyPoolOptions,
    migrate::MigrateError,
    AnyPool,
};

/// Default busy timeout so a single writer never starves readers under load.
const SQLITE_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Supported database backends for the persistence layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DatabaseDriver {
    Sqlite,
    Postgres,
}

/// Primary entry point to the persistence layer. Cheap to clone — it holds a
/// pooled connection handle, not a dedicated connection.
#[derive(Clone, Debug)]
pub struct Database {
    pool: AnyPool,
    driver: DatabaseDriver,
}

impl Database {
    /// Establishes (or creates) a connection pool for the given database URL.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        static DRIVERS: Once = Once::new();
        DRIVERS.call_once(|| {
            sqlx::any::install_default_drivers();
        });

        let driver = if database_url.starts_with("postgres://")
            || database_url.starts_with("postgresql://")
        {
            DatabaseDriver::Postgres
        } else {
            DatabaseDriver::Sqlite
        };

        let max_connections = match driver {
            DatabaseDriver::Sqlite if database_url.contains(":memory:") => 1,
            _ => 8,
        };

        let pool = AnyPoolOptions::new()
            .min_connections(1)
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        let migration_result = match driver {
            DatabaseDriver::Sqlite => sqlx::migrate!("./migrations").run(&pool).await,
            DatabaseDriver::Postgres => sqlx::migrate!("./migrations_postgres").run(&pool).await,
        };
        if let Err(err) = migration_result {
            match &err {
                MigrateError::Execute(sqlx::Error::Database(db_err))
                    if db_err
                        .code()
                        .map(|code| matches!(code.as_ref(), "2067" | "1555" | "23505"))
                        .unwrap_or(false) => {}
                _ => return Err(StorageError::from(err)),
            }
        }

        if driver == DatabaseDriver::Sqlite {
            let _ = sqlx::query(&format!(
                "PRAGMA busy_timeout = {SQLITE_BUSY_TIMEOUT_MS}"
            ))
            .execute(&pool)
            .await;
        }

        Ok(Self { pool, driver })
    }

    /// Connects to a file path via the `sqlite://` scheme.
    pub async fn connect_file(path: &Path) -> Result<Self, StorageError> {
        let url = format!("sqlite://{}", path.display());
        Self::connect(&url).await
    }

    /// Opens an in-memory SQLite database, primarily for tests.
    pub async fn connect_in_memory() -> Result<Self, StorageError> {
        Self::connect("sqlite::memory:").await
    }

    /// Returns the underlying connection pool.
    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn driver(&self) -> DatabaseDriver {
        self.driver
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connects_and_migrates_in_memory() {
        let db = Database::connect_in_memory().await.unwrap();
        assert_eq!(db.driver(), DatabaseDriver::Sqlite);
    }
}
