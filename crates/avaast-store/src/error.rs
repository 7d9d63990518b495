//! Error taxonomy for the persistence layer.

use thiserror::Error;

/// Failures surfaced by the Cursor Store and Change Log.
///
/// Callers must tolerate a missing cursor (`None`, not an error) — this
/// variant set only covers genuine I/O/decode failures.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database I/O failed: {0}")]
    Io(#[from] sqlx::Error),
    #[error("failed to run embedded migrations: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("failed to decode stored value: {0}")]
    Decode(String),
}
