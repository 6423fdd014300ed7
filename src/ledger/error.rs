//! Error types for the delivery ledger.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during ledger operations.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Failed to open or create the database file.
    #[error("Failed to open ledger at {path}: {source}")]
    Open {
        path: PathBuf,
        source: rusqlite::Error,
    },

    /// Failed to run a schema migration.
    #[error("Ledger migration failed: {0}")]
    Migration(#[from] rusqlite::Error),

    /// The backing store could not answer. Callers must not read this as
    /// "not delivered".
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    /// Failed to spawn a blocking task.
    #[error("Failed to spawn blocking task: {0}")]
    Spawn(#[from] tokio::task::JoinError),

    /// The database schema version is newer than supported.
    #[error("Ledger schema version {found} is newer than supported version {expected}")]
    UnsupportedSchemaVersion { found: i32, expected: i32 },
}

impl LedgerError {
    /// Create an Unavailable error from a rusqlite error.
    pub fn unavailable(source: rusqlite::Error) -> Self {
        Self::Unavailable(source.to_string())
    }
}
