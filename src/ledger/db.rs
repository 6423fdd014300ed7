//! Delivery ledger traits and SQLite implementation.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension};

use super::error::LedgerError;
use super::schema;
use super::types::{LastRun, LedgerSummary, RunStats, SinkSummary};
use crate::store::Fingerprint;

/// Durable, sink-scoped record of which fingerprints were delivered.
///
/// Object-safe so the orchestrator can hold an `Arc<dyn DeliveryLedger>`.
#[async_trait]
pub trait DeliveryLedger: Send + Sync {
    /// Whether `fingerprint` was already delivered to `sink`.
    ///
    /// Fails with [`LedgerError::Unavailable`] when the store cannot answer;
    /// it never reports `false` in that case.
    async fn exists(&self, sink: &str, fingerprint: &Fingerprint) -> Result<bool, LedgerError>;

    /// Record a delivery. Marking an already-marked key is a no-op and keeps
    /// the original `source_url` and timestamp.
    async fn mark(
        &self,
        sink: &str,
        fingerprint: &Fingerprint,
        source_url: &str,
    ) -> Result<(), LedgerError>;
}

/// Persistent history of sync runs.
#[async_trait]
pub trait RunJournal: Send + Sync {
    /// Start a new run and return its ID.
    async fn start_run(&self) -> Result<i64, LedgerError>;

    /// Complete a run with its statistics.
    async fn complete_run(&self, run_id: i64, stats: &RunStats) -> Result<(), LedgerError>;
}

/// SQLite implementation of the ledger.
pub struct SqliteLedger {
    /// Wrapped in Mutex because rusqlite::Connection is not Sync.
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl std::fmt::Debug for SqliteLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteLedger")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteLedger {
    /// Open or create a ledger at the given path.
    pub async fn open(path: &Path) -> Result<Self, LedgerError> {
        let path = path.to_path_buf();
        let path_clone = path.clone();

        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&path_clone).map_err(|e| LedgerError::Open {
                path: path_clone.clone(),
                source: e,
            })?;

            conn.pragma_update(None, "journal_mode", "WAL")
                .map_err(LedgerError::Migration)?;
            conn.pragma_update(None, "synchronous", "NORMAL")
                .map_err(LedgerError::Migration)?;
            conn.busy_timeout(Duration::from_secs(5))
                .map_err(LedgerError::Migration)?;

            schema::migrate(&conn)?;

            Ok::<_, LedgerError>(conn)
        })
        .await??;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Open an in-memory ledger (for testing).
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory().map_err(|e| LedgerError::Open {
            path: PathBuf::from(":memory:"),
            source: e,
        })?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, LedgerError> {
        self.conn
            .lock()
            .map_err(|e| LedgerError::Unavailable(e.to_string()))
    }

    /// Per-sink totals and the most recent run.
    pub async fn summary(&self) -> Result<LedgerSummary, LedgerError> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare(
                "SELECT sink, COUNT(*), MAX(delivered_at) FROM deliveries GROUP BY sink ORDER BY sink",
            )
            .map_err(LedgerError::unavailable)?;
        let sinks = stmt
            .query_map([], |row| {
                Ok(SinkSummary {
                    sink: row.get(0)?,
                    delivered: row.get::<_, i64>(1)? as u64,
                    last_delivered_at: row.get::<_, Option<i64>>(2)?.and_then(timestamp),
                })
            })
            .map_err(LedgerError::unavailable)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(LedgerError::unavailable)?;

        let last_run = conn
            .query_row(
                "SELECT started_at, completed_at, urls_seen, images_processed, deliveries_succeeded, deliveries_failed, interrupted FROM sync_runs ORDER BY id DESC LIMIT 1",
                [],
                |row| {
                    Ok(LastRun {
                        started_at: timestamp(row.get(0)?).unwrap_or(DateTime::UNIX_EPOCH),
                        completed_at: row.get::<_, Option<i64>>(1)?.and_then(timestamp),
                        stats: RunStats {
                            urls_seen: row.get::<_, i64>(2)? as u64,
                            images_processed: row.get::<_, i64>(3)? as u64,
                            deliveries_succeeded: row.get::<_, i64>(4)? as u64,
                            deliveries_failed: row.get::<_, i64>(5)? as u64,
                            interrupted: row.get::<_, i64>(6)? != 0,
                        },
                    })
                },
            )
            .optional()
            .map_err(LedgerError::unavailable)?;

        Ok(LedgerSummary { sinks, last_run })
    }
}

fn timestamp(ts: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(ts, 0).single()
}

#[async_trait]
impl DeliveryLedger for SqliteLedger {
    async fn exists(&self, sink: &str, fingerprint: &Fingerprint) -> Result<bool, LedgerError> {
        let conn = self.lock()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM deliveries WHERE sink = ?1 AND fingerprint = ?2",
                rusqlite::params![sink, fingerprint.to_hex()],
                |row| row.get(0),
            )
            .optional()
            .map_err(LedgerError::unavailable)?;
        Ok(found.is_some())
    }

    async fn mark(
        &self,
        sink: &str,
        fingerprint: &Fingerprint,
        source_url: &str,
    ) -> Result<(), LedgerError> {
        let delivered_at = Utc::now().timestamp();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO deliveries (sink, fingerprint, source_url, delivered_at) VALUES (?1, ?2, ?3, ?4) ON CONFLICT(sink, fingerprint) DO NOTHING",
            rusqlite::params![sink, fingerprint.to_hex(), source_url, delivered_at],
        )
        .map_err(LedgerError::unavailable)?;
        Ok(())
    }
}

#[async_trait]
impl RunJournal for SqliteLedger {
    async fn start_run(&self) -> Result<i64, LedgerError> {
        let started_at = Utc::now().timestamp();
        let conn = self.lock()?;
        conn.execute("INSERT INTO sync_runs (started_at) VALUES (?1)", [started_at])
            .map_err(LedgerError::unavailable)?;
        Ok(conn.last_insert_rowid())
    }

    async fn complete_run(&self, run_id: i64, stats: &RunStats) -> Result<(), LedgerError> {
        let completed_at = Utc::now().timestamp();
        let conn = self.lock()?;
        conn.execute(
            "UPDATE sync_runs SET completed_at = ?1, urls_seen = ?2, images_processed = ?3, deliveries_succeeded = ?4, deliveries_failed = ?5, interrupted = ?6 WHERE id = ?7",
            rusqlite::params![
                completed_at,
                stats.urls_seen as i64,
                stats.images_processed as i64,
                stats.deliveries_succeeded as i64,
                stats.deliveries_failed as i64,
                stats.interrupted as i64,
                run_id
            ],
        )
        .map_err(LedgerError::unavailable)?;
        Ok(())
    }
}
