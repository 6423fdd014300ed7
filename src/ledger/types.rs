//! Types for the delivery ledger.

use chrono::{DateTime, Utc};

/// Counters persisted at the end of a sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub urls_seen: u64,
    pub images_processed: u64,
    pub deliveries_succeeded: u64,
    pub deliveries_failed: u64,
    /// Whether the run stopped early because of a shutdown request.
    pub interrupted: bool,
}

/// Per-sink delivery totals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkSummary {
    pub sink: String,
    pub delivered: u64,
    pub last_delivered_at: Option<DateTime<Utc>>,
}

/// The most recent sync run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastRun {
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub stats: RunStats,
}

/// Summary of the ledger contents, for the `status` command.
#[derive(Debug, Clone, Default)]
pub struct LedgerSummary {
    /// Sorted by sink name.
    pub sinks: Vec<SinkSummary>,
    pub last_run: Option<LastRun>,
}
