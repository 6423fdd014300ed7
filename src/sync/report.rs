//! Per-run budget and outcome accounting.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::ledger::RunStats;

/// Caps how many images may represent new delivery work in one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunBudget {
    max_items: usize,
    processed: usize,
}

impl RunBudget {
    pub fn new(max_items: usize) -> Self {
        Self {
            max_items,
            processed: 0,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.processed >= self.max_items
    }

    /// Charge one image against the budget.
    pub fn consume(&mut self) {
        self.processed += 1;
    }

    pub fn processed(&self) -> usize {
        self.processed
    }

    pub fn max_items(&self) -> usize {
        self.max_items
    }
}

/// Outcome counters for one sink over one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkTally {
    /// Delivered and recorded in the ledger.
    pub delivered: usize,
    /// Already in the ledger; nothing sent.
    pub already_delivered: usize,
    /// Delivery attempted and failed; left unrecorded.
    pub failed: usize,
    /// Ledger could not answer or record; delivery skipped or unrecorded.
    pub ledger_errors: usize,
}

/// Summary of one orchestrator run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub urls_seen: usize,
    pub sources_failed: usize,
    pub fetch_failures: usize,
    /// Images that consumed budget.
    pub images_processed: usize,
    pub budget_exhausted: bool,
    /// Stopped between images because shutdown was requested.
    pub interrupted: bool,
    /// Sinks excluded from this run because their destination could not be
    /// resolved.
    pub disabled_sinks: Vec<String>,
    pub sinks: BTreeMap<String, SinkTally>,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn tally(&self, sink: &str) -> SinkTally {
        self.sinks.get(sink).copied().unwrap_or_default()
    }

    pub(crate) fn tally_mut(&mut self, sink: &str) -> &mut SinkTally {
        self.sinks.entry(sink.to_string()).or_default()
    }

    pub fn total_delivered(&self) -> usize {
        self.sinks.values().map(|t| t.delivered).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.sinks.values().map(|t| t.failed + t.ledger_errors).sum()
    }

    /// Counters for the run journal.
    pub fn stats(&self) -> RunStats {
        RunStats {
            urls_seen: self.urls_seen as u64,
            images_processed: self.images_processed as u64,
            deliveries_succeeded: self.total_delivered() as u64,
            deliveries_failed: self.total_failed() as u64,
            interrupted: self.interrupted,
        }
    }

    pub fn log_summary(&self) {
        tracing::info!("── Sync Summary ──");
        tracing::info!(
            "  {} URLs seen, {} images processed, {} download failures ({:.1}s)",
            self.urls_seen,
            self.images_processed,
            self.fetch_failures,
            self.elapsed.as_secs_f64()
        );
        if self.sources_failed > 0 {
            tracing::info!("  {} album source(s) failed", self.sources_failed);
        }
        for (name, tally) in &self.sinks {
            tracing::info!(
                "  {}: {} delivered, {} already delivered, {} failed, {} ledger errors",
                name,
                tally.delivered,
                tally.already_delivered,
                tally.failed,
                tally.ledger_errors
            );
        }
        for name in &self.disabled_sinks {
            tracing::info!("  {}: disabled for this run", name);
        }
        if self.budget_exhausted {
            tracing::info!("  Item budget reached; remaining images wait for the next run");
        }
        if self.interrupted {
            tracing::info!("  Interrupted by shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_exhausts_at_max() {
        let mut budget = RunBudget::new(2);
        assert!(!budget.is_exhausted());
        budget.consume();
        assert!(!budget.is_exhausted());
        budget.consume();
        assert!(budget.is_exhausted());
        assert_eq!(budget.processed(), 2);
        assert_eq!(budget.max_items(), 2);
    }

    #[test]
    fn test_zero_budget_is_exhausted_immediately() {
        assert!(RunBudget::new(0).is_exhausted());
    }

    #[test]
    fn test_stats_fold_ledger_errors_into_failures() {
        let mut report = RunReport {
            urls_seen: 4,
            images_processed: 2,
            ..Default::default()
        };
        *report.tally_mut("email") = SinkTally {
            delivered: 2,
            already_delivered: 1,
            failed: 1,
            ledger_errors: 0,
        };
        *report.tally_mut("photos") = SinkTally {
            delivered: 1,
            already_delivered: 0,
            failed: 0,
            ledger_errors: 2,
        };

        let stats = report.stats();
        assert_eq!(stats.urls_seen, 4);
        assert_eq!(stats.images_processed, 2);
        assert_eq!(stats.deliveries_succeeded, 3);
        assert_eq!(stats.deliveries_failed, 3);
        assert!(!stats.interrupted);
    }

    #[test]
    fn test_tally_for_unknown_sink_is_zero() {
        assert_eq!(RunReport::default().tally("email"), SinkTally::default());
    }
}
