//! Sync orchestration.
//!
//! One run gathers URLs from every album source, downloads each image into
//! the content store, and offers it to every sink that has not yet received
//! it according to the delivery ledger. Nothing below this level may stop a
//! run: album, download, ledger and delivery failures are logged and
//! absorbed, and the run always produces a [`RunReport`].

pub mod report;
pub mod schedule;

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::ledger::DeliveryLedger;
use crate::sink::{Destination, Sink, SinkError};
use crate::source::AlbumSource;
use crate::store::{ImageStore, StoredImage};

pub use report::{RunBudget, RunReport, SinkTally};
pub use schedule::run_periodically;

/// A sink whose destination resolved for the current run.
struct ActiveSink<'a> {
    sink: &'a dyn Sink,
    destination: Destination,
    /// Set when the destination disappears mid-run.
    lost: bool,
}

pub struct SyncOrchestrator {
    sources: Vec<Arc<dyn AlbumSource>>,
    store: Arc<dyn ImageStore>,
    ledger: Arc<dyn DeliveryLedger>,
    sinks: Vec<Arc<dyn Sink>>,
}

impl SyncOrchestrator {
    pub fn new(
        sources: Vec<Arc<dyn AlbumSource>>,
        store: Arc<dyn ImageStore>,
        ledger: Arc<dyn DeliveryLedger>,
        sinks: Vec<Arc<dyn Sink>>,
    ) -> Self {
        Self {
            sources,
            store,
            ledger,
            sinks,
        }
    }

    /// Execute one sync run. At most `max_items` images are treated as new
    /// work; the rest are left for the next run. Shutdown is honoured
    /// between images, never in the middle of one.
    pub async fn run_once(&self, max_items: usize, shutdown: &CancellationToken) -> RunReport {
        let started = Instant::now();
        let mut report = RunReport::default();

        let urls = self.gather_urls(&mut report).await;
        report.urls_seen = urls.len();

        let mut active = self.resolve_sinks(&mut report).await;
        if active.is_empty() && !self.sinks.is_empty() {
            tracing::warn!("No sink could resolve its destination; downloads only this run");
        }

        let mut budget = RunBudget::new(max_items);
        for url in &urls {
            if shutdown.is_cancelled() {
                tracing::info!("Shutdown requested, stopping run before {}", url);
                report.interrupted = true;
                break;
            }
            if budget.is_exhausted() {
                tracing::debug!(
                    "Item budget of {} reached, leaving remaining URLs for the next run",
                    budget.max_items()
                );
                report.budget_exhausted = true;
                break;
            }

            let image = match self.store.fetch(url).await {
                Ok(image) => image,
                Err(e) if e.is_remote() => {
                    tracing::warn!(url = %url, error = %e, "Download failed, skipping");
                    report.fetch_failures += 1;
                    continue;
                }
                Err(e) => {
                    tracing::error!(url = %url, error = %e, "Could not store download, skipping");
                    report.fetch_failures += 1;
                    continue;
                }
            };

            if self.fan_out(&image, url, &mut active, &mut report).await {
                budget.consume();
            }
        }

        report.images_processed = budget.processed();
        report.elapsed = started.elapsed();
        report
    }

    /// Concatenate URLs from every source in configured order. A failing
    /// source is skipped.
    async fn gather_urls(&self, report: &mut RunReport) -> Vec<String> {
        let mut urls = Vec::new();
        for source in &self.sources {
            match source.image_urls().await {
                Ok(found) => {
                    tracing::info!("Found {} image URL(s) in {}", found.len(), source.label());
                    urls.extend(found);
                }
                Err(e) => {
                    tracing::warn!(album = %source.label(), error = %e, "Album source failed, skipping");
                    report.sources_failed += 1;
                }
            }
        }
        urls
    }

    /// Resolve each sink's destination once. Sinks that fail are left out of
    /// this run only.
    async fn resolve_sinks(&self, report: &mut RunReport) -> Vec<ActiveSink<'_>> {
        let mut active = Vec::with_capacity(self.sinks.len());
        for sink in &self.sinks {
            match sink.resolve_destination().await {
                Ok(destination) => {
                    tracing::debug!(sink = sink.name(), destination = %destination, "Resolved destination");
                    report.tally_mut(sink.name());
                    active.push(ActiveSink {
                        sink: sink.as_ref(),
                        destination,
                        lost: false,
                    });
                }
                Err(e) => {
                    tracing::error!(
                        sink = sink.name(),
                        error = %e,
                        "Could not resolve destination, disabling sink for this run"
                    );
                    report.disabled_sinks.push(sink.name().to_string());
                }
            }
        }
        active
    }

    /// Offer one stored image to every active sink. Returns whether any sink
    /// attempted a new delivery, which is what charges the budget.
    async fn fan_out(
        &self,
        image: &StoredImage,
        url: &str,
        active: &mut [ActiveSink<'_>],
        report: &mut RunReport,
    ) -> bool {
        let fingerprint = &image.fingerprint;
        let mut attempted = false;

        for ActiveSink {
            sink,
            destination,
            lost,
        } in active.iter_mut().filter(|a| !a.lost)
        {
            let name = sink.name();

            match self.ledger.exists(name, fingerprint).await {
                Ok(true) => {
                    tracing::debug!(sink = name, fingerprint = %fingerprint, "Already delivered");
                    report.tally_mut(name).already_delivered += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(
                        sink = name,
                        fingerprint = %fingerprint,
                        error = %e,
                        "Ledger check failed, skipping delivery"
                    );
                    report.tally_mut(name).ledger_errors += 1;
                    continue;
                }
            }

            attempted = true;
            if let Err(e) = sink.deliver(image, destination).await {
                if matches!(e, SinkError::AlbumNotFound(_)) {
                    tracing::error!(
                        sink = name,
                        destination = %destination,
                        "Destination no longer exists, disabling sink for the rest of this run"
                    );
                    *lost = true;
                    report.tally_mut(name).failed += 1;
                    report.disabled_sinks.push(name.to_string());
                    continue;
                }
                tracing::warn!(
                    sink = name,
                    url = %url,
                    fingerprint = %fingerprint,
                    error = %e,
                    "Delivery failed"
                );
                report.tally_mut(name).failed += 1;
                continue;
            }

            match self.ledger.mark(name, fingerprint, url).await {
                Ok(()) => {
                    tracing::info!(sink = name, url = %url, fingerprint = %fingerprint, "Delivered");
                    report.tally_mut(name).delivered += 1;
                }
                Err(e) => {
                    tracing::error!(
                        sink = name,
                        fingerprint = %fingerprint,
                        error = %e,
                        "Delivered but could not record delivery; it may be repeated"
                    );
                    report.tally_mut(name).ledger_errors += 1;
                }
            }
        }

        attempted
    }
}
