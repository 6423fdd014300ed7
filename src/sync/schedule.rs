//! Fixed-interval run scheduling.

use std::future::Future;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Call `cycle` immediately, then once per `period` measured between run
/// starts, until `shutdown` is cancelled. Returns the number of runs.
///
/// Runs never overlap. Ticks that fall due while a run is still going are
/// collapsed into a single follow-up run instead of queueing up.
pub async fn run_periodically<F, Fut>(
    period: Duration,
    shutdown: CancellationToken,
    mut cycle: F,
) -> u64
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut runs = 0;

    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        cycle().await;
        runs += 1;

        if shutdown.is_cancelled() {
            break;
        }
        tracing::info!("Next sync in {}s", period.as_secs());
    }

    runs
}
