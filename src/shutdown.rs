//! Signal handling for the sync daemon.
//!
//! Work is checkpointed per image. Each successful delivery is marked in the
//! ledger before the next sink is tried, and the orchestrator checks the
//! token before starting the next image. The first SIGINT, SIGTERM or SIGHUP
//! therefore lets the current image finish with every sink and then ends the
//! run, or ends the wait if the scheduler is idle. A second signal exits with
//! status 130, which can leave one delivery unmarked and repeated next run.

use std::sync::atomic::{AtomicU32, Ordering};

use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignalAction {
    /// Cancel the token and let the in-flight image reach its checkpoint.
    FinishImage,
    ExitNow,
}

#[derive(Debug, Default)]
struct SignalCounter(AtomicU32);

impl SignalCounter {
    fn record(&self) -> SignalAction {
        match self.0.fetch_add(1, Ordering::SeqCst) {
            0 => SignalAction::FinishImage,
            _ => SignalAction::ExitNow,
        }
    }
}

#[cfg(unix)]
async fn next_signal(
    sigterm: &mut tokio::signal::unix::Signal,
    sighup: &mut tokio::signal::unix::Signal,
) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
        _ = sighup.recv() => {}
    }
}

/// Spawn the signal listener and return the token it cancels.
pub(crate) fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let handler_token = token.clone();

    tokio::spawn(async move {
        let counter = SignalCounter::default();

        #[cfg(unix)]
        let (mut sigterm, mut sighup) = {
            use tokio::signal::unix::{signal, SignalKind};
            (
                signal(SignalKind::terminate()).expect("failed to register SIGTERM handler"),
                signal(SignalKind::hangup()).expect("failed to register SIGHUP handler"),
            )
        };

        loop {
            #[cfg(unix)]
            next_signal(&mut sigterm, &mut sighup).await;

            #[cfg(not(unix))]
            tokio::signal::ctrl_c()
                .await
                .expect("failed to listen for Ctrl+C");

            match counter.record() {
                SignalAction::FinishImage => {
                    tracing::info!(
                        "Shutdown requested, stopping after the current image (signal again to exit now)"
                    );
                    handler_token.cancel();
                }
                SignalAction::ExitNow => {
                    tracing::warn!("Exiting now; an unmarked delivery will be repeated next run");
                    std::process::exit(130);
                }
            }
        }
    });

    token
}
