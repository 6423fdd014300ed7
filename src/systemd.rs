//! Optional sd_notify integration for running under a `Type=notify` unit.
//!
//! Every method is a no-op when disabled or off Linux, so callers never need
//! their own `#[cfg]`.

use crate::sync::RunReport;

#[derive(Debug, Clone, Copy)]
pub(crate) struct SystemdNotifier {
    enabled: bool,
}

impl SystemdNotifier {
    pub(crate) fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// `READY=1`: startup checks passed, the first run is about to start.
    pub(crate) fn notify_ready(&self) {
        self.send(Message::Ready);
    }

    /// `STOPPING=1`.
    pub(crate) fn notify_stopping(&self) {
        self.send(Message::Stopping);
    }

    pub(crate) fn notify_status(&self, status: &str) {
        self.send(Message::Status(status));
    }

    /// Publish the outcome of a finished run as the unit status line.
    pub(crate) fn notify_run_complete(&self, report: &RunReport) {
        if self.enabled {
            self.notify_status(&run_status_line(report));
        }
    }

    fn send(&self, message: Message<'_>) {
        if self.enabled {
            send_impl(message);
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Message<'a> {
    Ready,
    Stopping,
    Status(&'a str),
}

fn run_status_line(report: &RunReport) -> String {
    format!(
        "Last run: {} new image(s), {} delivered, {} failed",
        report.images_processed,
        report.total_delivered(),
        report.total_failed()
    )
}

#[cfg(target_os = "linux")]
fn send_impl(message: Message<'_>) {
    use sd_notify::NotifyState;

    let state = match message {
        Message::Ready => NotifyState::Ready,
        Message::Stopping => NotifyState::Stopping,
        Message::Status(s) => NotifyState::Status(s),
    };
    if let Err(e) = sd_notify::notify(false, &[state]) {
        tracing::debug!(error = %e, ?message, "sd_notify failed");
    }
}

#[cfg(not(target_os = "linux"))]
fn send_impl(_message: Message<'_>) {}
