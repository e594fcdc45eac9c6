//! One-shot timer driver for scheduled one-time jobs.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

/// A stoppable one-shot timer. Stopping after the fire instant is a no-op.
pub struct ScheduledTimer {
    cancel: CancellationToken,
}

impl ScheduledTimer {
    /// Cancel the pending fire. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

/// Run `fut` once at `at`. If `at` is already in the past, fire immediately.
pub fn run_at<F>(at: DateTime<Utc>, fut: F) -> ScheduledTimer
where
    F: Future<Output = ()> + Send + 'static,
{
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        let wait = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(wait) => fut.await,
        }
    });
    ScheduledTimer { cancel }
}
