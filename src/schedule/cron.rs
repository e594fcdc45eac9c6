//! Periodic driver: a registry of cron entries and a tick loop that
//! dispatches their callbacks.
//!
//! Entries use 6-field expressions with seconds leftmost. The loop sleeps
//! until the earliest upcoming occurrence and is woken early through a
//! `Notify` whenever the entry list changes.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::errors::{Error, Result};

/// Identifier of a registered cron entry.
pub type EntryId = u64;

type Callback = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

struct Entry {
    id: EntryId,
    cron: croner::Cron,
    callback: Callback,
}

/// Parse a 6-field cron expression (seconds leftmost).
pub fn parse_cron(expr: &str) -> Result<croner::Cron> {
    croner::Cron::new(expr)
        .with_seconds_required()
        .parse()
        .map_err(|e| Error::InvalidSchedule(format!("invalid cron expression '{}': {}", expr, e)))
}

/// Compute the next occurrence of a cron expression strictly after `after`.
pub fn next_occurrence(expr: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let cron = parse_cron(expr)?;
    cron.find_next_occurrence(&after, false)
        .map_err(|e| Error::InvalidSchedule(format!("no next occurrence for '{}': {}", expr, e)))
}

/// The cron driver engine.
pub struct CronDriver {
    entries: Mutex<Vec<Entry>>,
    notify: Notify,
    next_id: AtomicU64,
    stop: CancellationToken,
    callbacks: TaskTracker,
}

/// Handle returned by [`CronDriver::stop`]; completes once every callback
/// that was in flight at stop time has finished.
pub struct CronDrain {
    callbacks: TaskTracker,
}

impl CronDrain {
    pub async fn wait(self) {
        self.callbacks.wait().await;
    }
}

impl CronDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(Vec::new()),
            notify: Notify::new(),
            next_id: AtomicU64::new(1),
            stop: CancellationToken::new(),
            callbacks: TaskTracker::new(),
        })
    }

    /// Spawn the tick loop.
    pub fn start(self: &Arc<Self>) {
        let driver = Arc::clone(self);
        tokio::spawn(async move { driver.run().await });
    }

    /// Register a callback to fire on every matching tick of `expr`.
    pub fn add<F, Fut>(&self, expr: &str, callback: F) -> Result<EntryId>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cron = parse_cron(expr)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let callback: Callback = Arc::new(move || Box::pin(callback()));
        self.entries
            .lock()
            .expect("cron entries lock poisoned")
            .push(Entry { id, cron, callback });
        self.notify.notify_one();
        Ok(id)
    }

    /// Remove an entry; a no-op for unknown ids.
    pub fn remove(&self, id: EntryId) {
        self.entries
            .lock()
            .expect("cron entries lock poisoned")
            .retain(|e| e.id != id);
        self.notify.notify_one();
    }

    /// Number of registered entries.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("cron entries lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop the tick loop. Returns a drain handle that completes once
    /// in-flight callbacks have finished.
    pub fn stop(&self) -> CronDrain {
        self.stop.cancel();
        self.callbacks.close();
        CronDrain {
            callbacks: self.callbacks.clone(),
        }
    }

    async fn run(self: Arc<Self>) {
        loop {
            if self.stop.is_cancelled() {
                break;
            }

            let now = Utc::now();
            let mut next_runs: Vec<(DateTime<Utc>, Callback)> = Vec::new();
            {
                let entries = self.entries.lock().expect("cron entries lock poisoned");
                for entry in entries.iter() {
                    match entry.cron.find_next_occurrence(&now, false) {
                        Ok(next) => next_runs.push((next, Arc::clone(&entry.callback))),
                        Err(e) => {
                            tracing::error!("cron entry {} has no next occurrence: {}", entry.id, e);
                        }
                    }
                }
            }

            if next_runs.is_empty() {
                // Nothing registered; sleep until the entry list changes
                tokio::select! {
                    _ = self.notify.notified() => continue,
                    _ = self.stop.cancelled() => break,
                }
            }

            let earliest = next_runs.iter().map(|(t, _)| *t).min().unwrap();
            let sleep_for = (earliest - Utc::now()).to_std().unwrap_or(Duration::ZERO);

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {
                    let now = Utc::now();
                    for (next, callback) in &next_runs {
                        if *next <= now {
                            self.callbacks.spawn(callback());
                        }
                    }
                }
                _ = self.notify.notified() => {
                    // Entry list changed; re-evaluate from the top
                    continue;
                }
                _ = self.stop.cancelled() => break,
            }
        }
    }
}
