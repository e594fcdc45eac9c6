use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Construction-time configuration for the job manager.
///
/// Everything is consumed when the manager is built; nothing is re-read at
/// runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Path to the SQLite database file. `None` means in-memory.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    /// Capacity of the buffered results channel.
    #[serde(default = "default_results_capacity")]
    pub results_capacity: usize,
    /// How often the results-cleanup loop runs.
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    /// Results older than this are deleted by the cleanup loop.
    #[serde(default = "default_cleanup_retention_secs")]
    pub cleanup_retention_secs: u64,
    /// Consecutive failed deliveries before a broker sink is dropped.
    #[serde(default = "default_subscriber_fail_threshold")]
    pub subscriber_fail_threshold: u32,
    /// Grace period after a job's deadline before the run is abandoned.
    #[serde(default = "default_deadline_grace_secs")]
    pub deadline_grace_secs: u64,
    /// Default drain window for `shutdown`.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_results_capacity() -> usize {
    256
}

fn default_cleanup_interval_secs() -> u64 {
    3_600 // hourly
}

fn default_cleanup_retention_secs() -> u64 {
    7 * 24 * 3_600 // one week
}

fn default_subscriber_fail_threshold() -> u32 {
    3
}

fn default_deadline_grace_secs() -> u64 {
    5
}

fn default_shutdown_timeout_secs() -> u64 {
    20
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            results_capacity: default_results_capacity(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            cleanup_retention_secs: default_cleanup_retention_secs(),
            subscriber_fail_threshold: default_subscriber_fail_threshold(),
            deadline_grace_secs: default_deadline_grace_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl ManagerConfig {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn cleanup_retention(&self) -> Duration {
        Duration::from_secs(self.cleanup_retention_secs)
    }

    pub fn deadline_grace(&self) -> Duration {
        Duration::from_secs(self.deadline_grace_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
