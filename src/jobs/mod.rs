//! The job contract and the standard bounded execution wrapper.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::errors::Error;
use crate::models::SchedType;

/// Default wait after a job's deadline for the body to observe cancellation.
pub const DEFAULT_DEADLINE_GRACE: Duration = Duration::from_secs(5);

/// Runtime metrics reported by a job execution.
#[derive(Debug, Clone)]
pub struct RunStats {
    pub start_time_utc: DateTime<Utc>,
    pub duration: chrono::Duration,
    pub success_msg: String,
    pub error_trace: Option<String>,
}

impl RunStats {
    fn begin(start: DateTime<Utc>) -> Self {
        Self {
            start_time_utc: start,
            duration: chrono::Duration::zero(),
            success_msg: String::new(),
            error_trace: None,
        }
    }
}

/// A schedulable unit of work.
///
/// The manager measures its own wall-clock timing for the result row;
/// `RunStats` timing is informational.
#[async_trait]
pub trait Job: Send + Sync {
    /// Unique identifier; empty means "mint one at registration".
    fn id(&self) -> &str;
    /// Human-readable name.
    fn name(&self) -> &str;
    fn sched_type(&self) -> SchedType;
    /// Execute once. The token is advisory; bodies should observe it for
    /// shutdown and stop requests to work promptly.
    async fn run(&self, cancel: CancellationToken) -> anyhow::Result<RunStats>;
}

/// Registration descriptor for a job wired in by a collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub periodic: bool,
    /// Cron expression for periodic jobs, schedule literal (possibly
    /// empty) for one-time jobs.
    #[serde(default)]
    pub schedule: String,
    /// Per-run deadline in seconds; zero means no deadline.
    #[serde(default)]
    pub max_run_time_secs: u64,
    /// Start the job right after registration.
    #[serde(default = "default_auto_start")]
    pub auto_start: bool,
}

fn default_auto_start() -> bool {
    true
}

type WorkFuture = Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send>>;

/// The body of an [`FnJob`]: an async function from a cancellation token to
/// a success message.
pub type WorkFn = Arc<dyn Fn(CancellationToken) -> WorkFuture + Send + Sync>;

/// Build a [`WorkFn`] from an async closure.
pub fn work_fn<F, Fut>(f: F) -> WorkFn
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
{
    Arc::new(move |cancel| Box::pin(f(cancel)))
}

/// The standard job implementation: runs an async body under an optional
/// deadline with cooperative cancellation. Concrete jobs differ only in
/// their body function.
pub struct FnJob {
    id: String,
    name: String,
    sched_type: SchedType,
    max_run_time: Duration,
    grace: Duration,
    work: WorkFn,
}

impl FnJob {
    /// `max_run_time` of zero means the body is never timed out.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        sched_type: SchedType,
        max_run_time: Duration,
        work: WorkFn,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            sched_type,
            max_run_time,
            grace: DEFAULT_DEADLINE_GRACE,
            work,
        }
    }

    pub fn from_config(config: &JobConfig, work: WorkFn) -> Self {
        let sched_type = if config.periodic {
            SchedType::Periodic
        } else {
            SchedType::OneTime
        };
        Self::new(
            config.id.clone(),
            config.name.clone(),
            sched_type,
            Duration::from_secs(config.max_run_time_secs),
            work,
        )
    }

    /// Override the post-deadline grace period.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }
}

#[async_trait]
impl Job for FnJob {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn sched_type(&self) -> SchedType {
        self.sched_type
    }

    async fn run(&self, cancel: CancellationToken) -> anyhow::Result<RunStats> {
        let started = Utc::now();
        let mut stats = RunStats::begin(started);

        // Body on its own task, reporting through a one-slot channel, so a
        // deadline can expire without tearing the body down mid-await.
        let (done_tx, mut done_rx) = oneshot::channel::<anyhow::Result<String>>();
        let work = (self.work)(cancel.clone());
        tokio::spawn(async move {
            let outcome = work.await;
            let _ = done_tx.send(outcome);
        });

        let deadline = if self.max_run_time > Duration::ZERO {
            self.max_run_time
        } else {
            // Effectively no deadline
            Duration::from_secs(u64::MAX / 2)
        };

        tokio::select! {
            _ = cancel.cancelled() => {
                stats.duration = Utc::now() - started;
                stats.error_trace = Some(Error::Canceled.to_string());
                Err(Error::Canceled.into())
            }
            _ = tokio::time::sleep(deadline) => {
                // Deadline hit; give the body a short window to wind down
                match tokio::time::timeout(self.grace, &mut done_rx).await {
                    Ok(Ok(outcome)) => {
                        stats.duration = Utc::now() - started;
                        finish(stats, outcome)
                    }
                    _ => {
                        stats.duration = Utc::now() - started;
                        tracing::warn!(job = %self.name, "job exceeded its deadline and grace period");
                        Err(Error::DeadlineExceeded.into())
                    }
                }
            }
            outcome = &mut done_rx => {
                stats.duration = Utc::now() - started;
                match outcome {
                    Ok(outcome) => finish(stats, outcome),
                    Err(_) => Err(anyhow::anyhow!("job body ended without reporting an outcome")),
                }
            }
        }
    }
}

fn finish(mut stats: RunStats, outcome: anyhow::Result<String>) -> anyhow::Result<RunStats> {
    match outcome {
        Ok(msg) => {
            stats.success_msg = msg;
            Ok(stats)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_job(max_run_time: Duration, work: WorkFn) -> FnJob {
        FnJob::new("test-job", "Test job", SchedType::OneTime, max_run_time, work)
    }

    #[tokio::test]
    async fn test_body_success_returns_message() {
        let job = quick_job(
            Duration::ZERO,
            work_fn(|_cancel| async { Ok("all good".to_string()) }),
        );

        let stats = job.run(CancellationToken::new()).await.expect("run");
        assert_eq!(stats.success_msg, "all good");
        assert!(stats.duration >= chrono::Duration::zero());
    }

    #[tokio::test]
    async fn test_body_error_propagates() {
        let job = quick_job(
            Duration::ZERO,
            work_fn(|_cancel| async { Err(anyhow::anyhow!("backend unavailable")) }),
        );

        let err = job.run(CancellationToken::new()).await.unwrap_err();
        assert!(err.to_string().contains("backend unavailable"));
    }

    #[tokio::test]
    async fn test_zero_max_run_time_never_times_out() {
        let job = quick_job(
            Duration::ZERO,
            work_fn(|_cancel| async {
                tokio::time::sleep(Duration::from_millis(300)).await;
                Ok("slow but fine".to_string())
            }),
        );

        let stats = job.run(CancellationToken::new()).await.expect("run");
        assert_eq!(stats.success_msg, "slow but fine");
    }

    #[tokio::test]
    async fn test_deadline_with_grace_fails_stubborn_body() {
        let job = quick_job(
            Duration::from_millis(50),
            work_fn(|_cancel| async {
                // Ignores cancellation entirely
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok("too late".to_string())
            }),
        )
        .with_grace(Duration::from_millis(100));

        let start = std::time::Instant::now();
        let err = job.run(CancellationToken::new()).await.unwrap_err();
        let elapsed = start.elapsed();

        assert!(err.to_string().contains("deadline"));
        assert!(elapsed >= Duration::from_millis(150));
        assert!(elapsed < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_body_finishing_within_grace_wins() {
        let job = quick_job(
            Duration::from_millis(50),
            work_fn(|_cancel| async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok("made it".to_string())
            }),
        )
        .with_grace(Duration::from_millis(500));

        let stats = job.run(CancellationToken::new()).await.expect("run");
        assert_eq!(stats.success_msg, "made it");
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_run() {
        let job = quick_job(
            Duration::ZERO,
            work_fn(|_cancel| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok("never reached".to_string())
            }),
        );

        let token = CancellationToken::new();
        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let err = job.run(token).await.unwrap_err();
        assert!(err.to_string().contains("canceled"));
    }

    #[tokio::test]
    async fn test_from_config_maps_fields() {
        let config = JobConfig {
            id: "cfg-job".to_string(),
            name: "Configured job".to_string(),
            periodic: true,
            schedule: "*/5 * * * * *".to_string(),
            max_run_time_secs: 30,
            auto_start: true,
        };
        let job = FnJob::from_config(&config, work_fn(|_| async { Ok(String::new()) }));

        assert_eq!(job.id(), "cfg-job");
        assert_eq!(job.name(), "Configured job");
        assert_eq!(job.sched_type(), SchedType::Periodic);
        assert_eq!(job.max_run_time, Duration::from_secs(30));
    }

    #[test]
    fn test_job_config_auto_start_defaults_true() {
        let json = r#"{"id": "j", "name": "J"}"#;
        let config: JobConfig = serde_json::from_str(json).expect("deserialize");
        assert!(config.auto_start);
        assert!(!config.periodic);
        assert_eq!(config.max_run_time_secs, 0);
    }
}
