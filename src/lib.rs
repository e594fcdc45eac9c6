//! A persistent job-scheduling engine.
//!
//! Jobs register with either a 6-field cron expression (periodic) or a
//! schedule literal (one-time), run under bounded deadlines with
//! cooperative cancellation, and every execution outcome is recorded in a
//! SQLite-backed results log. Lifecycle changes fan out through a
//! non-blocking pub/sub broker so observers can refresh without ever
//! slowing the scheduler down.
//!
//! The [`manager::JobManager`] is the entry point: set up jobs, start and
//! stop them, trigger them manually, and shut the whole engine down with a
//! bounded drain.

pub mod broker;
pub mod errors;
pub mod jobs;
pub mod manager;
pub mod models;
pub mod schedule;
pub mod storage;

pub use broker::{Broker, Subscription, JOB_UPDATE_TOPIC};
pub use errors::{Error, Result};
pub use jobs::{work_fn, FnJob, Job, JobConfig, RunStats, WorkFn};
pub use manager::JobManager;
pub use models::{JobDef, JobResult, JobRun, JobStatus, ManagerConfig, SchedType};
pub use storage::{JobStore, SqliteJobStore};
