pub mod sqlite;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::Result;
use crate::models::{JobDef, JobResult, JobRun, JobStatus, SchedType};

pub use sqlite::SqliteJobStore;

/// Durable persistence of job definitions and execution results.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Upsert by job id; a conflict updates every mutable column and
    /// `updated_at`.
    async fn save_job(&self, job: &JobDef) -> Result<()>;
    async fn get_job(&self, id: &str) -> Result<JobDef>;
    /// List definitions, optionally filtered, ordered by next run time.
    async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        sched_type: Option<SchedType>,
    ) -> Result<Vec<JobDef>>;
    async fn update_job_status(&self, id: &str, status: JobStatus) -> Result<()>;
    async fn update_next_run_time(&self, id: &str, next_run: DateTime<Utc>) -> Result<()>;
    /// Delete a definition and all of its results in one transaction.
    async fn delete_job(&self, id: &str) -> Result<()>;
    /// Insert a result row, returning its assigned monotonic id.
    async fn record_job_result(&self, result: &JobResult) -> Result<i64>;
    /// Most recent results for a job, newest first.
    async fn get_job_results(&self, job_id: &str, limit: i64) -> Result<Vec<JobResult>>;
    /// A page of results plus the total count for the job.
    async fn get_job_results_paginated(
        &self,
        job_id: &str,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<JobResult>, i64)>;
    /// Unified view: one header row per job plus up to `results_per_job`
    /// recent results each, with per-job totals.
    async fn get_job_runs_with_pagination(
        &self,
        results_per_job: i64,
    ) -> Result<(Vec<JobRun>, HashMap<String, i64>)>;
    /// Delete results whose end time is older than `now - older_than`.
    /// Returns the number of rows removed.
    async fn cleanup_job_results(&self, older_than: chrono::Duration) -> Result<u64>;
    async fn close(&self) -> Result<()>;
}
