//! SQLite-backed job store.
//!
//! An empty path opens an in-memory database, in which case the pool is
//! capped at a single connection (each SQLite connection would otherwise
//! get its own private `:memory:` database).

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::errors::{Error, Result};
use crate::models::{JobDef, JobResult, JobRun, JobStatus, SchedType};
use crate::storage::JobStore;

pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    /// Open (and migrate) a store at `path`; `None` means in-memory.
    pub async fn open(path: Option<&Path>) -> Result<Self> {
        let pool = match path {
            Some(p) => {
                let options = SqliteConnectOptions::new()
                    .filename(p)
                    .create_if_missing(true)
                    .foreign_keys(true);
                SqlitePoolOptions::new()
                    .max_connections(5)
                    .connect_with(options)
                    .await?
            }
            None => {
                let options =
                    SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
                // The single connection IS the database; never let the pool
                // recycle it.
                SqlitePoolOptions::new()
                    .max_connections(1)
                    .min_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None)
                    .connect_with(options)
                    .await?
            }
        };

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                job_id TEXT PRIMARY KEY,
                job_name TEXT NOT NULL,
                schedule_type TEXT NOT NULL,
                schedule TEXT,
                next_run_time TIMESTAMP,
                status TEXT NOT NULL,
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS job_results (
                result_id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id TEXT NOT NULL,
                start_time TIMESTAMP NOT NULL,
                end_time TIMESTAMP NOT NULL,
                duration_micro BIGINT NOT NULL,
                status TEXT NOT NULL,
                success_msg TEXT,
                error_msg TEXT,
                FOREIGN KEY (job_id) REFERENCES jobs(job_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_job_results_job ON job_results(job_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_next_run ON jobs(next_run_time)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(sqlx::FromRow)]
struct JobDefRow {
    job_id: String,
    job_name: String,
    schedule_type: String,
    schedule: Option<String>,
    next_run_time: Option<DateTime<Utc>>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobDefRow> for JobDef {
    type Error = Error;

    fn try_from(row: JobDefRow) -> Result<Self> {
        Ok(JobDef {
            job_id: row.job_id,
            job_name: row.job_name,
            sched_type: parse_column::<SchedType>(&row.schedule_type)?,
            schedule: row.schedule.unwrap_or_default(),
            next_run_time: row.next_run_time,
            status: parse_column::<JobStatus>(&row.status)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct JobResultRow {
    result_id: i64,
    job_id: String,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    duration_micro: i64,
    status: String,
    success_msg: Option<String>,
    error_msg: Option<String>,
}

impl TryFrom<JobResultRow> for JobResult {
    type Error = Error;

    fn try_from(row: JobResultRow) -> Result<Self> {
        Ok(JobResult {
            result_id: row.result_id,
            job_id: row.job_id,
            start_time: row.start_time,
            end_time: row.end_time,
            duration: chrono::Duration::microseconds(row.duration_micro),
            status: parse_column::<JobStatus>(&row.status)?,
            success_msg: row.success_msg.unwrap_or_default(),
            error_msg: row.error_msg.unwrap_or_default(),
        })
    }
}

#[derive(sqlx::FromRow)]
struct JobRunRow {
    job_id: String,
    job_name: Option<String>,
    frequency: Option<String>,
    schedule: Option<String>,
    next_run_time: Option<DateTime<Utc>>,
    status: Option<String>,
    schedule_type: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
    result_id: Option<i64>,
    start_time: Option<DateTime<Utc>>,
    duration_micro: Option<i64>,
    result_status: Option<String>,
    error_msg: Option<String>,
    run_number: Option<i64>,
}

impl TryFrom<JobRunRow> for JobRun {
    type Error = Error;

    fn try_from(row: JobRunRow) -> Result<Self> {
        Ok(JobRun {
            job_id: row.job_id,
            job_name: row.job_name,
            frequency: row.frequency,
            schedule: row.schedule,
            next_run_time: row.next_run_time,
            status: row.status.as_deref().map(parse_column::<JobStatus>).transpose()?,
            sched_type: row
                .schedule_type
                .as_deref()
                .map(parse_column::<SchedType>)
                .transpose()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
            result_id: row.result_id,
            start_time: row.start_time,
            duration: row.duration_micro.map(chrono::Duration::microseconds),
            result_status: row
                .result_status
                .as_deref()
                .map(parse_column::<JobStatus>)
                .transpose()?,
            error_msg: row.error_msg,
            run_number: row.run_number,
        })
    }
}

fn parse_column<T>(s: &str) -> Result<T>
where
    T: FromStr<Err = String>,
{
    s.parse::<T>()
        .map_err(|e| Error::Store(sqlx::Error::Decode(e.into())))
}

// ---------------------------------------------------------------------------
// JobStore implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn save_job(&self, job: &JobDef) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (
                job_id, job_name, schedule_type, schedule,
                next_run_time, status, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (job_id) DO UPDATE SET
                job_name = excluded.job_name,
                schedule_type = excluded.schedule_type,
                schedule = excluded.schedule,
                next_run_time = excluded.next_run_time,
                status = excluded.status,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&job.job_id)
        .bind(&job.job_name)
        .bind(job.sched_type.as_str())
        .bind(&job.schedule)
        .bind(job.next_run_time)
        .bind(job.status.as_str())
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_job(&self, id: &str) -> Result<JobDef> {
        let row: JobDefRow = sqlx::query_as(
            r#"
            SELECT job_id, job_name, schedule_type, schedule,
                   next_run_time, status, created_at, updated_at
            FROM jobs WHERE job_id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::JobNotFound(id.to_string()))?;

        row.try_into()
    }

    async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        sched_type: Option<SchedType>,
    ) -> Result<Vec<JobDef>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT job_id, job_name, schedule_type, schedule, \
             next_run_time, status, created_at, updated_at FROM jobs",
        );
        let mut sep = " WHERE ";
        if let Some(status) = status {
            qb.push(sep).push("status = ").push_bind(status.as_str());
            sep = " AND ";
        }
        if let Some(sched_type) = sched_type {
            qb.push(sep)
                .push("schedule_type = ")
                .push_bind(sched_type.as_str());
        }
        qb.push(" ORDER BY next_run_time ASC");

        let rows: Vec<JobDefRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(JobDef::try_from).collect()
    }

    async fn update_job_status(&self, id: &str, status: JobStatus) -> Result<()> {
        let result = sqlx::query("UPDATE jobs SET status = ?, updated_at = ? WHERE job_id = ?")
            .bind(status.as_str())
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::JobNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn update_next_run_time(&self, id: &str, next_run: DateTime<Utc>) -> Result<()> {
        let result =
            sqlx::query("UPDATE jobs SET next_run_time = ?, updated_at = ? WHERE job_id = ?")
                .bind(next_run)
                .bind(Utc::now())
                .bind(id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(Error::JobNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn delete_job(&self, id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // Results first, the definition carries the foreign key target
        sqlx::query("DELETE FROM job_results WHERE job_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM jobs WHERE job_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn record_job_result(&self, result: &JobResult) -> Result<i64> {
        let duration_micro = result.duration.num_microseconds().unwrap_or(i64::MAX);
        let row = sqlx::query(
            r#"
            INSERT INTO job_results (
                job_id, start_time, end_time, duration_micro,
                status, success_msg, error_msg
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&result.job_id)
        .bind(result.start_time)
        .bind(result.end_time)
        .bind(duration_micro)
        .bind(result.status.as_str())
        .bind(&result.success_msg)
        .bind(&result.error_msg)
        .execute(&self.pool)
        .await?;
        Ok(row.last_insert_rowid())
    }

    async fn get_job_results(&self, job_id: &str, limit: i64) -> Result<Vec<JobResult>> {
        let rows: Vec<JobResultRow> = sqlx::query_as(
            r#"
            SELECT result_id, job_id, start_time, end_time, duration_micro,
                   status, success_msg, error_msg
            FROM job_results
            WHERE job_id = ?
            ORDER BY start_time DESC
            LIMIT ?
            "#,
        )
        .bind(job_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(JobResult::try_from).collect()
    }

    async fn get_job_results_paginated(
        &self,
        job_id: &str,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<JobResult>, i64)> {
        let (total,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM job_results WHERE job_id = ?")
                .bind(job_id)
                .fetch_one(&self.pool)
                .await?;

        let rows: Vec<JobResultRow> = sqlx::query_as(
            r#"
            SELECT result_id, job_id, start_time, end_time, duration_micro,
                   status, success_msg, error_msg
            FROM job_results
            WHERE job_id = ?
            ORDER BY start_time DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(job_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let results = rows
            .into_iter()
            .map(JobResult::try_from)
            .collect::<Result<Vec<_>>>()?;
        Ok((results, total))
    }

    async fn get_job_runs_with_pagination(
        &self,
        results_per_job: i64,
    ) -> Result<(Vec<JobRun>, HashMap<String, i64>)> {
        let counts: Vec<(String, i64)> = sqlx::query_as(
            "SELECT job_id, COUNT(*) FROM job_results GROUP BY job_id",
        )
        .fetch_all(&self.pool)
        .await?;
        let totals: HashMap<String, i64> = counts.into_iter().collect();

        // One header row per job, unioned with that job's most recent
        // results ranked by a window function. The run number counts up
        // from the oldest result, so the newest of N carries number N.
        let rows: Vec<JobRunRow> = sqlx::query_as(
            r#"
            WITH job_counts AS (
                SELECT job_id, COUNT(*) AS total_count
                FROM job_results
                GROUP BY job_id
            ),
            job_header_rows AS (
                SELECT j.job_id, j.job_name,
                       CASE WHEN j.schedule IS NULL OR j.schedule = ''
                            THEN 'one-time' ELSE j.schedule END AS frequency,
                       j.schedule, j.next_run_time, j.status, j.schedule_type,
                       j.created_at, j.updated_at,
                       NULL AS result_id, NULL AS start_time, NULL AS duration_micro,
                       NULL AS result_status, NULL AS error_msg,
                       0 AS row_type, NULL AS run_number
                FROM jobs j
            ),
            ranked_results AS (
                SELECT r.job_id, NULL AS job_name, NULL AS frequency, NULL AS schedule,
                       NULL AS next_run_time, NULL AS status, NULL AS schedule_type,
                       j.created_at, NULL AS updated_at,
                       r.result_id, r.start_time, r.duration_micro,
                       r.status AS result_status, r.error_msg,
                       1 AS row_type,
                       ROW_NUMBER() OVER (
                           PARTITION BY r.job_id ORDER BY r.start_time DESC
                       ) AS rn,
                       jc.total_count - ROW_NUMBER() OVER (
                           PARTITION BY r.job_id ORDER BY r.start_time DESC
                       ) + 1 AS run_number
                FROM job_results r
                JOIN jobs j ON r.job_id = j.job_id
                JOIN job_counts jc ON r.job_id = jc.job_id
            )
            SELECT job_id, job_name, frequency, schedule, next_run_time, status,
                   schedule_type, created_at, updated_at, result_id, start_time,
                   duration_micro, result_status, error_msg, run_number
            FROM (
                SELECT job_id, job_name, frequency, schedule, next_run_time,
                       status, schedule_type, created_at, updated_at, result_id,
                       start_time, duration_micro, result_status, error_msg,
                       row_type, run_number
                FROM job_header_rows
                UNION ALL
                SELECT job_id, job_name, frequency, schedule, next_run_time,
                       status, schedule_type, created_at, updated_at, result_id,
                       start_time, duration_micro, result_status, error_msg,
                       row_type, run_number
                FROM ranked_results
                WHERE rn <= ?
            )
            ORDER BY created_at DESC, job_id, row_type, start_time DESC
            "#,
        )
        .bind(results_per_job)
        .fetch_all(&self.pool)
        .await?;

        let runs = rows
            .into_iter()
            .map(JobRun::try_from)
            .collect::<Result<Vec<_>>>()?;
        Ok((runs, totals))
    }

    async fn cleanup_job_results(&self, older_than: chrono::Duration) -> Result<u64> {
        let cutoff = Utc::now() - older_than;
        let result = sqlx::query("DELETE FROM job_results WHERE end_time < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        let removed = result.rows_affected();
        if removed > 0 {
            tracing::info!(removed, "cleaned up old job results");
        }
        Ok(removed)
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
