use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current state of a job, as recorded in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Created,
    Scheduled,
    Running,
    Paused,
    Stopped,
    Cancelled,
    Complete,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Created => "created",
            JobStatus::Scheduled => "scheduled",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Stopped => "stopped",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(JobStatus::Created),
            "scheduled" => Ok(JobStatus::Scheduled),
            "running" => Ok(JobStatus::Running),
            "paused" => Ok(JobStatus::Paused),
            "stopped" => Ok(JobStatus::Stopped),
            "cancelled" => Ok(JobStatus::Cancelled),
            "complete" => Ok(JobStatus::Complete),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// Whether a job runs on a recurring cron schedule or once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedType {
    Periodic,
    OneTime,
}

impl SchedType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedType::Periodic => "periodic",
            SchedType::OneTime => "onetime",
        }
    }
}

impl fmt::Display for SchedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchedType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "periodic" => Ok(SchedType::Periodic),
            "onetime" => Ok(SchedType::OneTime),
            other => Err(format!("unknown schedule type '{}'", other)),
        }
    }
}

/// Persistent descriptor of a job.
///
/// For periodic jobs `schedule` is a 6-field cron expression (seconds
/// leftmost); for one-time jobs it is a schedule literal, or empty meaning
/// "run immediately on start".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDef {
    pub job_id: String,
    pub job_name: String,
    pub sched_type: SchedType,
    pub schedule: String,
    pub next_run_time: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of one job execution. One row per attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct JobResult {
    /// Monotonic id assigned by the store; zero until recorded.
    pub result_id: i64,
    pub job_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Stored with microsecond precision.
    pub duration: chrono::Duration,
    pub status: JobStatus,
    pub success_msg: String,
    pub error_msg: String,
}

/// Unified row produced by the paginated jobs-with-results view.
///
/// Either a header row (job fields populated, result fields `None`) or a
/// result row (result fields populated, most job fields `None`).
#[derive(Debug, Clone)]
pub struct JobRun {
    pub job_id: String,
    pub job_name: Option<String>,
    /// "one-time" for schedule-less jobs, otherwise the raw schedule.
    pub frequency: Option<String>,
    pub schedule: Option<String>,
    pub next_run_time: Option<DateTime<Utc>>,
    pub status: Option<JobStatus>,
    pub sched_type: Option<SchedType>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub result_id: Option<i64>,
    pub start_time: Option<DateTime<Utc>>,
    pub duration: Option<chrono::Duration>,
    pub result_status: Option<JobStatus>,
    pub error_msg: Option<String>,
    /// Counts upward from the oldest result for the job; newest result of
    /// a job with N results carries run number N.
    pub run_number: Option<i64>,
}

impl JobRun {
    pub fn is_header(&self) -> bool {
        self.result_id.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_string_roundtrip() {
        for status in [
            JobStatus::Created,
            JobStatus::Scheduled,
            JobStatus::Running,
            JobStatus::Paused,
            JobStatus::Stopped,
            JobStatus::Cancelled,
            JobStatus::Complete,
            JobStatus::Failed,
        ] {
            let parsed: JobStatus = status.as_str().parse().expect("parse status");
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_status_unknown_rejected() {
        assert!("exploded".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_sched_type_string_roundtrip() {
        for st in [SchedType::Periodic, SchedType::OneTime] {
            let parsed: SchedType = st.as_str().parse().expect("parse sched type");
            assert_eq!(parsed, st);
        }
    }

    #[test]
    fn test_status_serde_lowercase() {
        let json = serde_json::to_string(&JobStatus::Cancelled).expect("serialize");
        assert_eq!(json, "\"cancelled\"");
    }

    #[test]
    fn test_sched_type_serde_onetime() {
        let json = serde_json::to_string(&SchedType::OneTime).expect("serialize");
        assert_eq!(json, "\"onetime\"");
    }

    #[test]
    fn test_job_def_serde_roundtrip() {
        let now = Utc::now();
        let def = JobDef {
            job_id: "job-1".to_string(),
            job_name: "Report job".to_string(),
            sched_type: SchedType::Periodic,
            schedule: "*/30 * * * * *".to_string(),
            next_run_time: Some(now),
            status: JobStatus::Created,
            created_at: now,
            updated_at: now,
        };
        let json = serde_json::to_string(&def).expect("serialize");
        let back: JobDef = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, def);
    }

    #[test]
    fn test_job_run_header_detection() {
        let run = JobRun {
            job_id: "job-1".to_string(),
            job_name: Some("Report job".to_string()),
            frequency: Some("one-time".to_string()),
            schedule: Some(String::new()),
            next_run_time: None,
            status: Some(JobStatus::Created),
            sched_type: Some(SchedType::OneTime),
            created_at: Utc::now(),
            updated_at: Some(Utc::now()),
            result_id: None,
            start_time: None,
            duration: None,
            result_status: None,
            error_msg: None,
            run_number: None,
        };
        assert!(run.is_header());
    }
}
