use thiserror::Error as ThisError;

use crate::models::JobStatus;

/// Crate-wide error type.
///
/// Lifecycle and scheduling failures surface to the caller of the public
/// operation that triggered them; execution failures never do (jobs run
/// asynchronously) and are captured into the job's result row instead.
#[derive(Debug, ThisError)]
pub enum Error {
    #[error("job manager is shutting down")]
    ShuttingDown,

    #[error("job {0} not found")]
    JobNotFound(String),

    #[error("job {0} already exists")]
    JobExists(String),

    #[error("job {0} is already running")]
    JobAlreadyRunning(String),

    #[error("job {0} is not paused")]
    JobNotPaused(String),

    #[error("job {id} cannot be rescheduled in status {status}")]
    NotReschedulable { id: String, status: JobStatus },

    #[error("wrong schedule type: {0}")]
    WrongScheduleType(String),

    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("storage error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("job execution was canceled")]
    Canceled,

    #[error("job execution exceeded its deadline")]
    DeadlineExceeded,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
