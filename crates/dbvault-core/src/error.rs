use std::time::Duration;

use thiserror::Error;

pub type DbvaultResult<T> = Result<T, DbvaultError>;

#[derive(Debug, Error)]
pub enum DbvaultError {
    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("integrity error: {0}")]
    Integrity(String),

    #[error(transparent)]
    JobState(#[from] JobStateError),

    #[error("input error: {0}")]
    Input(String),

    #[error("config error: {0}")]
    Config(String),
}

/// Ways a remote job can fail to produce what the caller asked for.
#[derive(Debug, Error)]
pub enum JobStateError {
    #[error("job {job_id} ended with status {status:?}")]
    Failed { job_id: String, status: String },

    #[error(
        "job {job_id}: {failures} consecutive status checks failed (last known status {last_status:?}): {last_error}"
    )]
    PollExhausted {
        job_id: String,
        last_status: String,
        failures: u32,
        last_error: String,
    },

    #[error("job {job_id}: still {last_status:?} after {waited:?}")]
    TimedOut {
        job_id: String,
        last_status: String,
        waited: Duration,
    },

    #[error("job {job_id}: polling cancelled")]
    Cancelled { job_id: String },

    #[error("job {job_id} is not a finished backup (type {job_type}, status {status:?})")]
    NotDownloadable {
        job_id: String,
        job_type: String,
        status: String,
    },

    #[error("job {job_id} carries no {what}")]
    MissingKeys { job_id: String, what: &'static str },

    #[error("no job found for task {task_id}")]
    NotFound { task_id: String },
}

/// Coarse error category, for callers that branch on the kind of failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Filesystem,
    Network,
    Integrity,
    JobState,
    Input,
    Config,
}

impl DbvaultError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DbvaultError::Filesystem(_) => ErrorKind::Filesystem,
            DbvaultError::Network(_) => ErrorKind::Network,
            DbvaultError::Integrity(_) => ErrorKind::Integrity,
            DbvaultError::JobState(_) => ErrorKind::JobState,
            DbvaultError::Input(_) => ErrorKind::Input,
            DbvaultError::Config(_) => ErrorKind::Config,
        }
    }

    /// Wrap an I/O error with the path (or other context) it happened on.
    pub fn fs(context: impl std::fmt::Display, err: std::io::Error) -> Self {
        DbvaultError::Filesystem(format!("{context}: {err}"))
    }
}
