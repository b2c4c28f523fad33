//! Progress and log output hooks for the surrounding UI

use crate::poller::PollProgress;

/// Workflow stages announced to the [`Reporter`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    CreatingJob { job_type: &'static str },
    Polling { job_id: String },
    Downloading { job_id: String },
    Decrypting,
    Encrypting,
    Uploading { bytes: u64 },
    FetchingLogs { job_id: String },
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::CreatingJob { job_type } => write!(f, "creating {job_type} job"),
            Stage::Polling { job_id } => write!(f, "waiting for job {job_id}"),
            Stage::Downloading { job_id } => write!(f, "downloading artifact of job {job_id}"),
            Stage::Decrypting => f.write_str("decrypting"),
            Stage::Encrypting => f.write_str("encrypting"),
            Stage::Uploading { bytes } => write!(f, "uploading {bytes} bytes"),
            Stage::FetchingLogs { job_id } => write!(f, "fetching logs of job {job_id}"),
        }
    }
}

/// Receives progress and job log output. All methods default to no-ops.
pub trait Reporter: Send + Sync {
    fn stage(&self, _stage: &Stage) {}

    /// One call per status check
    fn poll_progress(&self, _progress: &PollProgress) {}

    /// Decrypted log output of a finished or failed job
    fn job_logs(&self, _job_id: &str, _logs: &str) {}
}

pub struct NullReporter;

impl Reporter for NullReporter {}
