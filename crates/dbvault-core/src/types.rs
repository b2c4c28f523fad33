use serde::{Deserialize, Serialize};

/// Statuses a job passes through before it settles.
pub const PENDING_STATUSES: [&str; 4] = ["scheduled", "queued", "started", "running"];

/// The only terminal status that counts as success.
pub const FINISHED_STATUS: &str = "finished";

/// Kind of work a remote job performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Backup,
    Restore,
    Import,
    Export,
    /// Any job type this client does not know about
    #[serde(other)]
    Other,
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobType::Backup => "backup",
            JobType::Restore => "restore",
            JobType::Import => "import",
            JobType::Export => "export",
            JobType::Other => "other",
        };
        f.write_str(s)
    }
}

/// Where a job status string sits in the job lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    /// Still scheduled, queued, started or running
    Pending,
    /// Terminal success
    Finished,
    /// Terminal failure (any status not recognised as pending or finished)
    Failed,
}

pub fn classify_status(status: &str) -> JobPhase {
    if status == FINISHED_STATUS {
        JobPhase::Finished
    } else if PENDING_STATUSES.contains(&status) {
        JobPhase::Pending
    } else {
        JobPhase::Failed
    }
}

/// Wrapped (hex, then base64) key and IV as stored on a job record
#[derive(Clone, Serialize, Deserialize)]
pub struct EncryptionStore {
    pub key: String,
    pub iv: String,
}

impl std::fmt::Debug for EncryptionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionStore")
            .field("key", &"[REDACTED]")
            .field("iv", &"[REDACTED]")
            .finish()
    }
}

/// A remote job as observed by this client. The remote system owns it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub status: String,
    #[serde(default)]
    pub created_at: String,
    /// Identifier of the task that spawned this job, when the remote reports one
    #[serde(default)]
    pub task_id: Option<String>,
    /// Key material for the job's artifact (finished backups)
    #[serde(default)]
    pub encryption_store: Option<EncryptionStore>,
    /// Key material for the job's encrypted log output
    #[serde(default)]
    pub logs_store: Option<EncryptionStore>,
}

impl Job {
    pub fn phase(&self) -> JobPhase {
        classify_status(&self.status)
    }

    pub fn is_finished_backup(&self) -> bool {
        self.job_type == JobType::Backup && self.phase() == JobPhase::Finished
    }
}

/// A short-lived URL issued for exactly one upload or download
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempUrl {
    pub url: String,
}

/// Per-pod capabilities reported by the remote platform
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodMetadata {
    pub name: String,
    /// Import uploads to this pod must declare an exact Content-Length
    #[serde(default)]
    pub import_requires_length: bool,
}

/// The database service a workflow operates on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceTarget {
    pub id: String,
    /// Pod name, used to look up `PodMetadata`
    pub pod: String,
}

impl ServiceTarget {
    pub fn new(id: impl Into<String>, pod: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            pod: pod.into(),
        }
    }
}

/// Optional import targets for document databases
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mongo_collection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mongo_database: Option<String>,
}

/// Body of a job-creation request
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum JobRequest {
    Backup,
    Import {
        /// Wrapped key (hex, then base64)
        key: String,
        /// Wrapped IV (hex, then base64)
        iv: String,
        /// Upload URL the ciphertext was written to
        location: String,
        #[serde(default)]
        options: ImportOptions,
    },
}

impl JobRequest {
    pub fn job_type(&self) -> JobType {
        match self {
            JobRequest::Backup => JobType::Backup,
            JobRequest::Import { .. } => JobType::Import,
        }
    }
}

impl std::fmt::Debug for JobRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobRequest::Backup => f.write_str("Backup"),
            JobRequest::Import {
                location, options, ..
            } => f
                .debug_struct("Import")
                .field("key", &"[REDACTED]")
                .field("iv", &"[REDACTED]")
                .field("location", location)
                .field("options", options)
                .finish(),
        }
    }
}
