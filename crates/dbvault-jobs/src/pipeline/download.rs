use std::path::{Path, PathBuf};

use tracing::info;

use dbvault_core::types::ServiceTarget;
use dbvault_core::{DbvaultResult, JobStateError};

use super::{check_destination, Pipeline};

/// Result of restoring one backup artifact to a local file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub job_id: String,
    pub path: PathBuf,
    /// Plaintext bytes written to `path`
    pub bytes: u64,
}

impl Pipeline {
    /// Fetch and decrypt the artifact of finished backup `job_id` into `dest`.
    ///
    /// An existing `dest` is refused unless `force` is set, before any
    /// network call is made.
    pub async fn download(
        &self,
        service: &ServiceTarget,
        job_id: &str,
        dest: &Path,
        force: bool,
    ) -> DbvaultResult<DownloadOutcome> {
        check_destination(dest, force)?;

        let job = self.api.get_job(&service.id, job_id).await?;
        if !job.is_finished_backup() {
            return Err(JobStateError::NotDownloadable {
                job_id: job.id,
                job_type: job.job_type.to_string(),
                status: job.status,
            }
            .into());
        }

        let bytes = self.decrypt_artifact(service, &job, dest, force).await?;
        info!(job_id, dest = %dest.display(), bytes, "download complete");
        Ok(DownloadOutcome {
            job_id: job.id,
            path: dest.to_path_buf(),
            bytes,
        })
    }
}
