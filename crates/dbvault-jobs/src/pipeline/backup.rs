use tracing::{error, info};

use dbvault_core::types::{Job, JobRequest, ServiceTarget};
use dbvault_core::DbvaultResult;

use super::Pipeline;
use crate::report::Stage;

impl Pipeline {
    /// Start a full backup of `service`.
    ///
    /// With `skip_poll` the job is returned as created. Otherwise it is
    /// polled to a terminal status; a failed backup has its logs reported
    /// before the error is returned.
    pub async fn backup(&self, service: &ServiceTarget, skip_poll: bool) -> DbvaultResult<Job> {
        self.reporter.stage(&Stage::CreatingJob { job_type: "backup" });
        let created = self.api.create_job(&service.id, &JobRequest::Backup).await?;
        info!(service = %service.id, job_id = %created.id, "backup job created");

        if skip_poll {
            return Ok(created);
        }

        match self.await_job(service, &created.id).await {
            Ok(job) => {
                info!(job_id = %job.id, "backup finished");
                Ok(job)
            }
            Err(e) => {
                error!(job_id = %created.id, error = %e, "backup failed");
                self.dump_logs(service, &created.id).await;
                Err(e)
            }
        }
    }
}
