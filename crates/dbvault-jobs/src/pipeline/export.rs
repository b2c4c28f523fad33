use std::path::Path;

use tracing::{error, info};

use dbvault_core::types::{JobRequest, ServiceTarget};
use dbvault_core::DbvaultResult;

use super::{check_destination, DownloadOutcome, Pipeline};
use crate::report::Stage;

impl Pipeline {
    /// Take a fresh backup and restore its artifact to `dest` in one go.
    ///
    /// The job's logs are reported whatever the outcome.
    pub async fn export(
        &self,
        service: &ServiceTarget,
        dest: &Path,
        force: bool,
    ) -> DbvaultResult<DownloadOutcome> {
        check_destination(dest, force)?;

        self.reporter.stage(&Stage::CreatingJob { job_type: "export" });
        let vehicle = self.api.create_job(&service.id, &JobRequest::Backup).await?;
        info!(service = %service.id, job_id = %vehicle.id, "export job created");

        let outcome = self.export_artifact(service, &vehicle.id, dest, force).await;
        if let Err(e) = &outcome {
            error!(job_id = %vehicle.id, error = %e, "export failed");
        }
        self.dump_logs(service, &vehicle.id).await;
        outcome
    }

    async fn export_artifact(
        &self,
        service: &ServiceTarget,
        vehicle_id: &str,
        dest: &Path,
        force: bool,
    ) -> DbvaultResult<DownloadOutcome> {
        let finished = self.await_job(service, vehicle_id).await?;
        let job = self.locate_job_by_task(service, &finished).await?;
        let bytes = self.decrypt_artifact(service, &job, dest, force).await?;
        Ok(DownloadOutcome {
            job_id: job.id,
            path: dest.to_path_buf(),
            bytes,
        })
    }
}
