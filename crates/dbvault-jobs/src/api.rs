//! Seams to the remote platform: job endpoints and temp-URL byte transfer

use std::path::Path;

use async_trait::async_trait;
use dbvault_core::types::{Job, JobRequest, JobType, PodMetadata, TempUrl};
use dbvault_core::DbvaultResult;

/// Job and URL-issuance endpoints of the hosting platform.
#[async_trait]
pub trait JobApi: Send + Sync {
    /// Start a job on `service_id`. The returned job is usually still pending.
    async fn create_job(&self, service_id: &str, request: &JobRequest) -> DbvaultResult<Job>;

    async fn get_job(&self, service_id: &str, job_id: &str) -> DbvaultResult<Job>;

    /// One page (1-based) of the service's jobs, newest first.
    async fn list_jobs(
        &self,
        service_id: &str,
        job_type: Option<JobType>,
        page: u32,
        page_size: u32,
    ) -> DbvaultResult<Vec<Job>>;

    /// URL to PUT an import artifact to
    async fn temp_upload_url(&self, service_id: &str) -> DbvaultResult<TempUrl>;

    /// URL to GET a finished backup's ciphertext from
    async fn temp_download_url(&self, service_id: &str, job_id: &str) -> DbvaultResult<TempUrl>;

    /// URL to GET a job's encrypted log output from
    async fn temp_logs_url(&self, service_id: &str, job_id: &str) -> DbvaultResult<TempUrl>;

    async fn pod_metadata(&self) -> DbvaultResult<Vec<PodMetadata>>;
}

/// Raw byte transfer against a [`TempUrl`].
#[async_trait]
pub trait BlobTransfer: Send + Sync {
    /// Stream the object at `url` into a new file at `dest`. Returns bytes written.
    async fn download(&self, url: &TempUrl, dest: &Path) -> DbvaultResult<u64>;

    /// Stream `src` to `url`. When `content_length` is set it is declared
    /// up front instead of using chunked transfer encoding.
    async fn upload(&self, url: &TempUrl, src: &Path, content_length: Option<u64>)
        -> DbvaultResult<()>;
}
