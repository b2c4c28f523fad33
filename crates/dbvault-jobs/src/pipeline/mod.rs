//! Backup, download, export and import workflows
//!
//! Each workflow is a short sequence of [`JobApi`] calls, a [`JobPoller`]
//! wait, a temp-URL transfer and one pass of the stream codec. Ciphertext in
//! flight lives in a per-call scratch `TempDir` that is removed on every exit
//! path. Decrypted output is written to a hidden `NamedTempFile` next to the
//! destination and only renamed into place after the last chunk verified.

mod backup;
mod download;
mod export;
mod import;

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::{NamedTempFile, TempDir};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use dbvault_core::types::{Job, JobType, ServiceTarget};
use dbvault_core::{DbvaultError, DbvaultResult, JobStateError};
use dbvault_crypto::{decrypt_stream, CryptoError, KeyMaterial};

use crate::api::{BlobTransfer, JobApi};
use crate::poller::{JobPoller, PollConfig};
use crate::report::{NullReporter, Reporter, Stage};

pub use download::DownloadOutcome;
pub use import::ImportOutcome;

/// Default number of jobs per page when searching job listings
const DEFAULT_PAGE_SIZE: u32 = 10;

pub struct Pipeline {
    api: Arc<dyn JobApi>,
    transfer: Arc<dyn BlobTransfer>,
    poller: JobPoller,
    reporter: Arc<dyn Reporter>,
    work_dir: Option<PathBuf>,
    page_size: u32,
}

impl Pipeline {
    pub fn new(api: Arc<dyn JobApi>, transfer: Arc<dyn BlobTransfer>, poll: PollConfig) -> Self {
        let poller = JobPoller::new(Arc::clone(&api), poll);
        Self {
            api,
            transfer,
            poller,
            reporter: Arc::new(NullReporter),
            work_dir: None,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Directory for in-flight ciphertext. Defaults to the system temp dir.
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    /// Token that aborts any poll in progress.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.poller = self.poller.with_cancellation(cancel);
        self
    }

    /// Page size used when searching job listings
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        self.poller.cancellation_token()
    }

    /// One page (1-based) of the service's backup jobs.
    pub async fn list_backups(
        &self,
        service: &ServiceTarget,
        page: u32,
        page_size: u32,
    ) -> DbvaultResult<Vec<Job>> {
        if page == 0 || page_size == 0 {
            return Err(DbvaultError::Input(format!(
                "page and page size start at 1 (got page {page}, page size {page_size})"
            )));
        }
        self.api
            .list_jobs(&service.id, Some(JobType::Backup), page, page_size)
            .await
    }

    /// Fetch and decrypt the log output of `job_id`.
    pub async fn job_logs(&self, service: &ServiceTarget, job_id: &str) -> DbvaultResult<String> {
        let job = self.api.get_job(&service.id, job_id).await?;
        let store = job.logs_store.as_ref().ok_or(JobStateError::MissingKeys {
            job_id: job.id.clone(),
            what: "log key material",
        })?;
        let keys = KeyMaterial::from_wrapped(&store.key, &store.iv)
            .map_err(|e| codec_error(format!("log keys of job {job_id}"), e))?;

        self.reporter.stage(&Stage::FetchingLogs {
            job_id: job.id.clone(),
        });
        let url = self.api.temp_logs_url(&service.id, &job.id).await?;
        let scratch = self.scratch_dir()?;
        let sealed = scratch.path().join("logs.enc");
        self.transfer.download(&url, &sealed).await?;

        let plain = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, CryptoError> {
            let mut out = Vec::new();
            decrypt_stream(BufReader::new(File::open(&sealed)?), &mut out, &keys)?;
            Ok(out)
        })
        .await
        .map_err(|e| join_error("decrypting logs", e))?
        .map_err(|e| codec_error(format!("logs of job {job_id}"), e))?;

        Ok(String::from_utf8_lossy(&plain).into_owned())
    }

    /// Spawn a poll for `job_id` and forward its progress to the reporter.
    async fn await_job(&self, service: &ServiceTarget, job_id: &str) -> DbvaultResult<Job> {
        self.reporter.stage(&Stage::Polling {
            job_id: job_id.to_string(),
        });
        self.poller
            .spawn(service.id.clone(), job_id)
            .wait(|p| self.reporter.poll_progress(p))
            .await
    }

    /// Best-effort log retrieval: failures are logged, never propagated.
    async fn dump_logs(&self, service: &ServiceTarget, job_id: &str) {
        match self.job_logs(service, job_id).await {
            Ok(logs) => self.reporter.job_logs(job_id, &logs),
            Err(e) => warn!(job_id, error = %e, "could not retrieve job logs"),
        }
    }

    fn scratch_dir(&self) -> DbvaultResult<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("dbvault-");
        let dir = match &self.work_dir {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        };
        dir.map_err(|e| DbvaultError::fs("creating scratch directory", e))
    }

    /// Download the ciphertext of finished backup `job` and decrypt it to `dest`.
    async fn decrypt_artifact(
        &self,
        service: &ServiceTarget,
        job: &Job,
        dest: &Path,
        force: bool,
    ) -> DbvaultResult<u64> {
        let store = job
            .encryption_store
            .as_ref()
            .ok_or(JobStateError::MissingKeys {
                job_id: job.id.clone(),
                what: "artifact key material",
            })?;
        let keys = KeyMaterial::from_wrapped(&store.key, &store.iv)
            .map_err(|e| codec_error(format!("keys of job {}", job.id), e))?;

        self.reporter.stage(&Stage::Downloading {
            job_id: job.id.clone(),
        });
        let url = self.api.temp_download_url(&service.id, &job.id).await?;
        let scratch = self.scratch_dir()?;
        let sealed = scratch.path().join("artifact.enc");
        let fetched = self.transfer.download(&url, &sealed).await?;
        debug!(job_id = %job.id, bytes = fetched, "ciphertext fetched");

        self.reporter.stage(&Stage::Decrypting);
        let target = dest.to_path_buf();
        let written =
            tokio::task::spawn_blocking(move || decrypt_and_publish(&sealed, &target, &keys, force))
                .await
                .map_err(|e| join_error("decrypting artifact", e))??;

        info!(job_id = %job.id, dest = %dest.display(), bytes = written, "artifact restored");
        Ok(written)
    }

    /// Resolve the backup job spawned by `task_id`, searching page by page.
    async fn locate_job_by_task(&self, service: &ServiceTarget, vehicle: &Job) -> DbvaultResult<Job> {
        let Some(task_id) = vehicle.task_id.as_deref() else {
            return self.api.get_job(&service.id, &vehicle.id).await;
        };

        let mut page = 1;
        loop {
            let jobs = self
                .api
                .list_jobs(&service.id, Some(JobType::Backup), page, self.page_size)
                .await?;
            let exhausted = (jobs.len() as u32) < self.page_size;
            if let Some(found) = jobs
                .into_iter()
                .find(|j| j.task_id.as_deref() == Some(task_id) && j.is_finished_backup())
            {
                debug!(task_id, job_id = %found.id, page, "located job by task");
                return Ok(found);
            }
            if exhausted {
                return Err(JobStateError::NotFound {
                    task_id: task_id.to_string(),
                }
                .into());
            }
            page += 1;
        }
    }
}

/// Refuse an existing destination unless `force` is set.
fn check_destination(dest: &Path, force: bool) -> DbvaultResult<()> {
    if !force && dest.symlink_metadata().is_ok() {
        return Err(DbvaultError::Filesystem(format!(
            "{} already exists (use force to overwrite)",
            dest.display()
        )));
    }
    Ok(())
}

/// Decrypt `sealed` into a hidden file beside `dest`, then rename it into place.
fn decrypt_and_publish(
    sealed: &Path,
    dest: &Path,
    keys: &KeyMaterial,
    force: bool,
) -> DbvaultResult<u64> {
    let parent = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent).map_err(|e| DbvaultError::fs(parent.display(), e))?;

    let partial = tempfile::Builder::new()
        .prefix(".dbvault-")
        .suffix(".partial")
        .tempfile_in(&parent)
        .map_err(|e| DbvaultError::fs(parent.display(), e))?;

    let reader = BufReader::new(File::open(sealed).map_err(|e| DbvaultError::fs(sealed.display(), e))?);
    let written = decrypt_stream(reader, BufWriter::new(partial.as_file()), keys)
        .map_err(|e| codec_error(dest.display(), e))?;
    partial
        .as_file()
        .sync_all()
        .map_err(|e| DbvaultError::fs(partial.path().display(), e))?;

    publish(partial, dest, force)?;
    Ok(written)
}

fn publish(partial: NamedTempFile, dest: &Path, force: bool) -> DbvaultResult<()> {
    if force {
        match std::fs::remove_file(dest) {
            Ok(()) => debug!(dest = %dest.display(), "removed existing destination"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(DbvaultError::fs(dest.display(), e)),
        }
        partial
            .persist(dest)
            .map_err(|e| DbvaultError::fs(dest.display(), e.error))?;
    } else {
        partial.persist_noclobber(dest).map_err(|e| {
            if e.error.kind() == std::io::ErrorKind::AlreadyExists {
                DbvaultError::Filesystem(format!(
                    "{} already exists (use force to overwrite)",
                    dest.display()
                ))
            } else {
                DbvaultError::fs(dest.display(), e.error)
            }
        })?;
    }
    Ok(())
}

fn codec_error(context: impl std::fmt::Display, err: CryptoError) -> DbvaultError {
    match err {
        CryptoError::Io(e) => DbvaultError::fs(context, e),
        other => DbvaultError::Integrity(format!("{context}: {other}")),
    }
}

fn join_error(what: &str, err: tokio::task::JoinError) -> DbvaultError {
    DbvaultError::Filesystem(format!("{what}: worker task failed: {err}"))
}
