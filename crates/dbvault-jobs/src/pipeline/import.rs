use std::path::Path;

use tracing::{debug, error, info, warn};

use dbvault_core::types::{ImportOptions, Job, JobRequest, ServiceTarget};
use dbvault_core::{DbvaultError, DbvaultResult};
use dbvault_crypto::{encrypt_file, size_overhead, KeyMaterial};

use super::{codec_error, join_error, Pipeline};
use crate::report::Stage;

/// Result of a completed import
#[derive(Debug, Clone)]
pub struct ImportOutcome {
    /// The backup taken before anything was uploaded
    pub safety_backup: Job,
    pub import_job: Job,
    /// Ciphertext bytes uploaded
    pub uploaded_bytes: u64,
}

impl Pipeline {
    /// Replace the contents of `service` with the dump at `source`.
    ///
    /// A full backup must finish first. If it does not, nothing is uploaded
    /// and no import job is created.
    pub async fn import(
        &self,
        service: &ServiceTarget,
        source: &Path,
        options: ImportOptions,
    ) -> DbvaultResult<ImportOutcome> {
        let source_len = match std::fs::metadata(source) {
            Ok(meta) if meta.is_file() => meta.len(),
            Ok(_) => {
                return Err(DbvaultError::Input(format!(
                    "{} is not a regular file",
                    source.display()
                )))
            }
            Err(e) => {
                return Err(DbvaultError::Input(format!("{}: {e}", source.display())));
            }
        };

        let safety_backup = match self.backup(service, false).await {
            Ok(job) => job,
            Err(e) => {
                error!(service = %service.id, error = %e, "safety backup failed, import aborted");
                return Err(e);
            }
        };
        info!(job_id = %safety_backup.id, "safety backup finished");

        let keys = KeyMaterial::generate();
        let declare_length = self.import_requires_length(service).await?;

        self.reporter.stage(&Stage::Encrypting);
        let scratch = self.scratch_dir()?;
        let sealed = scratch.path().join("import.enc");
        let (src, dst, enc_keys) = (source.to_path_buf(), sealed.clone(), keys.clone());
        let sealed_len = tokio::task::spawn_blocking(move || encrypt_file(&src, &dst, &enc_keys))
            .await
            .map_err(|e| join_error("encrypting import", e))?
            .map_err(|e| codec_error(source.display(), e))?;

        let expected = size_overhead(source_len);
        if sealed_len != expected {
            return Err(DbvaultError::Input(format!(
                "{} changed while it was being encrypted ({sealed_len} bytes sealed, expected {expected})",
                source.display()
            )));
        }

        let url = self.api.temp_upload_url(&service.id).await?;
        self.reporter.stage(&Stage::Uploading { bytes: sealed_len });
        self.transfer
            .upload(&url, &sealed, declare_length.then_some(sealed_len))
            .await?;
        drop(scratch);
        debug!(bytes = sealed_len, declare_length, "import artifact uploaded");

        self.reporter.stage(&Stage::CreatingJob { job_type: "import" });
        let request = JobRequest::Import {
            key: keys.wrapped_key(),
            iv: keys.wrapped_nonce(),
            location: url.url,
            options,
        };
        let created = self.api.create_job(&service.id, &request).await?;
        info!(service = %service.id, job_id = %created.id, "import job created");

        let outcome = self.await_job(service, &created.id).await;
        self.dump_logs(service, &created.id).await;
        let import_job = outcome.inspect_err(|e| {
            error!(job_id = %created.id, error = %e, "import failed");
        })?;

        Ok(ImportOutcome {
            safety_backup,
            import_job,
            uploaded_bytes: sealed_len,
        })
    }

    async fn import_requires_length(&self, service: &ServiceTarget) -> DbvaultResult<bool> {
        let pods = self.api.pod_metadata().await?;
        match pods.into_iter().find(|p| p.name == service.pod) {
            Some(pod) => Ok(pod.import_requires_length),
            None => {
                warn!(pod = %service.pod, "no metadata for pod, uploading without declared length");
                Ok(false)
            }
        }
    }
}
