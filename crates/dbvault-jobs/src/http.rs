//! reqwest-backed implementations of [`JobApi`] and [`BlobTransfer`]
//!
//! Endpoint layout:
//! ```text
//! POST {base}/environments/{env}/services/{svc}/jobs
//! GET  {base}/environments/{env}/services/{svc}/jobs?type=&page=&pageSize=
//! GET  {base}/environments/{env}/services/{svc}/jobs/{job}
//! GET  {base}/environments/{env}/services/{svc}/jobs/{job}/download-url
//! GET  {base}/environments/{env}/services/{svc}/jobs/{job}/logs-url
//! GET  {base}/environments/{env}/services/{svc}/upload-url
//! GET  {base}/pods
//! ```

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::debug;

use dbvault_core::config::ApiConfig;
use dbvault_core::types::{Job, JobRequest, JobType, PodMetadata, TempUrl};
use dbvault_core::{DbvaultError, DbvaultResult};

use crate::api::{BlobTransfer, JobApi};

const USER_AGENT: &str = concat!("dbvault/", env!("CARGO_PKG_VERSION"));

/// Longest response body quoted back in an error message
const MAX_ERROR_BODY: usize = 512;

fn network(context: &str, err: reqwest::Error) -> DbvaultError {
    DbvaultError::Network(format!("{context}: {err}"))
}

pub struct HttpJobApi {
    client: Client,
    base_url: String,
    environment_id: String,
    token: Option<SecretString>,
}

impl HttpJobApi {
    pub fn new(config: &ApiConfig, token: Option<SecretString>) -> DbvaultResult<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| network("building HTTP client", e))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            environment_id: config.environment_id.clone(),
            token,
        })
    }

    fn service_url(&self, service_id: &str, tail: &str) -> String {
        format!(
            "{}/environments/{}/services/{}/{}",
            self.base_url, self.environment_id, service_id, tail
        )
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token.expose_secret()),
            None => builder,
        }
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        what: &str,
    ) -> DbvaultResult<T> {
        let response = self
            .authorize(builder)
            .send()
            .await
            .map_err(|e| network(what, e))?;
        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(DbvaultError::Network(format!("{what}: HTTP {status}: {body}")));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| DbvaultError::Network(format!("{what}: malformed response: {e}")))
    }
}

#[async_trait]
impl JobApi for HttpJobApi {
    async fn create_job(&self, service_id: &str, request: &JobRequest) -> DbvaultResult<Job> {
        let url = self.service_url(service_id, "jobs");
        debug!(service_id, job_type = %request.job_type(), "creating job");
        self.send_json(self.client.post(url).json(request), "creating job")
            .await
    }

    async fn get_job(&self, service_id: &str, job_id: &str) -> DbvaultResult<Job> {
        let url = self.service_url(service_id, &format!("jobs/{job_id}"));
        self.send_json(self.client.get(url), "fetching job status")
            .await
    }

    async fn list_jobs(
        &self,
        service_id: &str,
        job_type: Option<JobType>,
        page: u32,
        page_size: u32,
    ) -> DbvaultResult<Vec<Job>> {
        let url = self.service_url(service_id, "jobs");
        let mut query = vec![
            ("page", page.to_string()),
            ("pageSize", page_size.to_string()),
        ];
        if let Some(t) = job_type {
            query.push(("type", t.to_string()));
        }
        self.send_json(self.client.get(url).query(&query), "listing jobs")
            .await
    }

    async fn temp_upload_url(&self, service_id: &str) -> DbvaultResult<TempUrl> {
        let url = self.service_url(service_id, "upload-url");
        self.send_json(self.client.get(url), "requesting upload URL")
            .await
    }

    async fn temp_download_url(&self, service_id: &str, job_id: &str) -> DbvaultResult<TempUrl> {
        let url = self.service_url(service_id, &format!("jobs/{job_id}/download-url"));
        self.send_json(self.client.get(url), "requesting download URL")
            .await
    }

    async fn temp_logs_url(&self, service_id: &str, job_id: &str) -> DbvaultResult<TempUrl> {
        let url = self.service_url(service_id, &format!("jobs/{job_id}/logs-url"));
        self.send_json(self.client.get(url), "requesting logs URL")
            .await
    }

    async fn pod_metadata(&self) -> DbvaultResult<Vec<PodMetadata>> {
        let url = format!("{}/pods", self.base_url);
        self.send_json(self.client.get(url), "fetching pod metadata")
            .await
    }
}

/// Plain GET/PUT against temp URLs. No auth header: the URL is the credential.
#[derive(Clone)]
pub struct HttpTransfer {
    client: Client,
}

impl HttpTransfer {
    pub fn new(connect_timeout: Duration) -> DbvaultResult<Self> {
        // no overall timeout: dumps can take hours to move
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| network("building transfer client", e))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl BlobTransfer for HttpTransfer {
    async fn download(&self, url: &TempUrl, dest: &Path) -> DbvaultResult<u64> {
        let response = self
            .client
            .get(&url.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| network("downloading artifact", e))?;

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| DbvaultError::fs(dest.display(), e))?;
        let mut body = response.bytes_stream();
        let mut total = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| network("downloading artifact", e))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| DbvaultError::fs(dest.display(), e))?;
            total += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| DbvaultError::fs(dest.display(), e))?;

        debug!(dest = %dest.display(), bytes = total, "artifact downloaded");
        Ok(total)
    }

    async fn upload(
        &self,
        url: &TempUrl,
        src: &Path,
        content_length: Option<u64>,
    ) -> DbvaultResult<()> {
        let file = tokio::fs::File::open(src)
            .await
            .map_err(|e| DbvaultError::fs(src.display(), e))?;
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));

        let mut request = self.client.put(&url.url).body(body);
        if let Some(len) = content_length {
            request = request.header(reqwest::header::CONTENT_LENGTH, len);
        }
        request
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| network("uploading artifact", e))?;

        debug!(src = %src.display(), ?content_length, "artifact uploaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_config(base: &str) -> ApiConfig {
        ApiConfig {
            base_url: base.into(),
            environment_id: "env-1".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_service_url_layout() {
        let api = HttpJobApi::new(&api_config("https://api.example.com/v1/"), None).unwrap();
        assert_eq!(
            api.service_url("svc-9", "jobs/j-1/download-url"),
            "https://api.example.com/v1/environments/env-1/services/svc-9/jobs/j-1/download-url"
        );
    }

    #[test]
    fn test_new_rejects_plaintext_with_enforce_tls() {
        let result = HttpJobApi::new(&api_config("http://api.example.com"), None);
        assert!(result.is_err());
    }

    #[test]
    fn test_transfer_client_builds() {
        assert!(HttpTransfer::new(Duration::from_secs(10)).is_ok());
    }
}
