//! In-memory fakes of the remote platform shared by the integration tests.
//!
//! `FakeApi` hands out jobs whose statuses follow a per-job script and whose
//! artifacts and logs are really encrypted with fresh key material.
//! `FakeTransfer` moves bytes between those blobs and local files.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use dbvault_core::types::{
    EncryptionStore, Job, JobRequest, JobType, PodMetadata, ServiceTarget, TempUrl,
};
use dbvault_core::{DbvaultError, DbvaultResult};
use dbvault_crypto::{encrypt_stream, KeyMaterial};
use dbvault_jobs::{BlobTransfer, JobApi, Pipeline, PollConfig, PollProgress, Reporter, Stage};

pub type Blobs = Arc<Mutex<HashMap<String, Vec<u8>>>>;

/// One scripted answer to `get_job`
#[derive(Debug, Clone)]
pub enum Scripted {
    Status(&'static str),
    TransportError,
}

pub use self::Scripted::{Status, TransportError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateJob(JobType),
    GetJob(String),
    ListJobs { page: u32 },
    UploadUrl,
    DownloadUrl(String),
    LogsUrl(String),
    PodMetadata,
}

struct State {
    next_id: u32,
    jobs: HashMap<String, Job>,
    scripts: HashMap<String, VecDeque<Scripted>>,
    backup_script: Vec<Scripted>,
    import_script: Vec<Scripted>,
    calls: Vec<Call>,
    imports: Vec<JobRequest>,
    pods: Vec<PodMetadata>,
    backup_payload: Vec<u8>,
}

pub struct FakeApi {
    state: Mutex<State>,
    blobs: Blobs,
}

pub fn backup_blob_url(job_id: &str) -> String {
    format!("https://blobs.test/backup/{job_id}")
}

pub fn logs_blob_url(job_id: &str) -> String {
    format!("https://blobs.test/logs/{job_id}")
}

pub fn logs_text(job_id: &str) -> String {
    format!("log output of {job_id}\n")
}

fn seal(payload: &[u8], keys: &KeyMaterial) -> Vec<u8> {
    let mut out = Vec::new();
    encrypt_stream(payload, &mut out, keys).expect("seal fixture");
    out
}

fn store(keys: &KeyMaterial) -> EncryptionStore {
    EncryptionStore {
        key: keys.wrapped_key(),
        iv: keys.wrapped_nonce(),
    }
}

impl FakeApi {
    pub fn new(blobs: Blobs) -> Self {
        Self {
            state: Mutex::new(State {
                next_id: 0,
                jobs: HashMap::new(),
                scripts: HashMap::new(),
                backup_script: vec![Status("queued"), Status("running"), Status("finished")],
                import_script: vec![Status("running"), Status("finished")],
                calls: Vec::new(),
                imports: Vec::new(),
                pods: vec![PodMetadata {
                    name: "pod-a".into(),
                    import_requires_length: false,
                }],
                backup_payload: b"-- dump\nCREATE TABLE t (id int);\n".to_vec(),
            }),
            blobs,
        }
    }

    pub fn with_backup_script(self, script: Vec<Scripted>) -> Self {
        self.state.lock().unwrap().backup_script = script;
        self
    }

    pub fn with_import_script(self, script: Vec<Scripted>) -> Self {
        self.state.lock().unwrap().import_script = script;
        self
    }

    pub fn with_backup_payload(self, payload: Vec<u8>) -> Self {
        self.state.lock().unwrap().backup_payload = payload;
        self
    }

    pub fn with_pods(self, pods: Vec<PodMetadata>) -> Self {
        self.state.lock().unwrap().pods = pods;
        self
    }

    /// Register a job directly, bypassing `create_job`.
    pub fn insert_job(&self, job: Job) {
        self.state.lock().unwrap().jobs.insert(job.id.clone(), job);
    }

    /// Register a finished backup whose artifact decrypts to `payload`.
    pub fn insert_finished_backup(&self, job_id: &str, payload: &[u8]) {
        let keys = KeyMaterial::generate();
        let log_keys = KeyMaterial::generate();
        {
            let mut blobs = self.blobs.lock().unwrap();
            blobs.insert(backup_blob_url(job_id), seal(payload, &keys));
            blobs.insert(logs_blob_url(job_id), seal(logs_text(job_id).as_bytes(), &log_keys));
        }
        self.insert_job(Job {
            id: job_id.into(),
            job_type: JobType::Backup,
            status: "finished".into(),
            created_at: String::new(),
            task_id: None,
            encryption_store: Some(store(&keys)),
            logs_store: Some(store(&log_keys)),
        });
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    pub fn creates(&self, job_type: JobType) -> usize {
        self.count(&Call::CreateJob(job_type))
    }

    pub fn import_requests(&self) -> Vec<JobRequest> {
        self.state.lock().unwrap().imports.clone()
    }

    pub fn job(&self, job_id: &str) -> Option<Job> {
        self.state.lock().unwrap().jobs.get(job_id).cloned()
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl JobApi for FakeApi {
    async fn create_job(&self, _service_id: &str, request: &JobRequest) -> DbvaultResult<Job> {
        self.record(Call::CreateJob(request.job_type()));
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let n = state.next_id;
        let id = format!("job-{n}");

        let log_keys = KeyMaterial::generate();
        let mut blobs = self.blobs.lock().unwrap();
        blobs.insert(logs_blob_url(&id), seal(logs_text(&id).as_bytes(), &log_keys));

        let (script, encryption_store) = match request {
            JobRequest::Backup => {
                let keys = KeyMaterial::generate();
                blobs.insert(backup_blob_url(&id), seal(&state.backup_payload, &keys));
                (state.backup_script.clone(), Some(store(&keys)))
            }
            JobRequest::Import { .. } => {
                state.imports.push(request.clone());
                (state.import_script.clone(), None)
            }
        };

        let job = Job {
            id: id.clone(),
            job_type: request.job_type(),
            status: "scheduled".into(),
            created_at: "2026-01-01T00:00:00Z".into(),
            task_id: Some(format!("task-{n}")),
            encryption_store,
            logs_store: Some(store(&log_keys)),
        };
        state.scripts.insert(id.clone(), script.into());
        state.jobs.insert(id, job.clone());
        Ok(job)
    }

    async fn get_job(&self, _service_id: &str, job_id: &str) -> DbvaultResult<Job> {
        self.record(Call::GetJob(job_id.into()));
        let mut state = self.state.lock().unwrap();
        // the last scripted answer repeats forever
        let next = match state.scripts.get_mut(job_id) {
            Some(script) if script.len() > 1 => script.pop_front(),
            Some(script) => script.front().cloned(),
            None => None,
        };
        let job = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| DbvaultError::Network(format!("HTTP 404: no job {job_id}")))?;
        match next {
            Some(Status(s)) => job.status = s.into(),
            Some(TransportError) => {
                return Err(DbvaultError::Network("connection reset by peer".into()))
            }
            None => {}
        }
        Ok(job.clone())
    }

    async fn list_jobs(
        &self,
        _service_id: &str,
        job_type: Option<JobType>,
        page: u32,
        page_size: u32,
    ) -> DbvaultResult<Vec<Job>> {
        self.record(Call::ListJobs { page });
        let state = self.state.lock().unwrap();
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|j| job_type.map_or(true, |t| j.job_type == t))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(jobs
            .into_iter()
            .skip(((page - 1) * page_size) as usize)
            .take(page_size as usize)
            .collect())
    }

    async fn temp_upload_url(&self, _service_id: &str) -> DbvaultResult<TempUrl> {
        self.record(Call::UploadUrl);
        Ok(TempUrl {
            url: "https://blobs.test/upload/1".into(),
        })
    }

    async fn temp_download_url(&self, _service_id: &str, job_id: &str) -> DbvaultResult<TempUrl> {
        self.record(Call::DownloadUrl(job_id.into()));
        Ok(TempUrl {
            url: backup_blob_url(job_id),
        })
    }

    async fn temp_logs_url(&self, _service_id: &str, job_id: &str) -> DbvaultResult<TempUrl> {
        self.record(Call::LogsUrl(job_id.into()));
        Ok(TempUrl {
            url: logs_blob_url(job_id),
        })
    }

    async fn pod_metadata(&self) -> DbvaultResult<Vec<PodMetadata>> {
        self.record(Call::PodMetadata);
        Ok(self.state.lock().unwrap().pods.clone())
    }
}

#[derive(Default)]
pub struct FakeTransfer {
    blobs: Blobs,
    pub uploads: Mutex<Vec<(String, Option<u64>)>>,
    pub downloads: Mutex<Vec<String>>,
}

impl FakeTransfer {
    pub fn new(blobs: Blobs) -> Self {
        Self {
            blobs,
            ..Default::default()
        }
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }
}

#[async_trait]
impl BlobTransfer for FakeTransfer {
    async fn download(&self, url: &TempUrl, dest: &Path) -> DbvaultResult<u64> {
        self.downloads.lock().unwrap().push(url.url.clone());
        let bytes = self
            .blobs
            .lock()
            .unwrap()
            .get(&url.url)
            .cloned()
            .ok_or_else(|| DbvaultError::Network(format!("HTTP 404: {}", url.url)))?;
        std::fs::write(dest, &bytes).map_err(|e| DbvaultError::fs(dest.display(), e))?;
        Ok(bytes.len() as u64)
    }

    async fn upload(
        &self,
        url: &TempUrl,
        src: &Path,
        content_length: Option<u64>,
    ) -> DbvaultResult<()> {
        let bytes = std::fs::read(src).map_err(|e| DbvaultError::fs(src.display(), e))?;
        self.uploads
            .lock()
            .unwrap()
            .push((url.url.clone(), content_length));
        self.blobs.lock().unwrap().insert(url.url.clone(), bytes);
        Ok(())
    }
}

/// Captures everything the pipeline reports.
#[derive(Default)]
pub struct RecordingReporter {
    pub stages: Mutex<Vec<Stage>>,
    pub progress: Mutex<Vec<PollProgress>>,
    pub logs: Mutex<Vec<(String, String)>>,
}

impl Reporter for RecordingReporter {
    fn stage(&self, stage: &Stage) {
        self.stages.lock().unwrap().push(stage.clone());
    }

    fn poll_progress(&self, progress: &PollProgress) {
        self.progress.lock().unwrap().push(progress.clone());
    }

    fn job_logs(&self, job_id: &str, logs: &str) {
        self.logs
            .lock()
            .unwrap()
            .push((job_id.to_string(), logs.to_string()));
    }
}

pub fn fast_poll() -> PollConfig {
    PollConfig {
        interval: Duration::from_millis(1),
        max_failures: 3,
        max_wait: Some(Duration::from_secs(10)),
    }
}

pub fn service() -> ServiceTarget {
    ServiceTarget::new("svc-1", "pod-a")
}

pub struct Harness {
    pub api: Arc<FakeApi>,
    pub transfer: Arc<FakeTransfer>,
    pub reporter: Arc<RecordingReporter>,
    pub blobs: Blobs,
    pub work_dir: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_api(|api| api)
    }

    pub fn with_api(configure: impl FnOnce(FakeApi) -> FakeApi) -> Self {
        let blobs: Blobs = Arc::default();
        Self {
            api: Arc::new(configure(FakeApi::new(Arc::clone(&blobs)))),
            transfer: Arc::new(FakeTransfer::new(Arc::clone(&blobs))),
            reporter: Arc::new(RecordingReporter::default()),
            blobs,
            work_dir: tempfile::TempDir::new().expect("work dir"),
        }
    }

    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new(self.api.clone(), self.transfer.clone(), fast_poll())
            .with_reporter(self.reporter.clone())
            .with_work_dir(self.work_dir.path())
            .with_page_size(2)
    }

    /// Entries left behind in the scratch root
    pub fn scratch_leftovers(&self) -> usize {
        std::fs::read_dir(self.work_dir.path())
            .expect("read work dir")
            .count()
    }
}
