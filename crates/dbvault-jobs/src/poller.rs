//! Job status polling
//!
//! ```text
//! scheduled | queued | started | running ──► sleep(interval) ──► check again
//! finished                               ──► Ok(job)
//! anything else                          ──► JobStateError::Failed(status)
//! transport/parse error                  ──► tolerated until `max_failures` in a row
//! ```
//!
//! [`PollState`] is the pure state machine; [`JobPoller`] drives it against a
//! [`JobApi`] with a fixed interval, an optional total wait bound and a
//! cancellation token.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use dbvault_core::config::PollSettings;
use dbvault_core::types::{Job, JobPhase};
use dbvault_core::{DbvaultError, DbvaultResult, JobStateError};

use crate::api::JobApi;

/// Status reported before the first successful check
const UNKNOWN_STATUS: &str = "unknown";

/// Progress callback, called once per status check
pub type PollProgressFn = Box<dyn Fn(&PollProgress) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_failures: u32,
    /// `None` polls until the job settles, however long that takes
    pub max_wait: Option<Duration>,
}

impl From<&PollSettings> for PollConfig {
    fn from(settings: &PollSettings) -> Self {
        Self {
            interval: settings.interval(),
            max_failures: settings.max_failures.max(1),
            max_wait: settings.max_wait(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::from(&PollSettings::default())
    }
}

/// Snapshot handed to progress observers after each status check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollProgress {
    pub job_id: String,
    /// 1-based number of the check that just completed
    pub attempt: u32,
    /// Last successfully observed status
    pub status: String,
    pub consecutive_failures: u32,
    pub elapsed: Duration,
}

/// Outcome of feeding one status check into [`PollState`]
#[derive(Debug)]
pub enum PollStep {
    Continue,
    Finished(Job),
    Failed(JobStateError),
}

/// Polling state for one job.
#[derive(Debug, Clone)]
pub struct PollState {
    job_id: String,
    max_failures: u32,
    last_status: Option<String>,
    attempts: u32,
    consecutive_failures: u32,
}

impl PollState {
    pub fn new(job_id: impl Into<String>, max_failures: u32) -> Self {
        Self {
            job_id: job_id.into(),
            max_failures: max_failures.max(1),
            last_status: None,
            attempts: 0,
            consecutive_failures: 0,
        }
    }

    /// Record the result of one status check and decide what happens next.
    pub fn observe(&mut self, checked: DbvaultResult<Job>) -> PollStep {
        self.attempts += 1;
        match checked {
            Ok(job) => {
                self.consecutive_failures = 0;
                self.last_status = Some(job.status.clone());
                match job.phase() {
                    JobPhase::Pending => PollStep::Continue,
                    JobPhase::Finished => PollStep::Finished(job),
                    JobPhase::Failed => PollStep::Failed(JobStateError::Failed {
                        job_id: self.job_id.clone(),
                        status: job.status,
                    }),
                }
            }
            Err(err) => {
                self.consecutive_failures += 1;
                warn!(
                    job_id = %self.job_id,
                    failures = self.consecutive_failures,
                    max_failures = self.max_failures,
                    error = %err,
                    "job status check failed"
                );
                if self.consecutive_failures >= self.max_failures {
                    PollStep::Failed(JobStateError::PollExhausted {
                        job_id: self.job_id.clone(),
                        last_status: self.last_status().to_string(),
                        failures: self.consecutive_failures,
                        last_error: err.to_string(),
                    })
                } else {
                    PollStep::Continue
                }
            }
        }
    }

    pub fn last_status(&self) -> &str {
        self.last_status.as_deref().unwrap_or(UNKNOWN_STATUS)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn progress(&self, elapsed: Duration) -> PollProgress {
        PollProgress {
            job_id: self.job_id.clone(),
            attempt: self.attempts,
            status: self.last_status().to_string(),
            consecutive_failures: self.consecutive_failures,
            elapsed,
        }
    }
}

/// Drives [`PollState`] against the remote API.
#[derive(Clone)]
pub struct JobPoller {
    api: Arc<dyn JobApi>,
    config: PollConfig,
    cancel: CancellationToken,
}

impl JobPoller {
    pub fn new(api: Arc<dyn JobApi>, config: PollConfig) -> Self {
        Self {
            api,
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Check `job_id` until it reaches a terminal status.
    ///
    /// Returns the finished job, or a [`JobStateError`] for a failed status,
    /// an exhausted failure budget, an elapsed `max_wait`, or cancellation.
    pub async fn poll_until_terminal(
        &self,
        service_id: &str,
        job_id: &str,
        progress: Option<&PollProgressFn>,
    ) -> DbvaultResult<Job> {
        let started = Instant::now();
        let mut state = PollState::new(job_id, self.config.max_failures);
        let cancelled = || -> DbvaultError {
            JobStateError::Cancelled {
                job_id: job_id.to_string(),
            }
            .into()
        };

        loop {
            let checked = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(cancelled()),
                checked = self.api.get_job(service_id, job_id) => checked,
            };

            let step = state.observe(checked);
            debug!(
                job_id,
                attempt = state.attempts(),
                status = state.last_status(),
                "polled job"
            );
            if let Some(cb) = progress {
                cb(&state.progress(started.elapsed()));
            }

            match step {
                PollStep::Continue => {}
                PollStep::Finished(job) => {
                    info!(job_id, attempts = state.attempts(), "job finished");
                    return Ok(job);
                }
                PollStep::Failed(err) => {
                    warn!(job_id, error = %err, "job did not finish");
                    return Err(err.into());
                }
            }

            if let Some(max_wait) = self.config.max_wait {
                let waited = started.elapsed();
                if waited >= max_wait {
                    return Err(JobStateError::TimedOut {
                        job_id: job_id.to_string(),
                        last_status: state.last_status().to_string(),
                        waited,
                    }
                    .into());
                }
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(cancelled()),
                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }
    }

    /// Run [`poll_until_terminal`](Self::poll_until_terminal) on its own task.
    ///
    /// Progress arrives on the handle's channel; the terminal result is
    /// delivered exactly once through a oneshot.
    pub fn spawn(&self, service_id: impl Into<String>, job_id: impl Into<String>) -> PollHandle {
        let service_id = service_id.into();
        let job_id = job_id.into();
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let (result_tx, result_rx) = oneshot::channel();

        let poller = self.clone();
        let task_job_id = job_id.clone();
        tokio::spawn(async move {
            let progress: PollProgressFn = Box::new(move |p: &PollProgress| {
                let _ = progress_tx.send(p.clone());
            });
            let result = poller
                .poll_until_terminal(&service_id, &task_job_id, Some(&progress))
                .await;
            let _ = result_tx.send(result);
        });

        PollHandle {
            job_id,
            progress: progress_rx,
            result: result_rx,
        }
    }
}

/// The caller's end of a spawned poll.
pub struct PollHandle {
    job_id: String,
    progress: mpsc::UnboundedReceiver<PollProgress>,
    result: oneshot::Receiver<DbvaultResult<Job>>,
}

impl PollHandle {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Forward progress to `on_progress` until the poll task delivers its result.
    pub async fn wait(mut self, on_progress: impl Fn(&PollProgress)) -> DbvaultResult<Job> {
        loop {
            tokio::select! {
                biased;
                Some(p) = self.progress.recv() => on_progress(&p),
                result = &mut self.result => {
                    while let Ok(p) = self.progress.try_recv() {
                        on_progress(&p);
                    }
                    return result.unwrap_or_else(|_| {
                        Err(JobStateError::Cancelled { job_id: self.job_id.clone() }.into())
                    });
                }
            }
        }
    }
}
