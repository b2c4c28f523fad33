use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{DbvaultError, DbvaultResult};

/// Top-level client configuration (loaded from dbvault.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DbvaultConfig {
    pub api: ApiConfig,
    pub poll: PollSettings,
    pub transfer: TransferConfig,
    pub log: LogConfig,
}

impl DbvaultConfig {
    /// Load configuration from `path`, falling back to defaults when the file
    /// does not exist.
    pub fn load(path: &Path) -> DbvaultResult<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| DbvaultError::fs(format!("reading config {}", path.display()), e))?;
        toml::from_str(&content)
            .map_err(|e| DbvaultError::Config(format!("parsing {}: {e}", path.display())))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Platform API root, e.g. https://api.example.com/v1
    pub base_url: String,
    /// Environment the target services live in
    pub environment_id: String,
    /// Per-request timeout for API calls (not for artifact transfers)
    pub timeout_secs: u64,
    /// Refuse plaintext HTTP endpoints
    pub enforce_tls: bool,
}

impl ApiConfig {
    /// Check the endpoint against `enforce_tls`.
    ///
    /// Plaintext HTTP is an error when `enforce_tls` is set, a warning otherwise.
    pub fn validate(&self) -> DbvaultResult<()> {
        if self.environment_id.is_empty() {
            return Err(DbvaultError::Config(
                "api.environment_id is not set".to_string(),
            ));
        }
        if self.base_url.starts_with("http://") {
            if self.enforce_tls {
                return Err(DbvaultError::Config(format!(
                    "API endpoint uses plaintext HTTP ({}), but enforce_tls is enabled",
                    self.base_url
                )));
            }
            tracing::warn!(
                endpoint = %self.base_url,
                "API endpoint uses plaintext HTTP; key material would cross the wire unencrypted"
            );
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Job polling behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    /// Delay between status checks in milliseconds (default: 2000)
    pub interval_ms: u64,
    /// Consecutive failed status checks tolerated before giving up (default: 3)
    pub max_failures: u32,
    /// Upper bound on total polling time in seconds; 0 = poll forever
    pub max_wait_secs: u64,
}

impl PollSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn max_wait(&self) -> Option<Duration> {
        (self.max_wait_secs > 0).then(|| Duration::from_secs(self.max_wait_secs))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Directory for in-flight ciphertext (default: system temp dir)
    pub work_dir: Option<PathBuf>,
    /// Default page size for job listings
    pub page_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.dbvault.io/v1".into(),
            environment_id: String::new(),
            timeout_secs: 30,
            enforce_tls: true,
        }
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval_ms: 2000,
            max_failures: 3,
            max_wait_secs: 12 * 60 * 60,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            work_dir: None,
            page_size: 10,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}
