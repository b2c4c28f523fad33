pub mod config;
pub mod error;
pub mod types;

pub use error::{DbvaultError, DbvaultResult, ErrorKind, JobStateError};
pub use types::{classify_status, Job, JobPhase, JobRequest, JobType, ServiceTarget, TempUrl};
