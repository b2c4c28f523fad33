//! dbvault-jobs: remote job orchestration for database backup, download,
//! export and import
//!
//! ```text
//! Pipeline ──create──► JobApi ──► Job{id}
//!    │                               │
//!    └──spawn──► JobPoller ◄─────────┘  (status until terminal, bounded failures)
//!                   │ oneshot
//!    ◄──────────────┘
//!    └──► TempUrl ──► BlobTransfer ◄──► dbvault-crypto stream codec ◄──► local file
//! ```

pub mod api;
pub mod http;
pub mod pipeline;
pub mod poller;
pub mod report;

pub use api::{BlobTransfer, JobApi};
pub use http::{HttpJobApi, HttpTransfer};
pub use pipeline::{DownloadOutcome, ImportOutcome, Pipeline};
pub use poller::{JobPoller, PollConfig, PollHandle, PollProgress, PollState, PollStep};
pub use report::{NullReporter, Reporter, Stage};
