//! dbvault: encrypted backup and restore for managed databases
//!
//! Commands:
//!   backup [--skip-poll]                 - take a full backup of the service
//!   download <job> <dest> [--force]      - restore a finished backup to a local file
//!   export <dest> [--force]              - backup, then download, in one step
//!   import <source> [--mongo-*]          - safety backup, then replace data from a dump
//!   list [--page N] [--page-size N]      - list backup jobs
//!   logs <job>                           - print a job's decrypted log output
//!   config show                          - display current configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use dbvault_core::config::DbvaultConfig;
use dbvault_core::types::{ImportOptions, ServiceTarget};
use dbvault_jobs::{HttpJobApi, HttpTransfer, Pipeline, PollConfig, PollProgress, Reporter, Stage};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "dbvault",
    version,
    about = "Encrypted database backup client",
    long_about = "dbvault: back up, download, export and import managed databases through encrypted remote jobs"
)]
struct Cli {
    /// Path to dbvault.toml configuration file
    #[arg(long, short = 'c', env = "DBVAULT_CONFIG", default_value = "dbvault.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides [log] level
    #[arg(long, env = "DBVAULT_LOG")]
    log: Option<String>,

    /// Log format; overrides [log] format
    #[arg(long, env = "DBVAULT_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    /// Service the command operates on
    #[arg(long, env = "DBVAULT_SERVICE", global = true)]
    service: Option<String>,

    /// Pod name of the service, used to look up import requirements
    #[arg(long, env = "DBVAULT_POD", global = true)]
    pod: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Take a full backup of the service
    Backup {
        /// Return as soon as the job is created
        #[arg(long)]
        skip_poll: bool,
    },

    /// Restore a finished backup to a local file
    Download {
        /// Backup job id
        job: String,
        /// Local destination path
        dest: PathBuf,
        /// Overwrite an existing destination
        #[arg(long)]
        force: bool,
    },

    /// Take a fresh backup and restore it to a local file
    Export {
        /// Local destination path
        dest: PathBuf,
        /// Overwrite an existing destination
        #[arg(long)]
        force: bool,
    },

    /// Replace the service's data from a local dump
    ///
    /// A full backup is taken first. The import does not start unless it
    /// finishes.
    Import {
        /// Local dump file
        source: PathBuf,
        /// Target collection (document databases)
        #[arg(long)]
        mongo_collection: Option<String>,
        /// Target database (document databases)
        #[arg(long)]
        mongo_database: Option<String>,
    },

    /// List backup jobs
    List {
        #[arg(long, default_value_t = 1)]
        page: u32,
        /// Jobs per page (default: [transfer] page_size)
        #[arg(long)]
        page_size: Option<u32>,
    },

    /// Print a job's decrypted log output
    Logs {
        /// Job id
        job: String,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = DbvaultConfig::load(&cli.config)
        .with_context(|| format!("loading config: {}", cli.config.display()))?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| match config.log.format.as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Text,
        });
    init_logging(&level, &format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "dbvault starting"
    );

    if let Commands::Config {
        action: ConfigAction::Show,
    } = &cli.command
    {
        return cmd_config_show(&config, &cli.config);
    }

    let target = service_target(&cli)?;
    let cancel = cancel_on_ctrl_c();

    match cli.command {
        Commands::Backup { skip_poll } => cmd_backup(&config, &target, cancel, skip_poll).await,
        Commands::Download { job, dest, force } => {
            cmd_download(&config, &target, cancel, &job, &dest, force).await
        }
        Commands::Export { dest, force } => cmd_export(&config, &target, cancel, &dest, force).await,
        Commands::Import {
            source,
            mongo_collection,
            mongo_database,
        } => {
            let options = ImportOptions {
                mongo_collection,
                mongo_database,
            };
            cmd_import(&config, &target, cancel, &source, options).await
        }
        Commands::List { page, page_size } => {
            cmd_list(&config, &target, cancel, page, page_size).await
        }
        Commands::Logs { job } => cmd_logs(&config, &target, cancel, &job).await,
        Commands::Config { .. } => Ok(()),
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // logs go to stderr so stdout stays clean for command output
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn service_target(cli: &Cli) -> Result<ServiceTarget> {
    let service = cli
        .service
        .clone()
        .context("no service given; use --service or set DBVAULT_SERVICE")?;
    let pod = cli.pod.clone().unwrap_or_default();
    Ok(ServiceTarget::new(service, pod))
}

/// Ctrl-C aborts whatever job wait is in progress.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            trigger.cancel();
        }
    });
    cancel
}

// ── Pipeline construction ─────────────────────────────────────────────────────

/// Build the workflow pipeline from config.
///
/// The API token is read from DBVAULT_TOKEN and never from the config file.
fn build_pipeline(
    config: &DbvaultConfig,
    reporter: Arc<dyn Reporter>,
    cancel: CancellationToken,
) -> Result<Pipeline> {
    let token = std::env::var("DBVAULT_TOKEN").ok().map(SecretString::from);
    if token.is_none() {
        warn!("DBVAULT_TOKEN is not set; API requests are unauthenticated");
    }

    let api = HttpJobApi::new(&config.api, token).context("configuring API client")?;
    let transfer = HttpTransfer::new(config.api.timeout()).context("configuring transfer client")?;

    let mut pipeline = Pipeline::new(Arc::new(api), Arc::new(transfer), PollConfig::from(&config.poll))
        .with_reporter(reporter)
        .with_cancellation(cancel)
        .with_page_size(config.transfer.page_size);
    if let Some(dir) = &config.transfer.work_dir {
        pipeline = pipeline.with_work_dir(dir);
    }
    Ok(pipeline)
}

// ── Progress display ──────────────────────────────────────────────────────────

fn make_spinner(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} {spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// Drives a spinner from pipeline stages and poll progress.
struct SpinnerReporter {
    pb: ProgressBar,
}

impl SpinnerReporter {
    fn new(prefix: &str) -> Arc<Self> {
        Arc::new(Self {
            pb: make_spinner(prefix),
        })
    }

    fn finish(&self, msg: &str) {
        self.pb.finish_with_message(msg.to_string());
    }

    fn abandon(&self) {
        self.pb.abandon_with_message("failed".to_string());
    }
}

impl Reporter for SpinnerReporter {
    fn stage(&self, stage: &Stage) {
        self.pb.set_message(format!("{stage}..."));
    }

    fn poll_progress(&self, p: &PollProgress) {
        let mut msg = format!(
            "job {} {} (check {}, {}s)",
            p.job_id,
            p.status,
            p.attempt,
            p.elapsed.as_secs()
        );
        if p.consecutive_failures > 0 {
            msg.push_str(&format!(", {} failed checks", p.consecutive_failures));
        }
        self.pb.set_message(msg);
    }

    fn job_logs(&self, job_id: &str, logs: &str) {
        self.pb.suspend(|| {
            eprintln!("── logs of job {job_id} ──");
            eprint!("{logs}");
            if !logs.ends_with('\n') {
                eprintln!();
            }
        });
    }
}

/// Run `work` with a spinner, finishing or abandoning it by outcome.
async fn with_spinner<T, F, Fut>(
    config: &DbvaultConfig,
    cancel: CancellationToken,
    prefix: &str,
    work: F,
) -> Result<T>
where
    F: FnOnce(Pipeline) -> Fut,
    Fut: std::future::Future<Output = dbvault_core::DbvaultResult<T>>,
{
    let reporter = SpinnerReporter::new(prefix);
    let pipeline = build_pipeline(config, reporter.clone(), cancel)?;
    match work(pipeline).await {
        Ok(value) => {
            reporter.finish("done");
            Ok(value)
        }
        Err(e) => {
            reporter.abandon();
            Err(e).with_context(|| format!("{prefix} failed"))
        }
    }
}

// ── `dbvault backup` ──────────────────────────────────────────────────────────

async fn cmd_backup(
    config: &DbvaultConfig,
    target: &ServiceTarget,
    cancel: CancellationToken,
    skip_poll: bool,
) -> Result<()> {
    let job = with_spinner(config, cancel, "backup", |p| async move {
        p.backup(target, skip_poll).await
    })
    .await?;

    println!("Backup:");
    println!("  job:    {}", job.id);
    println!("  status: {}", job.status);
    Ok(())
}

// ── `dbvault download` ────────────────────────────────────────────────────────

async fn cmd_download(
    config: &DbvaultConfig,
    target: &ServiceTarget,
    cancel: CancellationToken,
    job_id: &str,
    dest: &Path,
    force: bool,
) -> Result<()> {
    let outcome = with_spinner(config, cancel, "download", |p| async move {
        p.download(target, job_id, dest, force).await
    })
    .await?;

    println!("Downloaded:");
    println!("  job:    {}", outcome.job_id);
    println!("  local:  {}", outcome.path.display());
    println!("  bytes:  {}", fmt_bytes(outcome.bytes));
    Ok(())
}

// ── `dbvault export` ──────────────────────────────────────────────────────────

async fn cmd_export(
    config: &DbvaultConfig,
    target: &ServiceTarget,
    cancel: CancellationToken,
    dest: &Path,
    force: bool,
) -> Result<()> {
    let outcome = with_spinner(config, cancel, "export", |p| async move {
        p.export(target, dest, force).await
    })
    .await?;

    println!("Exported:");
    println!("  job:    {}", outcome.job_id);
    println!("  local:  {}", outcome.path.display());
    println!("  bytes:  {}", fmt_bytes(outcome.bytes));
    Ok(())
}

// ── `dbvault import` ──────────────────────────────────────────────────────────

async fn cmd_import(
    config: &DbvaultConfig,
    target: &ServiceTarget,
    cancel: CancellationToken,
    source: &Path,
    options: ImportOptions,
) -> Result<()> {
    if target.pod.is_empty() {
        warn!("no --pod given; uploading without a declared length");
    }
    let outcome = with_spinner(config, cancel, "import", |p| async move {
        p.import(target, source, options).await
    })
    .await?;

    println!("Imported:");
    println!("  safety backup: {}", outcome.safety_backup.id);
    println!("  import job:    {}", outcome.import_job.id);
    println!("  uploaded:      {}", fmt_bytes(outcome.uploaded_bytes));
    Ok(())
}

// ── `dbvault list` ────────────────────────────────────────────────────────────

async fn cmd_list(
    config: &DbvaultConfig,
    target: &ServiceTarget,
    cancel: CancellationToken,
    page: u32,
    page_size: Option<u32>,
) -> Result<()> {
    let page_size = page_size.unwrap_or(config.transfer.page_size);
    let pipeline = build_pipeline(config, Arc::new(dbvault_jobs::NullReporter), cancel)?;
    let jobs = pipeline
        .list_backups(target, page, page_size)
        .await
        .context("listing backups")?;

    if jobs.is_empty() {
        println!("No backups on page {page}.");
        return Ok(());
    }
    println!("{:<38} {:<10} CREATED", "JOB", "STATUS");
    for job in &jobs {
        println!("{:<38} {:<10} {}", job.id, job.status, job.created_at);
    }
    Ok(())
}

// ── `dbvault logs` ────────────────────────────────────────────────────────────

async fn cmd_logs(
    config: &DbvaultConfig,
    target: &ServiceTarget,
    cancel: CancellationToken,
    job_id: &str,
) -> Result<()> {
    let pipeline = build_pipeline(config, Arc::new(dbvault_jobs::NullReporter), cancel)?;
    let logs = pipeline
        .job_logs(target, job_id)
        .await
        .with_context(|| format!("fetching logs of job {job_id}"))?;
    print!("{logs}");
    Ok(())
}

// ── `dbvault config show` ─────────────────────────────────────────────────────

fn cmd_config_show(config: &DbvaultConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

// ── Utilities ─────────────────────────────────────────────────────────────────

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
