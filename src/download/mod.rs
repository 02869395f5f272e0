//! Download scheduler: a bounded pool of workers draining a shared task
//! queue. Each task resolves its variant, streams the bytes to disk, and
//! appends a ledger entry. Transient failures go back on the queue with
//! exponential backoff; a single task never takes the pool down.

pub mod error;
pub mod file;
pub mod paths;
mod queue;
mod worker;

use std::io::IsTerminal;
use std::time::Duration;

use futures_util::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;

use crate::catalog::{Collection, MediaItem, Variant};
use crate::retry::RetryConfig;

pub use paths::Destination;
pub use worker::WorkerContext;

/// Subset of application config consumed by the download engine.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub(crate) concurrent_downloads: usize,
    pub(crate) retry: RetryConfig,
    pub(crate) dry_run: bool,
    pub(crate) no_progress_bar: bool,
}

/// A unit of work produced by the filter stage.
#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub item: MediaItem,
    pub collection_title: String,
    pub destination: Destination,
    /// Filled in by the worker on the first attempt.
    pub variant: Option<Variant>,
    /// `variant` came from the ledger's variant cache.
    pub variant_cached: bool,
    /// Skip the variant cache after a cached rendition was rejected.
    pub bypass_variant_cache: bool,
    /// Transient failures retried so far; integrity retries don't count.
    pub transient_retries: u32,
    pub integrity_retried: bool,
}

impl DownloadTask {
    pub fn new(item: MediaItem, collection: &Collection, destination: Destination) -> Self {
        Self {
            item,
            collection_title: collection.title.clone(),
            destination,
            variant: None,
            variant_cached: false,
            bypass_variant_cache: false,
            transient_retries: 0,
            integrity_retried: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Downloaded { bytes: u64 },
    /// Another task or a previous run already completed this destination.
    AlreadyPresent,
    Failed { reason: String },
    /// Left in the queue when the stop signal fired.
    NotStarted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedTask {
    pub item_id: String,
    pub destination: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct PoolReport {
    pub downloaded: usize,
    pub bytes: u64,
    pub already_present: usize,
    pub failed: Vec<FailedTask>,
    pub not_started: usize,
}

impl PoolReport {
    fn record(&mut self, task: DownloadTask, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Downloaded { bytes } => {
                self.downloaded += 1;
                self.bytes += bytes;
            }
            TaskOutcome::AlreadyPresent => self.already_present += 1,
            TaskOutcome::Failed { reason } => self.failed.push(FailedTask {
                item_id: task.item.id,
                destination: task.destination.key,
                reason,
            }),
            TaskOutcome::NotStarted => self.not_started += 1,
        }
    }
}

/// Create a progress bar with a consistent template.
///
/// Hidden when the user passed `--no-progress-bar` or stdout is not a TTY.
fn create_progress_bar(no_progress_bar: bool, total: u64) -> ProgressBar {
    if no_progress_bar || !std::io::stdout().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template(
            "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )
        .expect("valid template")
        .progress_chars("=> "),
    );
    pb
}

/// Run `tasks` through `config.concurrent_downloads` workers.
pub async fn run_pool(
    tasks: Vec<DownloadTask>,
    ctx: &WorkerContext<'_>,
    config: &DownloadConfig,
    shutdown: &CancellationToken,
) -> PoolReport {
    let pb = create_progress_bar(config.no_progress_bar, tasks.len() as u64);
    let queue = queue::TaskQueue::new(tasks);
    let workers = config.concurrent_downloads.max(1);
    tracing::debug!(workers, "Starting download workers");

    let results = join_all(
        (0..workers).map(|id| worker::run_worker(id, &queue, ctx, shutdown, &pb)),
    )
    .await;

    let mut report = PoolReport::default();
    for (task, outcome) in results.into_iter().flatten() {
        report.record(task, outcome);
    }
    for task in queue.drain().await {
        report.record(task, TaskOutcome::NotStarted);
    }
    pb.finish_and_clear();
    report
}

/// Log what a real run would download.
pub fn log_dry_run(tasks: &[DownloadTask]) {
    for task in tasks {
        tracing::info!(
            "[DRY RUN] Would download {}",
            task.destination.path.display()
        );
    }
}

pub(crate) fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let mins = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m {:02}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}
