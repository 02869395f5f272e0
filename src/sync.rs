//! Run orchestration: index, resolve, filter, download, summarize.

use std::process::ExitCode;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::catalog::CatalogClient;
use crate::download::{self, DownloadConfig, FailedTask, WorkerContext};
use crate::filter::{self, FilterConfig};
use crate::index::{self, IndexConfig, IndexError};
use crate::ledger::{Ledger, RunStats};
use crate::policy::VariantPolicy;
use crate::resolve;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub index: IndexConfig,
    pub filter: FilterConfig,
    pub download: DownloadConfig,
}

/// Counts for one run.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub items_indexed: usize,
    pub downloaded: usize,
    pub bytes: u64,
    pub already_present: usize,
    /// Extra collection memberships that did not become extra files.
    pub duplicates_avoided: usize,
    pub excluded: usize,
    pub skipped_videos: usize,
    pub failed: Vec<FailedTask>,
    pub not_started: usize,
    /// Tasks a dry run would have downloaded.
    pub planned: usize,
    pub interrupted: bool,
    /// Set when the index build aborted.
    pub fatal: Option<String>,
    pub elapsed: Duration,
}

impl RunSummary {
    /// 130 when interrupted, 1 on any failure, 0 otherwise.
    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.exit_status())
    }

    fn exit_status(&self) -> u8 {
        if self.interrupted {
            crate::shutdown::INTERRUPTED_EXIT
        } else if self.fatal.is_some() || !self.failed.is_empty() {
            1
        } else {
            0
        }
    }

    fn stats(&self) -> RunStats {
        RunStats {
            items_indexed: self.items_indexed as u64,
            downloaded: self.downloaded as u64,
            already_present: self.already_present as u64,
            failed: self.failed.len() as u64,
            interrupted: self.interrupted,
        }
    }

    pub fn log(&self, dry_run: bool) {
        if let Some(reason) = &self.fatal {
            tracing::error!("Index build failed, nothing was downloaded: {}", reason);
            return;
        }
        if dry_run {
            tracing::info!("── Dry Run Summary ──");
            tracing::info!("  {} files would be downloaded", self.planned);
            tracing::info!("  {} already present", self.already_present);
            return;
        }

        tracing::info!("── Summary ──");
        tracing::info!(
            "  {} downloaded ({} bytes), {} already present, {} failed",
            self.downloaded,
            self.bytes,
            self.already_present,
            self.failed.len()
        );
        tracing::info!(
            "  {} indexed, {} duplicates avoided, {} excluded, {} videos skipped",
            self.items_indexed,
            self.duplicates_avoided,
            self.excluded,
            self.skipped_videos
        );
        if self.interrupted {
            tracing::warn!("  Interrupted: {} not started", self.not_started);
        }
        tracing::info!("  elapsed: {}", download::format_duration(self.elapsed));
        for task in &self.failed {
            tracing::error!("Download failed: {}: {}", task.destination, task.reason);
        }
    }
}

pub struct SyncEngine<'a> {
    client: &'a CatalogClient,
    ledger: &'a Ledger,
    policy: &'a dyn VariantPolicy,
    config: &'a SyncConfig,
}

impl<'a> SyncEngine<'a> {
    pub fn new(
        client: &'a CatalogClient,
        ledger: &'a Ledger,
        policy: &'a dyn VariantPolicy,
        config: &'a SyncConfig,
    ) -> Self {
        Self {
            client,
            ledger,
            policy,
            config,
        }
    }

    /// Run one sync and record it in the ledger's run history.
    pub async fn run(&self, shutdown: &CancellationToken) -> RunSummary {
        let dry_run = self.config.download.dry_run;
        let run_id = if dry_run {
            None
        } else {
            match self.ledger.store().start_run().await {
                Ok(id) => Some(id),
                Err(e) => {
                    tracing::warn!("Failed to record sync run start: {}", e);
                    None
                }
            }
        };

        let summary = self.sync(shutdown).await;

        if let Some(id) = run_id {
            if let Err(e) = self.ledger.store().complete_run(id, &summary.stats()).await {
                tracing::warn!("Failed to record sync run completion: {}", e);
            }
        }
        summary
    }

    async fn sync(&self, shutdown: &CancellationToken) -> RunSummary {
        let started = Instant::now();
        let mut summary = RunSummary::default();

        let index = match index::build_index(self.client, &self.config.index, shutdown).await {
            Ok(index) => index,
            Err(IndexError::Interrupted) => {
                tracing::warn!("Interrupted while indexing");
                summary.interrupted = true;
                summary.elapsed = started.elapsed();
                return summary;
            }
            Err(e) => {
                summary.fatal = Some(e.to_string());
                summary.elapsed = started.elapsed();
                return summary;
            }
        };
        summary.items_indexed = index.len();
        summary.duplicates_avoided = index.membership_count().saturating_sub(index.len());

        let resolution = resolve::resolve(&index);
        resolve::log_duplicates(&resolution.duplicates);

        let plan = filter::plan_downloads(&index, &resolution, &self.config.filter, self.ledger);
        summary.already_present = plan.already_present;
        summary.excluded = plan.excluded;
        summary.skipped_videos = plan.skipped_videos;
        summary.planned = plan.tasks.len();

        if plan.tasks.is_empty() {
            tracing::info!("No new photos to download");
            summary.elapsed = started.elapsed();
            return summary;
        }
        if self.config.download.dry_run {
            download::log_dry_run(&plan.tasks);
            summary.elapsed = started.elapsed();
            return summary;
        }

        tracing::info!(
            "Downloading {} items with {} workers",
            plan.tasks.len(),
            self.config.download.concurrent_downloads
        );
        let ctx = WorkerContext {
            client: self.client,
            ledger: self.ledger,
            policy: self.policy,
            retry: self.config.download.retry,
        };
        let report = download::run_pool(plan.tasks, &ctx, &self.config.download, shutdown).await;

        summary.downloaded = report.downloaded;
        summary.bytes = report.bytes;
        summary.already_present += report.already_present;
        summary.failed = report.failed;
        summary.not_started = report.not_started;
        summary.interrupted = shutdown.is_cancelled();
        summary.elapsed = started.elapsed();
        summary
    }
}
