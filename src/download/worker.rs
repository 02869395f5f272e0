use std::time::Duration;

use chrono::Utc;
use indicatif::ProgressBar;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::error::{DownloadError, FailureClass};
use super::file;
use super::queue::{QueuedTask, TaskQueue};
use super::{DownloadTask, TaskOutcome};
use crate::catalog::{CatalogClient, Variant};
use crate::ledger::{Ledger, LedgerEntry};
use crate::policy::VariantPolicy;
use crate::retry::RetryConfig;

/// Everything a worker needs besides the queue.
pub struct WorkerContext<'a> {
    pub client: &'a CatalogClient,
    pub ledger: &'a Ledger,
    pub policy: &'a dyn VariantPolicy,
    pub retry: RetryConfig,
}

#[derive(Debug, PartialEq, Eq)]
enum NextStep {
    RetryNow,
    /// The cached rendition was rejected; look the variants up again.
    RefreshVariants,
    RetryAfter(Duration),
    Fail(String),
}

fn next_step(task: &DownloadTask, err: &DownloadError, retry: &RetryConfig) -> NextStep {
    match err.class() {
        FailureClass::Permanent
            if task.variant_cached && matches!(err, DownloadError::Catalog(_)) =>
        {
            NextStep::RefreshVariants
        }
        FailureClass::Integrity if !task.integrity_retried => NextStep::RetryNow,
        FailureClass::Integrity => NextStep::Fail(format!("{err} (after one retry)")),
        FailureClass::Transient if task.transient_retries < retry.max_retries => {
            NextStep::RetryAfter(retry.delay_for_retry(task.transient_retries))
        }
        FailureClass::Transient => NextStep::Fail(format!(
            "gave up after {} attempts: {err}",
            task.transient_retries + 1
        )),
        FailureClass::Permanent => NextStep::Fail(err.to_string()),
    }
}

/// Pick a rendition, from the ledger's variant cache when it has a usable
/// one, otherwise from a fresh lookup that is then cached.
async fn select_variant(
    task: &mut DownloadTask,
    ctx: &WorkerContext<'_>,
) -> Result<Variant, DownloadError> {
    let item_id = task.item.id.as_str();
    if !task.bypass_variant_cache {
        if let Some(cached) = ctx.ledger.cached_variants(item_id).await {
            if let Some(chosen) = ctx.policy.select(&task.item, &cached) {
                tracing::debug!(item = item_id, variant = %chosen.label, "Selected cached variant");
                task.variant_cached = true;
                return Ok(chosen.clone());
            }
        }
    }

    let variants = ctx.client.variants(item_id).await?;
    ctx.ledger.cache_variants(item_id, &variants).await;
    let chosen = ctx
        .policy
        .select(&task.item, &variants)
        .cloned()
        .ok_or_else(|| DownloadError::NoVariant {
            item_id: item_id.to_string(),
        })?;
    tracing::debug!(item = item_id, variant = %chosen.label, "Selected variant");
    task.variant_cached = false;
    Ok(chosen)
}

/// One attempt at a task: ledger check, variant selection, transfer,
/// ledger append.
async fn attempt(task: &mut DownloadTask, ctx: &WorkerContext<'_>) -> Result<TaskOutcome, DownloadError> {
    if ctx.ledger.contains(&task.destination.key) {
        return Ok(TaskOutcome::AlreadyPresent);
    }

    let variant = match &task.variant {
        Some(v) => v.clone(),
        None => {
            let chosen = select_variant(task, ctx).await?;
            task.variant = Some(chosen.clone());
            chosen
        }
    };

    let bytes = file::download_variant(ctx.client, &variant, &task.destination.path).await?;
    ctx.ledger
        .record(LedgerEntry {
            key: task.destination.key.clone(),
            item_id: task.item.id.clone(),
            collection: task.collection_title.clone(),
            bytes,
            completed_at: Utc::now(),
        })
        .await?;
    Ok(TaskOutcome::Downloaded { bytes })
}

/// Pull tasks until the queue is finished or the stop signal fires.
pub(crate) async fn run_worker(
    worker: usize,
    queue: &TaskQueue,
    ctx: &WorkerContext<'_>,
    shutdown: &CancellationToken,
    pb: &ProgressBar,
) -> Vec<(DownloadTask, TaskOutcome)> {
    let mut results = Vec::new();

    while let Some(QueuedTask { mut task, ready_at }) = queue.next(shutdown).await {
        if let Some(at) = ready_at {
            tokio::select! {
                _ = tokio::time::sleep_until(at) => {}
                _ = shutdown.cancelled() => {
                    results.push((task, TaskOutcome::NotStarted));
                    queue.complete();
                    continue;
                }
            }
        }

        match attempt(&mut task, ctx).await {
            Ok(outcome) => {
                if let TaskOutcome::Downloaded { bytes } = &outcome {
                    tracing::debug!(worker, bytes = *bytes, path = %task.destination.path.display(), "Downloaded");
                }
                pb.inc(1);
                results.push((task, outcome));
                queue.complete();
            }
            Err(e) => match next_step(&task, &e, &ctx.retry) {
                NextStep::RefreshVariants => {
                    pb.suspend(|| {
                        tracing::info!(worker, "{}; refreshing cached variants", e);
                    });
                    task.variant = None;
                    task.variant_cached = false;
                    task.bypass_variant_cache = true;
                    queue.requeue(task, None);
                }
                NextStep::RetryNow => {
                    pb.suspend(|| {
                        tracing::warn!(worker, "{}; retrying once", e);
                    });
                    task.integrity_retried = true;
                    queue.requeue(task, None);
                }
                NextStep::RetryAfter(delay) => {
                    pb.suspend(|| {
                        tracing::warn!(
                            worker,
                            attempt = task.transient_retries + 1,
                            delay_ms = delay.as_millis() as u64,
                            "Transient failure for {}: {}",
                            task.destination.key,
                            e
                        );
                    });
                    task.transient_retries += 1;
                    queue.requeue(task, Some(Instant::now() + delay));
                }
                NextStep::Fail(reason) => {
                    pb.suspend(|| {
                        tracing::error!("Download failed: {}: {}", task.destination.key, reason);
                    });
                    pb.inc(1);
                    results.push((task, TaskOutcome::Failed { reason }));
                    queue.complete();
                }
            },
        }
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogError;
    use crate::download::tests::task;

    fn retry() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }

    #[test]
    fn test_transient_retries_with_growing_delay() {
        let mut t = task("1");
        let err: DownloadError = CatalogError::Server {
            context: "x".into(),
            status: 500,
        }
        .into();
        let NextStep::RetryAfter(first) = next_step(&t, &err, &retry()) else {
            panic!("expected retry");
        };
        t.transient_retries = 1;
        let NextStep::RetryAfter(second) = next_step(&t, &err, &retry()) else {
            panic!("expected retry");
        };
        assert!(first <= second);
        t.transient_retries = 2;
        assert!(matches!(next_step(&t, &err, &retry()), NextStep::Fail(_)));
    }

    #[test]
    fn test_integrity_retries_once() {
        let mut t = task("1");
        let err = DownloadError::Integrity {
            path: "a".into(),
            expected: Some(2),
            written: 1,
        };
        assert_eq!(next_step(&t, &err, &retry()), NextStep::RetryNow);
        t.integrity_retried = true;
        assert!(matches!(next_step(&t, &err, &retry()), NextStep::Fail(_)));
    }

    #[test]
    fn test_integrity_retry_leaves_transient_budget_alone() {
        let mut t = task("1");
        let integrity = DownloadError::Integrity {
            path: "a".into(),
            expected: Some(2),
            written: 1,
        };
        let transient: DownloadError = CatalogError::Server {
            context: "x".into(),
            status: 503,
        }
        .into();
        assert_eq!(next_step(&t, &integrity, &retry()), NextStep::RetryNow);
        t.integrity_retried = true;

        // Still on the first backoff step: base 1s plus under 1s of jitter.
        let NextStep::RetryAfter(delay) = next_step(&t, &transient, &retry()) else {
            panic!("expected retry");
        };
        assert!(delay < Duration::from_secs(2), "{delay:?}");
        t.transient_retries = 1;
        assert!(matches!(next_step(&t, &transient, &retry()), NextStep::RetryAfter(_)));
        t.transient_retries = 2;
        assert!(matches!(next_step(&t, &transient, &retry()), NextStep::Fail(_)));
    }

    #[test]
    fn test_rejected_cached_variant_is_refreshed_once() {
        let mut t = task("1");
        let gone: DownloadError = CatalogError::NotFound("1_o.jpg".into()).into();
        t.variant_cached = true;
        assert_eq!(next_step(&t, &gone, &retry()), NextStep::RefreshVariants);
        t.variant_cached = false;
        assert!(matches!(next_step(&t, &gone, &retry()), NextStep::Fail(_)));

        t.variant_cached = true;
        let disk = DownloadError::Disk(std::io::Error::other("read-only"));
        assert!(matches!(next_step(&t, &disk, &retry()), NextStep::Fail(_)));
    }

    #[test]
    fn test_permanent_fails_immediately() {
        let t = task("1");
        let err: DownloadError = CatalogError::NotFound("photo 1".into()).into();
        assert!(matches!(next_step(&t, &err, &retry()), NextStep::Fail(r) if r.contains("photo 1")));
    }
}
