//! Batch-barrier worker pool
//!
//! Claims a batch of pending items, runs them through [`process_one`] on at
//! most `workers` concurrent tasks, waits for the whole batch, then claims
//! the next one. Stops when the queue is empty, the limit is reached, the
//! ledger cannot be read, or the run is cancelled.

use super::pipeline::{fail_item, process_one, ItemFailure};
use crate::config::WorkerConfig;
use crate::ledger::DiscoveredItem;
use crate::source::SourceContext;
use futures::stream::{self, StreamExt};
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Drains the pending queue of one source
pub struct IngestPool {
    ctx: Arc<SourceContext>,
    settings: WorkerConfig,
    cancel: CancellationToken,
}

impl IngestPool {
    pub fn new(ctx: Arc<SourceContext>, settings: WorkerConfig, cancel: CancellationToken) -> Self {
        Self {
            ctx,
            settings,
            cancel,
        }
    }

    /// Processes pending items until the queue is empty or `limit` is reached
    ///
    /// Returns the number of items that reached a terminal status.
    pub async fn process_queue(&self, limit: Option<u64>) -> u64 {
        let source = self.ctx.name.as_str();
        let batch_size = self.settings.batch_size.max(1);
        let workers = self.settings.workers.max(1);
        let started = Instant::now();
        let mut processed: u64 = 0;
        let mut batch_number = 0;

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!(source = %source, "Processing cancelled");
                break;
            }

            let claim = match limit {
                Some(limit) if processed >= limit => {
                    tracing::info!(source = %source, limit = limit, "Item limit reached");
                    break;
                }
                Some(limit) => batch_size.min((limit - processed) as usize),
                None => batch_size,
            };

            let batch = match self.ctx.ledger.claim_pending(source, claim).await {
                Ok(batch) => batch,
                Err(e) => {
                    tracing::error!(source = %source, error = %e, "Could not claim pending items");
                    break;
                }
            };
            if batch.is_empty() {
                tracing::info!(source = %source, "Queue exhausted");
                break;
            }

            batch_number += 1;
            let claimed = batch.len();
            let succeeded = self.run_batch(batch, workers).await;
            let previous = processed;
            processed += claimed as u64;

            tracing::info!(
                source = %source,
                batch = batch_number,
                items = claimed,
                succeeded = succeeded,
                "Batch finished"
            );
            self.log_progress(previous, processed, started);

            if claimed < claim {
                // Short batch: nothing else was pending at claim time
                continue;
            }
            self.batch_cooldown().await;
        }

        processed
    }

    /// Runs one batch to completion, returning how many items succeeded
    async fn run_batch(&self, batch: Vec<DiscoveredItem>, workers: usize) -> usize {
        let results: Vec<bool> = stream::iter(batch)
            .map(|item| {
                let ctx = Arc::clone(&self.ctx);
                async move {
                    let url = item.url.clone();
                    let task_ctx = Arc::clone(&ctx);
                    match tokio::spawn(async move { process_one(&task_ctx, &item.url).await }).await {
                        Ok(success) => success,
                        Err(e) => {
                            tracing::error!(url = %url, error = %e, "Worker task aborted");
                            fail_item(&ctx, &url, &ItemFailure::Aborted).await;
                            false
                        }
                    }
                }
            })
            .buffer_unordered(workers)
            .collect()
            .await;

        results.into_iter().filter(|ok| *ok).count()
    }

    fn log_progress(&self, previous: u64, processed: u64, started: Instant) {
        let interval = self.settings.progress_interval.max(1);
        if previous / interval == processed / interval {
            return;
        }

        let counters = self.ctx.stats.snapshot();
        let rate = processed as f64 / started.elapsed().as_secs_f64().max(1.0);
        tracing::info!(
            "Progress [{}]: {} processed ({} ok, {} failed, {} duplicates), {:.2} items/sec",
            self.ctx.name,
            counters.processed,
            counters.succeeded,
            counters.failed,
            counters.deduplicated,
            rate
        );
    }

    /// Randomized pause between batches; returns early on cancel
    async fn batch_cooldown(&self) {
        let delay = batch_delay(&self.settings);
        if delay.is_zero() {
            return;
        }
        tracing::debug!(secs = delay.as_secs_f64(), "Cooling down between batches");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = self.cancel.cancelled() => {}
        }
    }
}

fn batch_delay(settings: &WorkerConfig) -> Duration {
    let min = settings.batch_cooldown_min_secs;
    let max = settings.batch_cooldown_max_secs;
    if max <= 0.0 {
        return Duration::ZERO;
    }
    let secs = if max > min {
        rand::rng().random_range(min..=max)
    } else {
        min
    };
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
}
