//! Resumable listing crawler
//!
//! Walks the categories of one source page by page and records every detail
//! link as a pending item. Pages are fetched strictly one at a time and the
//! checkpoint is written after each page, so a restart resumes at the last
//! page seen. Re-crawling that page is harmless because item insertion is
//! idempotent.

use crate::config::CrawlerConfig;
use crate::ledger::DiscoveredItem;
use crate::source::SourceContext;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What a crawl accomplished
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlReport {
    /// Items inserted into the ledger for the first time
    pub new_items: u64,
    pub pages: u64,
    /// False when the crawl was cancelled before finishing every category
    pub completed: bool,
}

/// Why a category ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CategoryEnd {
    /// Listing ran out (not found, or a page without links)
    Exhausted,
    /// Too many consecutive pages without new items
    Stale,
    /// Page limit of a monitor crawl reached
    PageLimit,
    /// Too many consecutive fetch failures
    Failing,
    Cancelled,
}

/// Sequential, checkpointed crawler for one source
pub struct Crawler {
    ctx: Arc<SourceContext>,
    settings: CrawlerConfig,
    cancel: CancellationToken,
}

impl Crawler {
    pub fn new(ctx: Arc<SourceContext>, settings: CrawlerConfig, cancel: CancellationToken) -> Self {
        Self {
            ctx,
            settings,
            cancel,
        }
    }

    /// Crawls `categories`, returning how many new items were found
    ///
    /// With a `page_limit` this is a monitor crawl: at most that many pages
    /// per category, stopping at the first page without new items, and the
    /// checkpoint is neither read nor written. Without one it is a full
    /// crawl that resumes from the checkpoint, tolerates up to
    /// `stale-page-limit` pages of already-known items, and clears the
    /// checkpoint once every category is done.
    pub async fn crawl(&self, categories: &[String], page_limit: Option<u32>) -> CrawlReport {
        let source = self.ctx.name.as_str();
        let monitor = page_limit.is_some();
        let mut report = CrawlReport::default();

        let (start_index, start_page) = if monitor {
            (0, 1)
        } else {
            self.resume_point(categories).await
        };

        tracing::info!(
            source = %source,
            categories = categories.len(),
            monitor = monitor,
            "Starting crawl"
        );

        for (index, category) in categories.iter().enumerate().skip(start_index) {
            let first_page = if index == start_index { start_page } else { 1 };
            let end = self
                .crawl_category(category, first_page, page_limit, &mut report)
                .await;

            tracing::info!(
                source = %source,
                category = %category,
                reason = ?end,
                "Category finished"
            );

            if end == CategoryEnd::Cancelled {
                return report;
            }

            if !monitor {
                if let Some(next) = categories.get(index + 1) {
                    self.save_checkpoint(next, 1).await;
                }
            }
        }

        if !monitor {
            if let Err(e) = self.ctx.ledger.clear_checkpoint(source).await {
                tracing::warn!(source = %source, error = %e, "Failed to clear checkpoint");
            }
        }

        report.completed = true;
        tracing::info!(
            source = %source,
            new_items = report.new_items,
            pages = report.pages,
            "Crawl complete"
        );
        report
    }

    /// Category index and page to start from
    async fn resume_point(&self, categories: &[String]) -> (usize, u32) {
        let source = self.ctx.name.as_str();
        let checkpoint = match self.ctx.ledger.load_checkpoint(source).await {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                tracing::warn!(source = %source, error = %e, "Could not load checkpoint, starting over");
                None
            }
        };

        let Some(checkpoint) = checkpoint else {
            return (0, 1);
        };

        match categories.iter().position(|c| *c == checkpoint.category) {
            Some(index) => {
                tracing::info!(
                    source = %source,
                    category = %checkpoint.category,
                    page = checkpoint.page,
                    "Resuming from checkpoint"
                );
                (index, checkpoint.page.max(1))
            }
            None => {
                tracing::warn!(
                    source = %source,
                    category = %checkpoint.category,
                    "Checkpoint names an unknown category, starting over"
                );
                (0, 1)
            }
        }
    }

    async fn crawl_category(
        &self,
        category: &str,
        first_page: u32,
        page_limit: Option<u32>,
        report: &mut CrawlReport,
    ) -> CategoryEnd {
        let source = self.ctx.name.as_str();
        let monitor = page_limit.is_some();
        let mut page = first_page;
        let mut pages_seen = 0;
        let mut stale_pages = 0;
        let mut failures = 0;

        loop {
            if self.cancel.is_cancelled() {
                return CategoryEnd::Cancelled;
            }
            if page_limit.is_some_and(|limit| pages_seen >= limit) {
                return CategoryEnd::PageLimit;
            }

            let url = self.ctx.extractor.listing_url(category, page);
            pages_seen += 1;

            let response = match self.ctx.backoff.fetch(self.ctx.fetcher.as_ref(), &url).await {
                Ok(response) => response,
                Err(e) if e.is_terminal() => {
                    tracing::info!(url = %url, error = %e, "Listing ended");
                    return CategoryEnd::Exhausted;
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!(url = %url, failures = failures, error = %e, "Listing page failed");
                    if failures >= self.settings.max_consecutive_failures {
                        return CategoryEnd::Failing;
                    }
                    page += 1;
                    self.polite_delay().await;
                    continue;
                }
            };
            failures = 0;
            report.pages += 1;

            let links = self.ctx.extractor.extract_detail_links(&response.text());
            if links.is_empty() {
                tracing::info!(url = %url, "Page has no detail links");
                return CategoryEnd::Exhausted;
            }

            let new_items = self.record_links(&links, category, page).await;
            report.new_items += new_items;
            self.ctx.stats.add_discovered(new_items);

            tracing::info!(
                source = %source,
                category = %category,
                page = page,
                links = links.len(),
                new = new_items,
                "Crawled listing page"
            );

            if !monitor {
                self.save_checkpoint(category, page).await;
            }

            if new_items == 0 {
                if monitor {
                    return CategoryEnd::Stale;
                }
                stale_pages += 1;
                if stale_pages >= self.settings.stale_page_limit {
                    return CategoryEnd::Stale;
                }
            } else {
                stale_pages = 0;
            }

            page += 1;
            self.polite_delay().await;
        }
    }

    /// Inserts the links as pending items, returning how many were new
    async fn record_links(&self, links: &[String], category: &str, page: u32) -> u64 {
        let mut new_items = 0;
        for link in links {
            if self.ctx.cache.is_processed(link).await {
                continue;
            }

            let item = DiscoveredItem::new(link.as_str(), self.ctx.name.as_str(), category, page);
            match self.ctx.ledger.upsert_discovered(&item).await {
                Ok(true) => new_items += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(url = %link, error = %e, "Failed to record discovered item"),
            }
        }
        new_items
    }

    async fn save_checkpoint(&self, category: &str, page: u32) {
        if let Err(e) = self
            .ctx
            .ledger
            .save_checkpoint(&self.ctx.name, category, page)
            .await
        {
            tracing::warn!(
                source = %self.ctx.name,
                category = %category,
                page = page,
                error = %e,
                "Failed to save checkpoint"
            );
        }
    }

    /// Randomized pause between listing pages; returns early on cancel
    async fn polite_delay(&self) {
        let delay = page_delay(&self.settings);
        if delay.is_zero() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = self.cancel.cancelled() => {}
        }
    }
}

fn page_delay(settings: &CrawlerConfig) -> Duration {
    let min = settings.page_delay_min_secs;
    let max = settings.page_delay_max_secs;
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
