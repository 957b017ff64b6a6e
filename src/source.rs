//! Everything one source needs at run time
//!
//! A [`SourceContext`] bundles the collaborators of one source. The crawler
//! and the ingestion pool both borrow it, so they share one backoff
//! controller, one seen-cache and one set of run counters.

use crate::backoff::BackoffController;
use crate::crawler::{LinkExtractor, PageFetcher};
use crate::ledger::LedgerStore;
use crate::output::RunStats;
use crate::relay::RelaySink;
use crate::state::SeenCache;
use std::sync::Arc;

pub struct SourceContext {
    pub name: String,
    pub extractor: LinkExtractor,
    pub categories: Vec<String>,
    pub fetcher: Arc<dyn PageFetcher>,
    pub ledger: Arc<dyn LedgerStore>,
    pub sink: Arc<dyn RelaySink>,
    pub backoff: Arc<BackoffController>,
    pub cache: Arc<SeenCache>,
    pub stats: Arc<RunStats>,
}

impl SourceContext {
    /// Builds a context whose cache is seeded from the ledger
    pub async fn seeded(
        name: &str,
        extractor: LinkExtractor,
        categories: Vec<String>,
        fetcher: Arc<dyn PageFetcher>,
        ledger: Arc<dyn LedgerStore>,
        sink: Arc<dyn RelaySink>,
        backoff: Arc<BackoffController>,
    ) -> Self {
        let cache = SeenCache::seed(name, ledger.as_ref()).await;
        Self {
            name: name.to_string(),
            extractor,
            categories,
            fetcher,
            ledger,
            sink,
            backoff,
            cache: Arc::new(cache),
            stats: Arc::new(RunStats::new()),
        }
    }
}
