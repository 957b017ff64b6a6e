//! Shared fixtures for the integration tests

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use subrelay::backoff::{BackoffController, FetchBackoffSettings, RelayBackoffSettings};
use subrelay::config::{CrawlerConfig, HttpConfig, WorkerConfig};
use subrelay::crawler::{HttpFetcher, LinkExtractor, PageFetcher, SiteKind};
use subrelay::ledger::{LedgerStore, SqliteLedger};
use subrelay::relay::{ArtifactReceipt, RelaySink, SinkError, Upload};
use subrelay::source::SourceContext;

pub const SOURCE: &str = "zoom";
pub const CATEGORY: &str = "/category/films/";

/// SubRip payload; sniffs as a plain subtitle
pub const SRT_BODY: &str = "1\n00:00:01,000 --> 00:00:02,000\nහෙලෝ\n";

/// Zip local file header followed by filler
pub const ZIP_BODY: &[u8] = b"PK\x03\x04\x14\x00\x00\x00archive";

/// Backoff tuned down to milliseconds
pub fn fast_backoff() -> BackoffController {
    BackoffController::new(
        FetchBackoffSettings {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            cooldown_after: 5,
            cooldown: Duration::from_millis(100),
            transient_min: Duration::from_millis(5),
            transient_max: Duration::from_millis(10),
            max_attempts: 3,
        },
        RelayBackoffSettings {
            min_interval: Duration::ZERO,
            cooldown_base: Duration::from_millis(1),
            max_exponent: 2,
            hint_padding: Duration::ZERO,
            default_hint: Duration::from_millis(10),
            retry_delay: Duration::from_millis(5),
            max_attempts: 3,
            budget: Duration::from_secs(1),
        },
    )
}

pub fn fast_crawler_config() -> CrawlerConfig {
    CrawlerConfig {
        page_delay_min_secs: 0.0,
        page_delay_max_secs: 0.0,
        stale_page_limit: 2,
        monitor_page_limit: 3,
        max_consecutive_failures: 2,
    }
}

pub fn fast_worker_config() -> WorkerConfig {
    WorkerConfig {
        batch_size: 2,
        workers: 2,
        batch_cooldown_min_secs: 0.0,
        batch_cooldown_max_secs: 0.0,
        progress_interval: 1,
    }
}

pub fn memory_ledger() -> Arc<dyn LedgerStore> {
    Arc::new(SqliteLedger::new_in_memory().expect("in-memory ledger"))
}

pub fn http_fetcher() -> Arc<dyn PageFetcher> {
    Arc::new(HttpFetcher::new(&HttpConfig::default()).expect("http client"))
}

/// Context for a zoom-style site at `base_url`
pub async fn zoom_context(
    base_url: &str,
    fetcher: Arc<dyn PageFetcher>,
    ledger: Arc<dyn LedgerStore>,
    sink: Arc<dyn RelaySink>,
) -> Arc<SourceContext> {
    let extractor = LinkExtractor::new(SiteKind::Zoom, base_url).expect("base url");
    Arc::new(
        SourceContext::seeded(
            SOURCE,
            extractor,
            vec![CATEGORY.to_string()],
            fetcher,
            ledger,
            sink,
            Arc::new(fast_backoff()),
        )
        .await,
    )
}

/// Listing page with one `h3.entry-title` link per path
pub fn listing_html(paths: &[&str]) -> String {
    let articles: String = paths
        .iter()
        .map(|p| format!(r#"<article><h3 class="entry-title"><a href="{}">{}</a></h3></article>"#, p, p))
        .collect();
    format!(
        r#"<html><body>{}<a href="/category/films/page/2/">Next</a></body></html>"#,
        articles
    )
}

/// Detail page with a title and an optional download button
pub fn detail_html(title: &str, download: Option<&str>) -> String {
    let button = download
        .map(|href| format!(r#"<a class="download-button" href="{}">Download</a>"#, href))
        .unwrap_or_default();
    format!(
        r#"<html><body><h1 class="entry-title">{}</h1><div class="entry-content">{}</div></body></html>"#,
        title, button
    )
}

/// One upload as seen by [`RecordingSink`]
#[derive(Debug, Clone)]
pub struct RecordedUpload {
    pub filename: String,
    pub mime_type: String,
    pub caption: String,
    pub size: usize,
}

/// Sink that accepts everything and remembers it
#[derive(Default)]
pub struct RecordingSink {
    uploads: Mutex<Vec<RecordedUpload>>,
    messages: Mutex<Vec<String>>,
    /// Failures returned, in order, before uploads start succeeding
    failures: Mutex<Vec<SinkError>>,
    /// Time every upload takes before it answers
    delay: Option<Duration>,
}

impl RecordingSink {
    pub fn failing_with(failures: Vec<SinkError>) -> Self {
        Self {
            failures: Mutex::new(failures),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn uploads(&self) -> Vec<RecordedUpload> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl RelaySink for RecordingSink {
    async fn upload(&self, upload: &Upload<'_>) -> Result<ArtifactReceipt, SinkError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        {
            let mut failures = self.failures.lock().unwrap();
            if !failures.is_empty() {
                return Err(failures.remove(0));
            }
        }

        let mut uploads = self.uploads.lock().unwrap();
        uploads.push(RecordedUpload {
            filename: upload.filename.to_string(),
            mime_type: upload.mime_type.to_string(),
            caption: upload.caption.to_string(),
            size: upload.bytes.len(),
        });
        Ok(ArtifactReceipt {
            reference: format!("file-{}", uploads.len()),
            unique_id: None,
            size: upload.bytes.len() as u64,
            message_id: Some(uploads.len() as i64),
        })
    }

    async fn notify(&self, text: &str) -> Result<(), SinkError> {
        self.messages.lock().unwrap().push(text.to_string());
        Ok(())
    }
}
