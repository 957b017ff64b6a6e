//! Discovery side of the pipeline
//!
//! This module contains:
//! - The [`PageFetcher`] seam and its reqwest implementation
//! - Per-site HTML extraction ([`LinkExtractor`])
//! - The resumable listing [`Crawler`]

mod coordinator;
mod extractor;
mod fetcher;

pub use coordinator::{CrawlReport, Crawler};
pub use extractor::{LinkExtractor, SiteKind, UNKNOWN_TITLE};
pub use fetcher::{
    build_http_client, is_challenge_page, parse_retry_after, FetchError, FetchResponse,
    HttpFetcher, PageFetcher, DEFAULT_USER_AGENTS,
};
