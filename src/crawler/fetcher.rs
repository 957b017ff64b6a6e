//! HTTP fetcher implementation
//!
//! This module handles all page and artifact downloads, including:
//! - Building HTTP clients with browser-like headers and fixed timeouts
//! - Rotating user agents between requests
//! - Classifying responses into not-found, access-denied, rate-limited and
//!   transient failures so the backoff controller can react to each

use crate::backoff::FetchOutcome;
use crate::config::HttpConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{redirect::Policy, Client, StatusCode};
use std::borrow::Cow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Markers of an anti-bot interstitial served in place of the real page
const CHALLENGE_MARKERS: &[&str] = &[
    "<title>just a moment",
    "checking your browser",
    "cf-browser-verification",
    "cf_chl_opt",
];

/// Browser user agents rotated across requests
pub const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
];

/// Classified fetch failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("access denied (HTTP {status})")]
    Blocked { status: u16 },

    #[error("not found (HTTP {status})")]
    NotFound { status: u16 },

    #[error("rate limited (HTTP 429)")]
    RateLimited { retry_after: Option<Duration> },

    #[error("unexpected HTTP status {status}")]
    Status { status: u16 },

    #[error("request timeout")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),
}

impl FetchError {
    /// Maps the failure onto the fetch backoff domain
    pub fn outcome(&self) -> FetchOutcome {
        match self {
            Self::Blocked { .. } => FetchOutcome::Denied,
            Self::NotFound { .. } => FetchOutcome::NotFound,
            Self::RateLimited { retry_after } => FetchOutcome::RateLimited {
                retry_after: *retry_after,
            },
            Self::Status { .. } | Self::Timeout | Self::Network(_) => FetchOutcome::Transient,
        }
    }

    /// Returns true if retrying can never succeed
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Raw response as returned by a [`PageFetcher`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    /// Final URL after redirects
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    /// Parsed `Retry-After` header
    pub retry_after: Option<Duration>,
    pub body: Vec<u8>,
}

impl FetchResponse {
    /// Convenience constructor for a 200 response
    pub fn ok(url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self::with_status(url, 200, body)
    }

    pub fn with_status(url: impl Into<String>, status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            url: url.into(),
            status,
            content_type: None,
            retry_after: None,
            body: body.into(),
        }
    }

    /// Body decoded as UTF-8, invalid sequences replaced
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Turns non-success responses into a classified [`FetchError`]
    ///
    /// | Condition | Result |
    /// |-----------|--------|
    /// | 404, 410 | NotFound |
    /// | 429 | RateLimited with `Retry-After` |
    /// | 403, 503, or any challenge page | Blocked |
    /// | other non-2xx | Status (transient) |
    pub fn classify(self) -> Result<Self, FetchError> {
        let status = self.status;
        match status {
            404 | 410 => Err(FetchError::NotFound { status }),
            429 => Err(FetchError::RateLimited {
                retry_after: self.retry_after,
            }),
            403 | 503 => Err(FetchError::Blocked { status }),
            _ if is_challenge_page(&self.body) => Err(FetchError::Blocked { status }),
            200..=299 => Ok(self),
            _ => Err(FetchError::Status { status }),
        }
    }
}

/// Returns true if the body is an anti-bot interstitial
pub fn is_challenge_page(body: &[u8]) -> bool {
    let head = &body[..body.len().min(8192)];
    let head = String::from_utf8_lossy(head).to_lowercase();
    CHALLENGE_MARKERS.iter().any(|marker| head.contains(marker))
}

/// Parses a `Retry-After` value: delay seconds or an HTTP date
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?;
    let delta = at.with_timezone(&Utc) - Utc::now();
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}

/// Source of page and artifact bytes
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetches `url`, returning the response whatever its status
    ///
    /// Only transport failures (timeout, connection, body read) are errors
    /// here; status classification happens in [`FetchResponse::classify`].
    async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError>;
}

/// Builds an HTTP client with browser-like defaults
///
/// # Arguments
///
/// * `config` - Timeouts for every request
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(config: &HttpConfig) -> Result<Client, reqwest::Error> {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9,si;q=0.8"));

    Client::builder()
        .default_headers(headers)
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .redirect(Policy::limited(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// reqwest-backed fetcher with user-agent rotation
pub struct HttpFetcher {
    client: Client,
    user_agents: Vec<String>,
    next_agent: AtomicUsize,
}

impl HttpFetcher {
    pub fn new(config: &HttpConfig) -> Result<Self, reqwest::Error> {
        let user_agents = if config.user_agents.is_empty() {
            DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect()
        } else {
            config.user_agents.clone()
        };

        Ok(Self {
            client: build_http_client(config)?,
            user_agents,
            next_agent: AtomicUsize::new(0),
        })
    }

    fn user_agent(&self) -> &str {
        let index = self.next_agent.fetch_add(1, Ordering::Relaxed);
        &self.user_agents[index % self.user_agents.len()]
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, self.user_agent())
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());
        let retry_after = if status == StatusCode::TOO_MANY_REQUESTS {
            response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after)
        } else {
            None
        };

        let body = response
            .bytes()
            .await
            .map_err(classify_transport_error)?
            .to_vec();

        tracing::trace!(url = %url, status = status.as_u16(), bytes = body.len(), "Fetched");

        Ok(FetchResponse {
            url: final_url,
            status: status.as_u16(),
            content_type,
            retry_after,
            body,
        })
    }
}

fn classify_transport_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else if e.is_connect() {
        FetchError::Network(format!("connection failed: {}", e))
    } else {
        FetchError::Network(e.to_string())
    }
}
