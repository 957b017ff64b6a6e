//! Relay sink abstraction
//!
//! A relay sink durably stores a downloaded artifact and hands back a
//! reference to it. The only implementation shipped here talks to the
//! Telegram bot API; tests substitute in-memory sinks.

mod telegram;

pub use telegram::{TelegramSink, MAX_CAPTION_CHARS, TELEGRAM_API_BASE};

use crate::backoff::RelayOutcome;
use crate::identity::ReleaseInfo;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// One artifact ready to be relayed
#[derive(Debug, Clone, Copy)]
pub struct Upload<'a> {
    pub bytes: &'a [u8],
    pub filename: &'a str,
    pub mime_type: &'a str,
    pub caption: &'a str,
}

/// What the sink returned for a stored artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactReceipt {
    /// Sink-assigned reference used to fetch the artifact again
    pub reference: String,
    pub unique_id: Option<String>,
    pub size: u64,
    pub message_id: Option<i64>,
}

/// Relay failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SinkError {
    #[error("rate limited by sink (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("rejected by sink (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("sink transport error: {0}")]
    Transport(String),

    #[error("unexpected sink response: {0}")]
    Decode(String),
}

impl SinkError {
    /// Maps the failure onto the relay backoff domain
    pub fn outcome(&self) -> RelayOutcome {
        match self {
            Self::RateLimited { retry_after } => RelayOutcome::Throttled {
                retry_after: *retry_after,
            },
            _ => RelayOutcome::Failed,
        }
    }

    /// Rejections are final; everything else may succeed on retry
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }
}

/// Durable destination for artifacts
#[async_trait]
pub trait RelaySink: Send + Sync {
    /// Stores one artifact
    async fn upload(&self, upload: &Upload<'_>) -> Result<ArtifactReceipt, SinkError>;

    /// Sends a plain status message, when the sink supports it
    async fn notify(&self, _text: &str) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Sink for modes that never relay; uploads are rejected, notifications dropped
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledSink;

#[async_trait]
impl RelaySink for DisabledSink {
    async fn upload(&self, upload: &Upload<'_>) -> Result<ArtifactReceipt, SinkError> {
        Err(SinkError::Rejected {
            status: 0,
            message: format!("relay disabled, not uploading {}", upload.filename),
        })
    }
}

const CAPTION_MARKUP: &str = "<b></b>";

/// Builds the caption attached to a relayed artifact
///
/// The result never exceeds [`MAX_CAPTION_CHARS`]. An overlong title is cut
/// before escaping, so entities and tags stay whole; the link line is
/// dropped first if even an empty title would not fit.
pub fn build_caption(title: &str, release: &ReleaseInfo, source: &str, url: &str) -> String {
    let mut tail = String::new();
    if let Some(year) = release.year {
        tail.push_str(&format!("\nYear: {}", year));
    }
    if let (Some(season), Some(episode)) = (release.season, release.episode) {
        tail.push_str(&format!("\nEpisode: S{:02}E{:02}", season, episode));
    }
    tail.push_str(&format!("\n\nSource: {}", html_escape::encode_text(source)));

    let link = format!("\nLink: {}", html_escape::encode_text(url));
    let fixed = CAPTION_MARKUP.len() + tail.chars().count();
    if fixed + link.chars().count() < MAX_CAPTION_CHARS {
        tail.push_str(&link);
    }

    let budget = MAX_CAPTION_CHARS.saturating_sub(CAPTION_MARKUP.len() + tail.chars().count());
    format!("<b>{}</b>{}", escape_within(title, budget), tail)
}

/// Escapes as many leading characters of `text` as fit in `budget`
/// escaped characters, marking a cut with an ellipsis
fn escape_within(text: &str, budget: usize) -> String {
    let escaped = html_escape::encode_text(text);
    if escaped.chars().count() <= budget {
        return escaped.into_owned();
    }

    let budget = budget.saturating_sub(1);
    let mut out = String::new();
    let mut used = 0;
    let mut buf = [0u8; 4];
    for c in text.chars() {
        let piece = html_escape::encode_text(c.encode_utf8(&mut buf));
        let width = piece.chars().count();
        if used + width > budget {
            break;
        }
        out.push_str(&piece);
        used += width;
    }
    out.push('…');
    out
}
