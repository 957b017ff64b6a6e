//! Per-item ingestion
//!
//! One claimed item goes through: known check, detail page fetch, artifact
//! location, download (with at most one intermediate page), identity
//! derivation, identity claim, relay, ledger commit. Every failure is caught
//! here and turned into a failed status; nothing escapes to the pool.

use crate::crawler::FetchError;
use crate::identity::{
    artifact_filename, extract_release_info, looks_like_html, normalize_name, ArtifactKind,
};
use crate::ledger::{truncate_chars, ContentIdentity, ProcessedRecord, MAX_SOURCE_URL};
use crate::relay::{build_caption, SinkError, Upload};
use crate::source::SourceContext;
use crate::state::{IdentityClaim, ItemStatus};
use chrono::Utc;
use thiserror::Error;

/// Why an item failed
#[derive(Debug, Error)]
pub enum ItemFailure {
    #[error("foreign url")]
    ForeignUrl,

    #[error("detail page fetch failed: {0}")]
    DetailPage(#[source] FetchError),

    #[error("no artifact link")]
    MissingArtifact { title: String },

    #[error("artifact download failed: {source}")]
    Download {
        title: String,
        #[source]
        source: FetchError,
    },

    #[error("empty artifact")]
    EmptyArtifact { title: String },

    #[error("relay failed: {source}")]
    Relay {
        title: String,
        #[source]
        source: SinkError,
    },

    #[error("worker task aborted")]
    Aborted,
}

impl ItemFailure {
    /// Title known at the point of failure, empty if none
    pub fn title(&self) -> &str {
        match self {
            Self::ForeignUrl | Self::DetailPage(_) | Self::Aborted => "",
            Self::MissingArtifact { title }
            | Self::Download { title, .. }
            | Self::EmptyArtifact { title }
            | Self::Relay { title, .. } => title,
        }
    }
}

/// How a successful item ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Url was processed by an earlier run
    AlreadyProcessed,
    /// Content was already relayed under another url
    Duplicate,
    Relayed,
}

/// Processes one url end to end; returns true on success
///
/// The item is expected to be claimed (status processing). Its terminal
/// status, processed record and the run counters are all updated here.
pub async fn process_one(ctx: &SourceContext, url: &str) -> bool {
    match ingest(ctx, url).await {
        Ok(outcome) => {
            match outcome {
                ItemOutcome::AlreadyProcessed => ctx.stats.record_skipped(),
                ItemOutcome::Duplicate => ctx.stats.record_duplicate(),
                ItemOutcome::Relayed => ctx.stats.record_relayed(),
            }
            true
        }
        Err(failure) => {
            fail_item(ctx, url, &failure).await;
            false
        }
    }
}

/// Records `failure` as the terminal outcome of `url`
pub(super) async fn fail_item(ctx: &SourceContext, url: &str, failure: &ItemFailure) {
    tracing::warn!(url = %url, error = %failure, "Item failed");
    record_failure(ctx, url, failure).await;
    ctx.stats.record_failure();
}

async fn ingest(ctx: &SourceContext, url: &str) -> Result<ItemOutcome, ItemFailure> {
    if ctx.cache.is_processed(url).await {
        tracing::debug!(url = %url, "Already processed");
        set_status(ctx, url, ItemStatus::Completed).await;
        return Ok(ItemOutcome::AlreadyProcessed);
    }

    if !ctx.extractor.is_same_site(url) {
        return Err(ItemFailure::ForeignUrl);
    }

    let page = ctx
        .backoff
        .fetch(ctx.fetcher.as_ref(), url)
        .await
        .map_err(ItemFailure::DetailPage)?;
    let html = page.text();
    let title = ctx.extractor.extract_title(&html);
    let location = ctx
        .extractor
        .extract_artifact_location(&html)
        .ok_or_else(|| ItemFailure::MissingArtifact {
            title: title.clone(),
        })?;

    let bytes = download(ctx, &location, &title).await?;
    let kind = ArtifactKind::sniff(&bytes);
    let filename = artifact_filename(&title, kind);
    let identity = normalize_name(&filename);

    let reservation = match ctx.cache.claim_identity(&identity, ctx.ledger.as_ref()).await {
        IdentityClaim::Reserved(reservation) => reservation,
        IdentityClaim::Duplicate => {
            tracing::info!(url = %url, identity = %identity, "Duplicate content, skipping relay");
            commit_success(ctx, url, &title).await;
            return Ok(ItemOutcome::Duplicate);
        }
    };

    let release = extract_release_info(&filename);
    let caption = build_caption(&title, &release, &ctx.name, url);
    let upload = Upload {
        bytes: &bytes,
        filename: &filename,
        mime_type: kind.mime_type(),
        caption: &caption,
    };

    let receipt = match ctx.backoff.relay(ctx.sink.as_ref(), &upload).await {
        Ok(receipt) => receipt,
        Err(source) => {
            ctx.cache.release_identity(reservation).await;
            return Err(ItemFailure::Relay { title, source });
        }
    };

    tracing::info!(
        url = %url,
        filename = %filename,
        reference = %receipt.reference,
        "Relayed"
    );

    if !identity.is_empty() {
        let record = ContentIdentity {
            normalized_name: identity.clone(),
            artifact_reference: receipt.reference,
            size: receipt.size,
            title: title.clone(),
            filename,
            source_url: truncate_chars(url, MAX_SOURCE_URL),
            source: ctx.name.clone(),
            uploaded_at: Utc::now().to_rfc3339(),
        };
        match ctx.ledger.record_identity(&record).await {
            Ok(true) => {}
            Ok(false) => tracing::debug!(identity = %identity, "Identity already recorded"),
            Err(e) => tracing::warn!(
                url = %url,
                identity = %identity,
                error = %e,
                "Identity not recorded after relay (reconciliation gap)"
            ),
        }
    }
    ctx.cache.confirm_identity(reservation).await;

    commit_success(ctx, url, &title).await;
    Ok(ItemOutcome::Relayed)
}

/// Downloads the artifact, following one intermediate page if needed
async fn download(ctx: &SourceContext, location: &str, title: &str) -> Result<Vec<u8>, ItemFailure> {
    let fetch = move |url: String| async move {
        ctx.backoff
            .fetch(ctx.fetcher.as_ref(), &url)
            .await
            .map_err(|source| ItemFailure::Download {
                title: title.to_string(),
                source,
            })
    };

    let mut response = fetch(location.to_string()).await?;

    if looks_like_html(&response.body) {
        let file_link = ctx
            .extractor
            .extract_file_link(&response.text())
            .ok_or_else(|| ItemFailure::MissingArtifact {
                title: title.to_string(),
            })?;
        tracing::debug!(from = %location, to = %file_link, "Following download page");

        response = fetch(file_link).await?;
        if looks_like_html(&response.body) {
            return Err(ItemFailure::MissingArtifact {
                title: title.to_string(),
            });
        }
    }

    if response.body.is_empty() {
        return Err(ItemFailure::EmptyArtifact {
            title: title.to_string(),
        });
    }
    Ok(response.body)
}

/// Success record, completed status, cache entry
///
/// Ledger errors are logged and otherwise ignored: the relay already
/// happened, so the item must not be retried.
async fn commit_success(ctx: &SourceContext, url: &str, title: &str) {
    let record = ProcessedRecord::success(url, &ctx.name, title);
    if let Err(e) = ctx.ledger.record_processed(&record).await {
        tracing::warn!(url = %url, error = %e, "Success not recorded (reconciliation gap)");
    }
    set_status(ctx, url, ItemStatus::Completed).await;
    ctx.cache.mark_processed(url).await;
}

async fn record_failure(ctx: &SourceContext, url: &str, failure: &ItemFailure) {
    let record = ProcessedRecord::failure(url, &ctx.name, failure.title(), failure.to_string());
    if let Err(e) = ctx.ledger.record_processed(&record).await {
        tracing::warn!(url = %url, error = %e, "Failed to record failure");
    }
    set_status(ctx, url, ItemStatus::Failed).await;
}

async fn set_status(ctx: &SourceContext, url: &str, status: ItemStatus) {
    match ctx.ledger.set_status(url, status).await {
        Ok(true) => {}
        Ok(false) => tracing::debug!(url = %url, status = %status, "Status transition not applied"),
        Err(e) => tracing::warn!(
            url = %url,
            status = %status,
            error = %e,
            "Status not written (reconciliation gap)"
        ),
    }
}
