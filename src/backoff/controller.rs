//! Async side of the backoff policies
//!
//! The controller owns the mutable policy state for one source and applies
//! the waits the pure policies compute. Waits are stored as a shared
//! "resume at" instant, so every caller of the same source respects them,
//! not only the call that observed the failure.

use super::policy::{
    FetchBackoffSettings, FetchOutcome, FetchPolicy, RelayBackoffSettings, RelayOutcome,
    RelayPolicy,
};
use crate::crawler::{FetchError, FetchResponse, PageFetcher};
use crate::relay::{ArtifactReceipt, RelaySink, SinkError, Upload};
use rand::Rng;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct FetchState {
    policy: FetchPolicy,
    resume_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct RelayState {
    policy: RelayPolicy,
    next_slot: Option<Instant>,
}

/// Per-source retry controller for fetches and uploads
#[derive(Debug)]
pub struct BackoffController {
    fetch_settings: FetchBackoffSettings,
    relay_settings: RelayBackoffSettings,
    fetch_state: Mutex<FetchState>,
    relay_state: Mutex<RelayState>,
}

impl Default for BackoffController {
    fn default() -> Self {
        Self::new(FetchBackoffSettings::default(), RelayBackoffSettings::default())
    }
}

impl BackoffController {
    pub fn new(fetch_settings: FetchBackoffSettings, relay_settings: RelayBackoffSettings) -> Self {
        Self {
            fetch_settings,
            relay_settings,
            fetch_state: Mutex::new(FetchState::default()),
            relay_state: Mutex::new(RelayState::default()),
        }
    }

    /// Current consecutive denial count of the fetch domain
    pub fn consecutive_denials(&self) -> u32 {
        lock(&self.fetch_state).policy.consecutive_denials
    }

    /// Current consecutive throttle count of the relay domain
    pub fn consecutive_throttles(&self) -> u32 {
        lock(&self.relay_state).policy.consecutive_throttles
    }

    /// Fetches `url` with retries
    ///
    /// Not-found responses return at once. Every other failure is retried
    /// up to `max-attempts` times, waiting as the fetch policy dictates.
    /// The wait computed for the final failure is still recorded, so the
    /// next fetch against this source honors it.
    pub async fn fetch(
        &self,
        fetcher: &dyn PageFetcher,
        url: &str,
    ) -> Result<FetchResponse, FetchError> {
        let max_attempts = self.fetch_settings.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.wait_for_fetch_slot().await;

            let error = match fetcher.fetch(url).await.and_then(FetchResponse::classify) {
                Ok(response) => {
                    self.record_fetch(&FetchOutcome::Success);
                    return Ok(response);
                }
                Err(e) => e,
            };

            if error.is_terminal() {
                tracing::debug!(url = %url, error = %error, "Fetch failed permanently");
                return Err(error);
            }

            let wait = self.record_fetch(&error.outcome());
            if attempt >= max_attempts {
                tracing::warn!(
                    url = %url,
                    attempts = attempt,
                    error = %error,
                    "Giving up on fetch"
                );
                return Err(error);
            }

            tracing::info!(
                url = %url,
                attempt = attempt,
                wait_secs = wait.as_secs_f64(),
                error = %error,
                "Fetch failed, backing off"
            );
        }
    }

    /// Uploads an artifact with retries
    ///
    /// Throttling is retried until the next wait would exceed the relay
    /// budget. Other retryable failures are retried `max-attempts` times.
    /// Rejections are returned immediately.
    pub async fn relay(
        &self,
        sink: &dyn RelaySink,
        upload: &Upload<'_>,
    ) -> Result<ArtifactReceipt, SinkError> {
        let started = Instant::now();
        let mut failures = 0;

        loop {
            self.wait_for_relay_slot().await;

            let error = match sink.upload(upload).await {
                Ok(receipt) => {
                    self.record_relay(&RelayOutcome::Success, 0);
                    return Ok(receipt);
                }
                Err(e) => e,
            };

            if !error.is_retryable() {
                tracing::warn!(filename = %upload.filename, error = %error, "Upload rejected");
                return Err(error);
            }

            let outcome = error.outcome();
            let wait = match outcome {
                RelayOutcome::Throttled { .. } => {
                    let wait = self.record_relay(&outcome, 0);
                    if started.elapsed() + wait > self.relay_settings.budget {
                        tracing::warn!(
                            filename = %upload.filename,
                            waited_secs = started.elapsed().as_secs(),
                            "Relay budget exhausted while throttled"
                        );
                        return Err(error);
                    }
                    wait
                }
                _ => {
                    failures += 1;
                    if failures >= self.relay_settings.max_attempts.max(1) {
                        tracing::warn!(
                            filename = %upload.filename,
                            attempts = failures,
                            error = %error,
                            "Giving up on upload"
                        );
                        return Err(error);
                    }
                    self.record_relay(&outcome, failures)
                }
            };

            tracing::info!(
                filename = %upload.filename,
                wait_secs = wait.as_secs_f64(),
                error = %error,
                "Upload failed, retrying"
            );
            tokio::time::sleep(wait).await;
        }
    }

    async fn wait_for_fetch_slot(&self) {
        let resume_at = lock(&self.fetch_state).resume_at;
        if let Some(at) = resume_at {
            if at > Instant::now() {
                tokio::time::sleep_until(at).await;
            }
        }
    }

    fn record_fetch(&self, outcome: &FetchOutcome) -> Duration {
        let jitter = unit_jitter();
        let mut state = lock(&self.fetch_state);
        let (wait, next) = state.policy.next(&self.fetch_settings, outcome, jitter);
        state.policy = next;

        if !wait.is_zero() {
            let at = Instant::now() + wait;
            state.resume_at = Some(state.resume_at.map_or(at, |current| current.max(at)));
        }
        wait
    }

    /// Reserves the next upload slot and sleeps until it opens
    async fn wait_for_relay_slot(&self) {
        let slot = {
            let mut state = lock(&self.relay_state);
            let now = Instant::now();
            let slot = state.next_slot.map_or(now, |next| next.max(now));
            let spacing = self.relay_settings.min_interval + state.policy.cooldown(&self.relay_settings);
            state.next_slot = Some(slot + spacing);
            slot
        };

        if slot > Instant::now() {
            tokio::time::sleep_until(slot).await;
        }
    }

    fn record_relay(&self, outcome: &RelayOutcome, attempt: u32) -> Duration {
        let mut state = lock(&self.relay_state);
        let (wait, next) = state.policy.next(&self.relay_settings, outcome, attempt);
        state.policy = next;
        wait
    }
}

fn unit_jitter() -> f64 {
    rand::rng().random::<f64>()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
