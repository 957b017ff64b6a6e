//! In-memory view of what a source has already processed
//!
//! The ledger is the source of truth. A [`SeenCache`] is seeded from it at
//! startup and kept in sync on a best-effort basis; it exists so that the
//! crawler and the workers can skip known urls and detect duplicate content
//! without a ledger round-trip per check.

use crate::ledger::LedgerStore;
use std::collections::{HashMap, HashSet};
use tokio::sync::{watch, Mutex};

/// Outcome of trying to claim a content identity for relay
#[derive(Debug)]
pub enum IdentityClaim {
    /// Identity was unknown; the caller now owns it and must confirm or release it
    Reserved(IdentityReservation),

    /// Identity is already relayed
    Duplicate,
}

impl IdentityClaim {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate)
    }
}

/// Exclusive right to relay one identity
///
/// Hand it back through [`SeenCache::confirm_identity`] after a successful
/// relay or [`SeenCache::release_identity`] after a failed one. Dropping it
/// without either counts as a release.
#[derive(Debug)]
pub struct IdentityReservation {
    identity: String,
    settled: Option<watch::Sender<()>>,
}

impl IdentityReservation {
    pub fn identity(&self) -> &str {
        &self.identity
    }
}

#[derive(Debug, Default)]
struct SeenSets {
    urls: HashSet<String>,
    /// Identities known to be relayed
    identities: HashSet<String>,
    /// Identities reserved by a worker whose relay has not finished; the
    /// receiver closes when the reservation is confirmed, released or dropped
    in_flight: HashMap<String, watch::Receiver<()>>,
}

/// Read-through cache of processed urls and relayed content identities
///
/// All sets live behind one async mutex. Identity claims hold the lock
/// across the ledger fallback lookup, so test-then-insert is atomic for
/// every worker of this process. A claim that meets an in-flight
/// reservation waits for it to settle before answering.
#[derive(Debug)]
pub struct SeenCache {
    source: String,
    sets: Mutex<SeenSets>,
}

impl SeenCache {
    /// Creates an empty cache for `source`
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            sets: Mutex::new(SeenSets::default()),
        }
    }

    /// Creates a cache seeded from the ledger
    ///
    /// A ledger failure leaves the affected set empty; lookups then fall
    /// back to the ledger or to the idempotent writes downstream.
    pub async fn seed(source: impl Into<String>, ledger: &dyn LedgerStore) -> Self {
        let cache = Self::new(source);

        let urls = match ledger.successful_urls(&cache.source).await {
            Ok(urls) => urls,
            Err(e) => {
                tracing::warn!(source = %cache.source, error = %e, "Could not seed processed urls");
                HashSet::new()
            }
        };
        let identities = match ledger.known_identities(&cache.source).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!(source = %cache.source, error = %e, "Could not seed content identities");
                HashSet::new()
            }
        };

        tracing::info!(
            source = %cache.source,
            urls = urls.len(),
            identities = identities.len(),
            "Seeded cache from ledger"
        );

        {
            let mut sets = cache.sets.lock().await;
            sets.urls = urls;
            sets.identities = identities;
        }
        cache
    }

    /// Source this cache belongs to
    pub fn source(&self) -> &str {
        &self.source
    }

    pub async fn is_processed(&self, url: &str) -> bool {
        self.sets.lock().await.urls.contains(url)
    }

    pub async fn mark_processed(&self, url: &str) {
        self.sets.lock().await.urls.insert(url.to_string());
    }

    /// Atomically tests and reserves a content identity
    ///
    /// On a cache miss the ledger is consulted while the lock is held. A
    /// ledger error counts as a miss. If another worker holds the identity,
    /// this waits until that relay is confirmed (duplicate) or released
    /// (the claim is retried). An empty identity never matches and is never
    /// stored.
    pub async fn claim_identity(&self, identity: &str, ledger: &dyn LedgerStore) -> IdentityClaim {
        if identity.is_empty() {
            return IdentityClaim::Reserved(IdentityReservation {
                identity: String::new(),
                settled: None,
            });
        }

        loop {
            let mut pending = {
                let mut sets = self.sets.lock().await;
                if sets.identities.contains(identity) {
                    return IdentityClaim::Duplicate;
                }

                // A closed receiver means the holder went away without settling
                let holder = sets
                    .in_flight
                    .get(identity)
                    .filter(|rx| rx.has_changed().is_ok())
                    .cloned();
                match holder {
                    Some(rx) => rx,
                    None => return self.reserve(&mut sets, identity, ledger).await,
                }
            };

            tracing::debug!(identity = %identity, "Waiting on in-flight relay of same identity");
            // Nothing is ever sent; this resolves once the sender is dropped
            let _ = pending.changed().await;
        }
    }

    async fn reserve(
        &self,
        sets: &mut SeenSets,
        identity: &str,
        ledger: &dyn LedgerStore,
    ) -> IdentityClaim {
        sets.in_flight.remove(identity);

        let known = match ledger.identity_exists(&self.source, identity).await {
            Ok(known) => known,
            Err(e) => {
                tracing::warn!(
                    source = %self.source,
                    identity = %identity,
                    error = %e,
                    "Identity lookup failed, treating as new"
                );
                false
            }
        };
        if known {
            sets.identities.insert(identity.to_string());
            return IdentityClaim::Duplicate;
        }

        let (tx, rx) = watch::channel(());
        sets.in_flight.insert(identity.to_string(), rx);
        IdentityClaim::Reserved(IdentityReservation {
            identity: identity.to_string(),
            settled: Some(tx),
        })
    }

    /// Marks a reserved identity as relayed; waiting claims see a duplicate
    pub async fn confirm_identity(&self, reservation: IdentityReservation) {
        if reservation.identity.is_empty() {
            return;
        }
        let mut sets = self.sets.lock().await;
        sets.in_flight.remove(&reservation.identity);
        sets.identities.insert(reservation.identity.clone());
        drop(reservation);
    }

    /// Gives back a reservation after a failed relay so a waiting or later
    /// item may relay the identity itself
    pub async fn release_identity(&self, reservation: IdentityReservation) {
        if reservation.identity.is_empty() {
            return;
        }
        self.sets.lock().await.in_flight.remove(&reservation.identity);
        drop(reservation);
    }

    /// Returns (processed urls, identities) currently cached
    pub async fn sizes(&self) -> (usize, usize) {
        let sets = self.sets.lock().await;
        (sets.urls.len(), sets.identities.len())
    }
}
