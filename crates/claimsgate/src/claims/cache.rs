//! Extra claims cache keyed by token hash
//!
//! Entries are keyed by the SHA-256 of the raw token, never by subject, so two
//! tokens for the same user never share cached claims. An entry is served
//! until `stored_at + ttl`; a read at or after that instant is a miss (lazy
//! expiry). Expired entries are reclaimed by overwrite, [`ClaimsCache::purge_expired`]
//! or the optional background sweeper.
//!
//! Concurrent misses for the same token coalesce into one computation whose
//! outcome every waiter shares. Failures are never stored. A computation that
//! overlaps an [`invalidate`](ClaimsCache::invalidate) or
//! [`clear`](ClaimsCache::clear) still answers its waiters, but its result is
//! not stored.

use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use dashmap::DashMap;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::error::{AuthError, AuthResult};
use crate::flight::SingleFlight;

const FINGERPRINT_LEN: usize = 12;

/// Cache key for a raw token: base64url(SHA-256(token))
pub fn token_hash(raw_token: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(raw_token.as_bytes()))
}

/// Short, non-reversible token identifier for log correlation
pub(crate) fn fingerprint(raw_token: &str) -> String {
    let mut hash = token_hash(raw_token);
    hash.truncate(FINGERPRINT_LEN);
    hash
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

type Entries<V> = DashMap<String, CacheEntry<V>>;

/// TTL-bounded store of resolved extra claims
///
/// Capacity is unbounded.
pub struct ClaimsCache<V> {
    entries: Arc<Entries<V>>,
    /// Bumped by every invalidation; computed results are only stored if it
    /// has not moved since the computation started
    generation: Arc<Mutex<u64>>,
    in_flight: SingleFlight<String, V>,
}

impl<V> std::fmt::Debug for ClaimsCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimsCache")
            .field("entries", &self.entries.len())
            .field("generation", &*self.generation.lock())
            .field("in_flight", &self.in_flight)
            .finish()
    }
}

impl<V> Default for ClaimsCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> ClaimsCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            generation: Arc::new(Mutex::new(0)),
            in_flight: SingleFlight::new(AuthError::UserInfoLookup),
        }
    }

    /// Cached claims for `raw_token`, if present and unexpired
    pub fn get(&self, raw_token: &str) -> Option<V> {
        self.lookup(&token_hash(raw_token))
    }

    fn lookup(&self, key: &str) -> Option<V> {
        let entry = self.entries.get(key)?;
        (Instant::now() < entry.expires_at).then(|| entry.value.clone())
    }

    /// Cached claims for `raw_token`, computing and storing them on a miss
    ///
    /// Concurrent misses for the same token run `compute` once. The
    /// computation runs on its own task under `timeout`, so a cancelled
    /// caller does not cancel it for the others.
    ///
    /// # Errors
    ///
    /// Returns the error `compute` produced, or [`AuthError::UserInfoLookup`]
    /// if it did not finish within `timeout`. Errors are not cached.
    pub async fn get_or_compute<F, Fut>(
        &self,
        raw_token: &str,
        ttl: Duration,
        timeout: Duration,
        compute: F,
    ) -> AuthResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AuthResult<V>> + Send + 'static,
    {
        let key = token_hash(raw_token);
        let token = &key[..FINGERPRINT_LEN];

        if let Some(value) = self.lookup(&key) {
            debug!(token = %token, "Claims cache hit");
            return Ok(value);
        }
        debug!(token = %token, "Claims cache miss");

        let entries = Arc::clone(&self.entries);
        let generation = Arc::clone(&self.generation);
        let store_key = key.clone();
        let log_token = token.to_string();
        let operation = move || {
            let started_at = *generation.lock();
            let computation = compute();
            async move {
                let value = tokio::time::timeout(timeout, computation)
                    .await
                    .map_err(|_| {
                        warn!(token = %log_token, ?timeout, "Claims lookup timed out");
                        AuthError::UserInfoLookup(format!(
                            "claims lookup timed out after {timeout:?}"
                        ))
                    })??;

                let current = generation.lock();
                if *current == started_at {
                    entries.insert(
                        store_key,
                        CacheEntry {
                            value: value.clone(),
                            expires_at: Instant::now() + ttl,
                        },
                    );
                } else {
                    debug!(token = %log_token, "Cache invalidated during lookup, result not stored");
                }
                drop(current);
                Ok(value)
            }
        };

        self.in_flight
            .run(key.clone(), || self.lookup(&key), operation)
            .await
    }

    /// Remove the entry for `raw_token`, e.g. after revocation
    ///
    /// Returns whether an entry was present. A lookup already running for
    /// the token is not stored when it completes.
    pub fn invalidate(&self, raw_token: &str) -> bool {
        let mut generation = self.generation.lock();
        *generation = generation.wrapping_add(1);
        self.entries.remove(&token_hash(raw_token)).is_some()
    }

    /// Remove every entry, including results of lookups still running
    pub fn clear(&self) {
        let mut generation = self.generation.lock();
        *generation = generation.wrapping_add(1);
        self.entries.clear();
    }

    /// Remove expired entries, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        purge(&self.entries, Instant::now())
    }

    /// Number of stored entries, including expired ones not yet reclaimed
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Spawn a task that purges expired entries every `interval`
    ///
    /// The task holds only a weak reference and exits once the cache is dropped.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let entries: Weak<Entries<V>> = Arc::downgrade(&self.entries);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(entries) = entries.upgrade() else {
                    debug!("Claims cache dropped, stopping sweeper");
                    break;
                };
                let removed = purge(&entries, Instant::now());
                if removed > 0 {
                    debug!(removed, remaining = entries.len(), "Swept expired claims");
                }
            }
        })
    }
}

fn purge<V>(entries: &Entries<V>, now: Instant) -> usize {
    let before = entries.len();
    entries.retain(|_, entry| now < entry.expires_at);
    before.saturating_sub(entries.len())
}
