//! Signing key retrieval with rotation handling
//!
//! The store keeps the last downloaded JSON Web Key Set and refetches it when:
//!
//! - **TTL expiry**: the set is older than its configured time to live
//! - **Unknown `kid`**: a token names a key the set does not contain (key
//!   rotation), subject to a minimum refresh interval
//!
//! Refreshes are coalesced: however many requests need one at the same time,
//! exactly one download happens and every waiter observes its outcome.
//! Failed downloads are never cached, so the next request retries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::jwk::{Jwk, JwkSet, KeyAlgorithm, PublicKeyUse};
use jsonwebtoken::{Algorithm, DecodingKey};
use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{AuthError, AuthResult};
use crate::flight::SingleFlight;

/// Public key material for one `kid`
#[derive(Clone)]
pub struct SigningKey {
    kid: String,
    algorithm: Option<Algorithm>,
    key: DecodingKey,
}

// DecodingKey holds raw key material and has no useful Debug output
impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    /// Convert a JWK into a signing key
    ///
    /// Returns `None` for keys that cannot verify signatures: no `kid`,
    /// encryption-only use or algorithm, or unusable key material.
    fn from_jwk(jwk: &Jwk) -> Option<Self> {
        let kid = jwk.common.key_id.clone()?;

        if matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)) {
            debug!(kid = %kid, "Skipping encryption key in JWKS");
            return None;
        }

        let algorithm = match jwk.common.key_algorithm {
            Some(declared) => Some(signing_algorithm(declared).or_else(|| {
                debug!(kid = %kid, algorithm = ?declared, "Skipping non-signing key in JWKS");
                None
            })?),
            None => None,
        };

        match DecodingKey::from_jwk(jwk) {
            Ok(key) => Some(Self {
                kid,
                algorithm,
                key,
            }),
            Err(e) => {
                warn!(kid = %kid, error = %e, "Skipping unusable key in JWKS");
                None
            }
        }
    }

    /// Key identifier
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Algorithm the key is published for, when the JWK declares one
    pub fn algorithm(&self) -> Option<Algorithm> {
        self.algorithm
    }

    /// Whether the key may verify a token signed with `alg`
    pub fn supports(&self, alg: Algorithm) -> bool {
        self.algorithm.is_none_or(|declared| declared == alg)
    }

    pub(crate) fn decoding_key(&self) -> &DecodingKey {
        &self.key
    }
}

/// Map a JWK `alg` to a JWS signing algorithm
fn signing_algorithm(alg: KeyAlgorithm) -> Option<Algorithm> {
    match alg {
        KeyAlgorithm::HS256 => Some(Algorithm::HS256),
        KeyAlgorithm::HS384 => Some(Algorithm::HS384),
        KeyAlgorithm::HS512 => Some(Algorithm::HS512),
        KeyAlgorithm::ES256 => Some(Algorithm::ES256),
        KeyAlgorithm::ES384 => Some(Algorithm::ES384),
        KeyAlgorithm::RS256 => Some(Algorithm::RS256),
        KeyAlgorithm::RS384 => Some(Algorithm::RS384),
        KeyAlgorithm::RS512 => Some(Algorithm::RS512),
        KeyAlgorithm::PS256 => Some(Algorithm::PS256),
        KeyAlgorithm::PS384 => Some(Algorithm::PS384),
        KeyAlgorithm::PS512 => Some(Algorithm::PS512),
        KeyAlgorithm::EdDSA => Some(Algorithm::EdDSA),
        _ => None,
    }
}

/// Signing keys indexed by `kid`, replaced wholesale on refresh
#[derive(Debug, Clone, Default)]
pub struct SigningKeySet {
    keys: HashMap<String, Arc<SigningKey>>,
}

impl SigningKeySet {
    /// Build a key set from a downloaded JWKS, skipping keys that cannot verify signatures
    pub fn from_jwks(jwks: &JwkSet) -> Self {
        let keys = jwks
            .keys
            .iter()
            .filter_map(SigningKey::from_jwk)
            .map(|key| (key.kid.clone(), Arc::new(key)))
            .collect();
        Self { keys }
    }

    /// Look up a key by identifier
    pub fn get(&self, kid: &str) -> Option<Arc<SigningKey>> {
        self.keys.get(kid).cloned()
    }

    /// Number of usable keys
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the set has no usable keys
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Identifiers of all usable keys
    pub fn kids(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }
}

/// Key set snapshot with download metadata
#[derive(Debug, Clone)]
struct CachedKeySet {
    set: Arc<SigningKeySet>,
    fetched_at: Instant,
    ttl: Duration,
}

impl CachedKeySet {
    fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.fetched_at) < self.ttl
    }

    fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.fetched_at)
    }
}

/// Signing key store backed by a remote JWKS endpoint
///
/// Long lived: create one at startup and share it (via `Arc`) with every
/// request.
pub struct SigningKeyStore {
    /// JWKS endpoint URL
    jwks_uri: String,
    /// HTTP client
    http_client: reqwest::Client,
    /// Last successfully downloaded key set
    current: Arc<RwLock<Option<CachedKeySet>>>,
    /// Coalesces concurrent refreshes
    refresh_flight: SingleFlight<(), Arc<SigningKeySet>>,
    /// Key set TTL (default: 10 minutes)
    cache_ttl: Duration,
    /// Minimum key set age before an unknown `kid` forces a refresh
    min_refresh_interval: Duration,
    /// Upper bound on a single coalesced refresh
    refresh_timeout: Duration,
}

impl std::fmt::Debug for SigningKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeyStore")
            .field("jwks_uri", &self.jwks_uri)
            .field("cache_ttl", &self.cache_ttl)
            .field("min_refresh_interval", &self.min_refresh_interval)
            .field("refresh_timeout", &self.refresh_timeout)
            .field("cached", &self.current.read().is_some())
            .finish()
    }
}

impl SigningKeyStore {
    /// Create a store for `jwks_uri` with default settings
    ///
    /// # Default Settings
    ///
    /// - Cache TTL: 10 minutes
    /// - Min refresh interval: 5 seconds
    /// - Refresh timeout: 10 seconds
    pub fn new(jwks_uri: impl Into<String>, http_client: reqwest::Client) -> Self {
        Self {
            jwks_uri: jwks_uri.into(),
            http_client,
            current: Arc::new(RwLock::new(None)),
            refresh_flight: SingleFlight::new(AuthError::KeyRetrieval),
            cache_ttl: Duration::from_secs(600),
            min_refresh_interval: Duration::from_secs(5),
            refresh_timeout: Duration::from_secs(10),
        }
    }

    /// Set the key set time to live
    pub fn with_ttl(mut self, cache_ttl: Duration) -> Self {
        self.cache_ttl = cache_ttl;
        self
    }

    /// Set the minimum key set age before an unknown `kid` forces a refresh
    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    /// Set the upper bound on a coalesced refresh
    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    /// Resolve the signing key for `kid`
    ///
    /// Serves from the cached set when it is fresh and contains the key,
    /// otherwise refreshes (coalesced) and checks again.
    ///
    /// # Errors
    ///
    /// - [`AuthError::KeyRetrieval`] if the JWKS download fails, times out or
    ///   returns malformed data
    /// - [`AuthError::InvalidToken`] if no key with this `kid` is published
    pub async fn get_key(&self, kid: &str) -> AuthResult<Arc<SigningKey>> {
        let now = Instant::now();

        if let Some(cached) = self.snapshot()
            && cached.is_fresh(now)
        {
            if let Some(key) = cached.set.get(kid) {
                debug!(jwks_uri = %self.jwks_uri, kid = %kid, "Using cached signing key");
                return Ok(key);
            }
            if cached.age(now) < self.min_refresh_interval {
                warn!(
                    jwks_uri = %self.jwks_uri,
                    kid = %kid,
                    "Unknown kid and key set was refreshed recently, not refetching"
                );
                return Err(unknown_kid(kid));
            }
            info!(jwks_uri = %self.jwks_uri, kid = %kid, "Unknown kid, refreshing JWKS");
        }

        let set = self.refresh_since(now).await?;
        set.get(kid).ok_or_else(|| {
            warn!(jwks_uri = %self.jwks_uri, kid = %kid, "Key ID not found in refreshed JWKS");
            unknown_kid(kid)
        })
    }

    /// Force a key set refresh
    ///
    /// Joins a refresh already in flight rather than starting another one.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeyRetrieval`] if the download fails.
    pub async fn refresh(&self) -> AuthResult<Arc<SigningKeySet>> {
        self.refresh_since(Instant::now()).await
    }

    /// Refresh unless a set downloaded at or after `needed_since` is already cached
    async fn refresh_since(&self, needed_since: Instant) -> AuthResult<Arc<SigningKeySet>> {
        let current = Arc::clone(&self.current);
        let http_client = self.http_client.clone();
        let jwks_uri = self.jwks_uri.clone();
        let cache_ttl = self.cache_ttl;
        let timeout = self.refresh_timeout;

        self.refresh_flight
            .run(
                (),
                || {
                    self.snapshot()
                        .filter(|cached| cached.fetched_at >= needed_since)
                        .map(|cached| cached.set)
                },
                move || async move {
                    let jwks = tokio::time::timeout(timeout, fetch_jwks(&http_client, &jwks_uri))
                        .await
                        .map_err(|_| {
                            error!(jwks_uri = %jwks_uri, ?timeout, "JWKS refresh timed out");
                            AuthError::KeyRetrieval(format!(
                                "JWKS refresh timed out after {timeout:?}"
                            ))
                        })??;

                    let set = SigningKeySet::from_jwks(&jwks);
                    if set.is_empty() {
                        error!(jwks_uri = %jwks_uri, "JWKS contains no usable signing keys");
                        return Err(AuthError::KeyRetrieval(
                            "JWKS contains no usable signing keys".into(),
                        ));
                    }

                    info!(jwks_uri = %jwks_uri, key_count = set.len(), "Refreshed JWKS");
                    let set = Arc::new(set);
                    *current.write() = Some(CachedKeySet {
                        set: Arc::clone(&set),
                        fetched_at: Instant::now(),
                        ttl: cache_ttl,
                    });
                    Ok(set)
                },
            )
            .await
    }

    fn snapshot(&self) -> Option<CachedKeySet> {
        self.current.read().clone()
    }

    /// Get the JWKS endpoint URI
    pub fn jwks_uri(&self) -> &str {
        &self.jwks_uri
    }

    /// Drop the cached key set
    pub fn clear_cache(&self) {
        *self.current.write() = None;
        debug!(jwks_uri = %self.jwks_uri, "JWKS cache cleared");
    }
}

fn unknown_kid(kid: &str) -> AuthError {
    AuthError::InvalidToken(format!("signing key '{kid}' is not published by the issuer"))
}

/// Download and parse a JWKS document
async fn fetch_jwks(http_client: &reqwest::Client, jwks_uri: &str) -> AuthResult<JwkSet> {
    info!(jwks_uri = %jwks_uri, "Fetching JWKS from endpoint");

    let response = http_client.get(jwks_uri).send().await.map_err(|e| {
        error!(jwks_uri = %jwks_uri, error = %e, "Failed to fetch JWKS");
        AuthError::KeyRetrieval(format!("JWKS fetch failed: {e}"))
    })?;

    if !response.status().is_success() {
        error!(
            jwks_uri = %jwks_uri,
            status = %response.status(),
            "JWKS endpoint returned error status"
        );
        return Err(AuthError::KeyRetrieval(format!(
            "JWKS endpoint returned status {}",
            response.status()
        )));
    }

    response.json::<JwkSet>().await.map_err(|e| {
        error!(jwks_uri = %jwks_uri, error = %e, "Failed to parse JWKS JSON");
        AuthError::KeyRetrieval(format!("Invalid JWKS format: {e}"))
    })
}
