//! The per-request validation pipeline
//!
//! ```text
//! raw token ─► TokenValidator ─► claims source ─► ClaimsPrincipal::assemble
//!                                   │
//!                 Payload ──────────┤  provider.claims_from_payload
//!                 Lookup  ──────────┘  ClaimsCache ─► userinfo + provider.claims_from_lookup
//! ```
//!
//! Extra claims are only ever resolved for a token that passed validation, so
//! a rejected token never touches the cache or the lookup endpoints.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::claims::cache::fingerprint;
use crate::claims::{ClaimsCache, ClaimsPrincipal, ExtraClaimsProvider};
use crate::config::{ClaimsStrategy, ConfigError, OAuthConfig};
use crate::discovery::IssuerMetadata;
use crate::error::AuthResult;
use crate::http::build_client;
use crate::jwt::{SigningKeyStore, TokenValidator};
use crate::userinfo::UserInfoClient;

/// Where a running authorizer gets extra claims from
enum ClaimsSource<C> {
    Payload,
    Lookup {
        cache: Arc<ClaimsCache<C>>,
        user_info: Option<UserInfoClient>,
        ttl: Duration,
        timeout: Duration,
    },
}

/// Entry point for protected endpoints: turns a raw bearer token into a
/// [`ClaimsPrincipal`] or a classified [`AuthError`](crate::AuthError)
///
/// Create one at startup and share it between requests.
///
/// # Example
///
/// ```rust,no_run
/// # use claimsgate::{ClaimsAuthorizer, ExtraClaimsProvider, OAuthConfig};
/// # async fn run<P: ExtraClaimsProvider>(provider: P) -> Result<(), Box<dyn std::error::Error>> {
/// let config = OAuthConfig::from_file("api.config.toml")?;
/// let authorizer = ClaimsAuthorizer::from_config(&config, provider).await?;
///
/// match authorizer.validate("eyJhbGciOi...").await {
///     Ok(principal) => println!("Authorized: {}", principal.subject()),
///     Err(e) => println!("{} ({})", e, e.status_code()),
/// }
/// # Ok(())
/// # }
/// ```
pub struct ClaimsAuthorizer<P: ExtraClaimsProvider> {
    validator: TokenValidator,
    provider: Arc<P>,
    source: ClaimsSource<P::Claims>,
}

impl<P: ExtraClaimsProvider> std::fmt::Debug for ClaimsAuthorizer<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("ClaimsAuthorizer");
        debug
            .field("validator", &self.validator)
            .field("strategy", &self.strategy());
        if let ClaimsSource::Lookup {
            cache,
            user_info,
            ttl,
            timeout,
        } = &self.source
        {
            debug
                .field("cache", cache)
                .field("user_info", &user_info.as_ref().map(UserInfoClient::endpoint))
                .field("ttl", ttl)
                .field("timeout", timeout);
        }
        debug.finish_non_exhaustive()
    }
}

impl<P: ExtraClaimsProvider> ClaimsAuthorizer<P> {
    /// Authorizer reading extra claims from the verified token payload
    pub fn with_payload_claims(validator: TokenValidator, provider: Arc<P>) -> Self {
        Self {
            validator,
            provider,
            source: ClaimsSource::Payload,
        }
    }

    /// Authorizer looking extra claims up on first sight of a token
    ///
    /// Defaults to a 30 minute claims TTL and a 10 second lookup timeout.
    pub fn with_claims_lookup(
        validator: TokenValidator,
        provider: Arc<P>,
        cache: Arc<ClaimsCache<P::Claims>>,
        user_info: Option<UserInfoClient>,
    ) -> Self {
        Self {
            validator,
            provider,
            source: ClaimsSource::Lookup {
                cache,
                user_info,
                ttl: Duration::from_secs(30 * 60),
                timeout: Duration::from_secs(10),
            },
        }
    }

    /// Set the claims cache TTL (lookup strategy only)
    pub fn with_claims_ttl(mut self, claims_ttl: Duration) -> Self {
        if let ClaimsSource::Lookup { ttl, .. } = &mut self.source {
            *ttl = claims_ttl;
        }
        self
    }

    /// Set the claims lookup timeout (lookup strategy only)
    pub fn with_lookup_timeout(mut self, lookup_timeout: Duration) -> Self {
        if let ClaimsSource::Lookup { timeout, .. } = &mut self.source {
            *timeout = lookup_timeout;
        }
        self
    }

    /// Build the whole pipeline from configuration
    ///
    /// Validates the configuration, builds the shared HTTP client, discovers
    /// missing endpoints from issuer metadata and, with the lookup strategy,
    /// creates the claims cache (and its sweeper when configured).
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for invalid settings, an HTTP client that
    /// cannot be built, or failed issuer metadata discovery.
    pub async fn from_config(config: &OAuthConfig, provider: P) -> Result<Self, ConfigError> {
        config.validate()?;
        let http_client = build_client(config)?;

        let needs_user_info = config.claims_strategy == ClaimsStrategy::Lookup;
        let metadata = if config.jwks_endpoint.is_none()
            || (needs_user_info && config.user_info_endpoint.is_none())
        {
            Some(
                IssuerMetadata::discover(&http_client, &config.issuer)
                    .await
                    .map_err(ConfigError::MetadataLookup)?,
            )
        } else {
            None
        };

        let jwks_uri = match (&config.jwks_endpoint, &metadata) {
            (Some(endpoint), _) => endpoint.clone(),
            (None, Some(metadata)) => metadata.jwks_uri.clone(),
            (None, None) => {
                return Err(ConfigError::Invalid("no JWKS endpoint configured".into()));
            }
        };

        let key_store = SigningKeyStore::new(jwks_uri, http_client.clone())
            .with_ttl(config.jwks_cache_ttl())
            .with_min_refresh_interval(config.jwks_min_refresh_interval())
            .with_refresh_timeout(config.lookup_timeout());
        let validator = TokenValidator::from_config(config, Arc::new(key_store));
        let provider = Arc::new(provider);

        let authorizer = match config.claims_strategy {
            ClaimsStrategy::Payload => Self::with_payload_claims(validator, provider),
            ClaimsStrategy::Lookup => {
                let user_info = config
                    .user_info_endpoint
                    .clone()
                    .or_else(|| metadata.and_then(|m| m.userinfo_endpoint))
                    .map(|endpoint| UserInfoClient::new(endpoint, http_client));

                let cache = Arc::new(ClaimsCache::new());
                if let Some(seconds) = config.cache_sweep_interval_seconds.filter(|s| *s > 0) {
                    let _sweeper = cache.spawn_sweeper(Duration::from_secs(seconds));
                }

                Self::with_claims_lookup(validator, provider, cache, user_info)
                    .with_claims_ttl(config.claims_cache_ttl())
                    .with_lookup_timeout(config.lookup_timeout())
            }
        };

        info!(
            issuer = %config.issuer,
            audience = %config.audience,
            jwks_uri = %authorizer.validator.key_store().jwks_uri(),
            strategy = ?authorizer.strategy(),
            "Claims authorizer ready"
        );
        Ok(authorizer)
    }

    /// Validate a raw bearer token and resolve its extra claims
    ///
    /// # Errors
    ///
    /// - [`AuthError::KeyRetrieval`](crate::AuthError::KeyRetrieval) if signing keys cannot be downloaded
    /// - [`AuthError::InvalidToken`](crate::AuthError::InvalidToken) if the token fails verification
    ///   or the userinfo endpoint rejects it
    /// - [`AuthError::UserInfoLookup`](crate::AuthError::UserInfoLookup) if the lookup fails or times out
    /// - [`AuthError::MissingClaim`](crate::AuthError::MissingClaim) if the provider cannot find an
    ///   expected claim
    pub async fn validate(&self, raw_token: &str) -> AuthResult<ClaimsPrincipal<P::Claims>> {
        let token = self.validator.validate(raw_token).await?;

        let extra = match &self.source {
            ClaimsSource::Payload => self.provider.claims_from_payload(&token)?,
            ClaimsSource::Lookup {
                cache,
                user_info,
                ttl,
                timeout,
            } => {
                let provider = Arc::clone(&self.provider);
                let user_info = user_info.clone();
                let raw_token_owned = raw_token.to_owned();
                let verified = token.clone();

                cache
                    .get_or_compute(raw_token, *ttl, *timeout, move || async move {
                        let info = match &user_info {
                            Some(client) => Some(client.fetch(&raw_token_owned).await?),
                            None => None,
                        };
                        provider
                            .claims_from_lookup(&raw_token_owned, &verified, info.as_ref())
                            .await
                    })
                    .await?
            }
        };

        debug!(
            token = %fingerprint(raw_token),
            subject = %token.subject(),
            "Claims principal assembled"
        );
        Ok(ClaimsPrincipal::assemble(token, extra))
    }

    /// Produce extra claims for a token about to be issued
    ///
    /// # Errors
    ///
    /// Whatever the provider's `issue_at_token_creation` returns.
    pub async fn issue_extra_claims(&self, subject: &str, email: &str) -> AuthResult<P::Claims> {
        self.provider.issue_at_token_creation(subject, email).await
    }

    /// Active claims strategy
    pub fn strategy(&self) -> ClaimsStrategy {
        match self.source {
            ClaimsSource::Payload => ClaimsStrategy::Payload,
            ClaimsSource::Lookup { .. } => ClaimsStrategy::Lookup,
        }
    }

    /// Token validator, and through it the signing key store
    pub fn validator(&self) -> &TokenValidator {
        &self.validator
    }

    /// Claims cache, with the lookup strategy
    pub fn claims_cache(&self) -> Option<&Arc<ClaimsCache<P::Claims>>> {
        match &self.source {
            ClaimsSource::Payload => None,
            ClaimsSource::Lookup { cache, .. } => Some(cache),
        }
    }

    /// Extra claims provider
    pub fn provider(&self) -> &P {
        &self.provider
    }
}
