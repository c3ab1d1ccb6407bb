//! Access token validation against the issuer's published signing keys
//!
//! Checks performed, in order:
//! - Header decodes and names an allow-listed algorithm
//! - Header carries a `kid` resolvable through the [`SigningKeyStore`]
//! - The key, when it declares an algorithm, agrees with the header
//! - Signature, issuer, audience, expiry and not-before (with clock skew)
//! - A non-blank subject
//!
//! Symmetric algorithms are never accepted. A validator configured through
//! [`OAuthConfig`] cannot list them, see [`OAuthConfig::validate`].

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{Algorithm, Validation, decode, decode_header};
use tracing::{debug, warn};

use super::{SigningKeyStore, TokenClaims, VerifiedPayload};
use crate::claims::cache::fingerprint;
use crate::config::OAuthConfig;
use crate::error::{AuthError, AuthResult};

/// Validates bearer tokens and yields their verified claims
///
/// # Example
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use claimsgate::jwt::{SigningKeyStore, TokenValidator};
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let keys = Arc::new(SigningKeyStore::new(
///     "https://issuer.example/.well-known/jwks.json",
///     reqwest::Client::new(),
/// ));
/// let validator = TokenValidator::new("https://issuer.example", "api://orders", keys);
///
/// let claims = validator.validate("eyJhbGciOi...").await?;
/// println!("Token valid for: {}", claims.subject());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct TokenValidator {
    /// Expected issuer (`iss`)
    issuer: String,
    /// Expected audience (`aud`)
    audience: String,
    /// Signing key source
    key_store: Arc<SigningKeyStore>,
    /// Clock skew tolerance for `exp` and `nbf` (default: 60 seconds)
    clock_skew: Duration,
    /// Accepted signing algorithms (default: RS256)
    allowed_algorithms: Vec<Algorithm>,
}

impl TokenValidator {
    /// Create a validator with default settings
    ///
    /// # Default Settings
    ///
    /// - Clock skew: 60 seconds
    /// - Algorithms: RS256
    pub fn new(
        issuer: impl Into<String>,
        audience: impl Into<String>,
        key_store: Arc<SigningKeyStore>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
            key_store,
            clock_skew: Duration::from_secs(60),
            allowed_algorithms: vec![Algorithm::RS256],
        }
    }

    /// Create a validator from an OAuth configuration
    pub fn from_config(config: &OAuthConfig, key_store: Arc<SigningKeyStore>) -> Self {
        Self::new(config.issuer.clone(), config.audience.clone(), key_store)
            .with_clock_skew(config.clock_skew())
            .with_algorithms(config.allowed_algorithms.clone())
    }

    /// Set the clock skew tolerance
    pub fn with_clock_skew(mut self, leeway: Duration) -> Self {
        self.clock_skew = leeway;
        self
    }

    /// Set the accepted algorithms
    ///
    /// HMAC algorithms are dropped: a published JWKS cannot carry a shared
    /// secret, so such tokens are always rejected.
    pub fn with_algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.allowed_algorithms = algorithms
            .into_iter()
            .filter(|alg| !is_symmetric(*alg))
            .collect();
        self
    }

    /// Signing key store backing this validator
    pub fn key_store(&self) -> &Arc<SigningKeyStore> {
        &self.key_store
    }

    /// Validate a raw bearer token
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidToken`] if the token is malformed, uses a
    ///   disallowed algorithm, names an unknown key, fails signature
    ///   verification, has the wrong issuer or audience, is expired or not yet
    ///   valid, or has no subject
    /// - [`AuthError::KeyRetrieval`] if the signing keys cannot be downloaded
    pub async fn validate(&self, raw_token: &str) -> AuthResult<TokenClaims> {
        let token = fingerprint(raw_token);

        let header = decode_header(raw_token).map_err(|e| {
            debug!(token = %token, error = %e, "Failed to decode JWT header");
            AuthError::InvalidToken(format!("malformed token: {e}"))
        })?;

        if !self.allowed_algorithms.contains(&header.alg) {
            warn!(
                token = %token,
                algorithm = ?header.alg,
                allowed = ?self.allowed_algorithms,
                "JWT algorithm not allowed"
            );
            return Err(AuthError::InvalidToken(format!(
                "algorithm {:?} is not allowed",
                header.alg
            )));
        }

        let kid = header.kid.as_deref().ok_or_else(|| {
            warn!(token = %token, "JWT missing kid (key ID) in header");
            AuthError::InvalidToken("token header has no kid".into())
        })?;

        let key = self.key_store.get_key(kid).await?;
        if !key.supports(header.alg) {
            warn!(
                token = %token,
                kid = %kid,
                header_algorithm = ?header.alg,
                key_algorithm = ?key.algorithm(),
                "JWT algorithm does not match signing key"
            );
            return Err(AuthError::InvalidToken(format!(
                "algorithm {:?} does not match signing key '{kid}'",
                header.alg
            )));
        }

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.validate_nbf = true;
        validation.leeway = self.clock_skew.as_secs();

        let data = decode::<VerifiedPayload>(raw_token, key.decoding_key(), &validation)
            .map_err(|e| {
                warn!(
                    token = %token,
                    error = %e,
                    issuer = %self.issuer,
                    audience = %self.audience,
                    "JWT validation failed"
                );
                AuthError::InvalidToken(format!("token verification failed: {e}"))
            })?;

        let claims = TokenClaims::from_verified(data.claims)?;

        debug!(
            token = %token,
            subject = %claims.subject(),
            algorithm = ?header.alg,
            "JWT validation successful"
        );
        Ok(claims)
    }
}

fn is_symmetric(alg: Algorithm) -> bool {
    matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> TokenValidator {
        let keys = Arc::new(SigningKeyStore::new(
            "https://auth.example.com/jwks",
            reqwest::Client::new(),
        ));
        TokenValidator::new("https://issuer.example", "api://orders", keys)
    }

    #[test]
    fn test_symmetric_algorithms_are_dropped() {
        let validator =
            validator().with_algorithms(vec![Algorithm::HS256, Algorithm::RS256, Algorithm::ES256]);
        assert_eq!(
            validator.allowed_algorithms,
            vec![Algorithm::RS256, Algorithm::ES256]
        );
    }

    #[tokio::test]
    async fn test_malformed_token_is_invalid() {
        let result = validator().validate("not-a-jwt").await;
        assert!(matches!(result, Err(AuthError::InvalidToken(_))));
    }

    #[tokio::test]
    async fn test_hs256_rejected_before_key_lookup() {
        // {"alg":"HS256","typ":"JWT","kid":"k1"}
        let token = "eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCIsImtpZCI6ImsxIn0.eyJzdWIiOiJ1c2VyLTQyIn0.c2ln";
        let result = validator().validate(token).await;
        match result {
            Err(AuthError::InvalidToken(msg)) => assert!(msg.contains("HS256")),
            other => panic!("expected InvalidToken, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_kid_is_invalid() {
        // {"alg":"RS256","typ":"JWT"}
        let token = "eyJhbGciOiJSUzI1NiIsInR5cCI6IkpXVCJ9.eyJzdWIiOiJ1c2VyLTQyIn0.c2ln";
        let result = validator().validate(token).await;
        match result {
            Err(AuthError::InvalidToken(msg)) => assert!(msg.contains("kid")),
            other => panic!("expected InvalidToken, got {other:?}"),
        }
    }
}
