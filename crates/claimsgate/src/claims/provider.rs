//! Deployment-specific extra claims
//!
//! Business authorization usually needs data the authorization server does
//! not know about (an account number, a region, a role in the business
//! domain). A deployment supplies it by implementing [`ExtraClaimsProvider`]
//! once and handing the implementation to the [`ClaimsAuthorizer`] at startup.
//!
//! [`ClaimsAuthorizer`]: crate::ClaimsAuthorizer

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::AuthResult;
use crate::jwt::TokenClaims;
use crate::userinfo::UserInfoClaims;

/// Bound for extra claims payloads
///
/// Claims are cached and shared between concurrent requests, so they must be
/// cloneable, thread-safe and serializable.
pub trait ExtraClaims: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> ExtraClaims for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// Source of business-specific claims
///
/// Which method the pipeline calls depends on the configured
/// [`ClaimsStrategy`](crate::config::ClaimsStrategy):
///
/// - `Payload`: [`claims_from_payload`](Self::claims_from_payload) on every request
/// - `Lookup`: [`claims_from_lookup`](Self::claims_from_lookup) on a claims cache miss
///
/// [`issue_at_token_creation`](Self::issue_at_token_creation) is never called
/// during validation. It serves authorization servers that embed the claims
/// when they issue a token.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use claimsgate::{AuthResult, ExtraClaimsProvider, TokenClaims, UserInfoClaims};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// struct Region {
///     region: String,
/// }
///
/// struct RegionProvider;
///
/// #[async_trait]
/// impl ExtraClaimsProvider for RegionProvider {
///     type Claims = Region;
///
///     async fn issue_at_token_creation(&self, _subject: &str, _email: &str) -> AuthResult<Region> {
///         Ok(Region { region: "eu".into() })
///     }
///
///     fn claims_from_payload(&self, token: &TokenClaims) -> AuthResult<Region> {
///         Ok(Region { region: token.claim("region")? })
///     }
///
///     async fn claims_from_lookup(
///         &self,
///         _raw_token: &str,
///         _token: &TokenClaims,
///         _user_info: Option<&UserInfoClaims>,
///     ) -> AuthResult<Region> {
///         Ok(Region { region: "eu".into() })
///     }
/// }
/// ```
#[async_trait]
pub trait ExtraClaimsProvider: Send + Sync + 'static {
    /// Extra claims produced by this provider
    type Claims: ExtraClaims;

    /// Produce claims for a token that is about to be issued
    ///
    /// # Errors
    ///
    /// Implementation defined; typically [`AuthError::MissingClaim`](crate::AuthError::MissingClaim)
    /// when the subject has no business record.
    async fn issue_at_token_creation(&self, subject: &str, email: &str) -> AuthResult<Self::Claims>;

    /// Read claims already embedded in a verified token
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MissingClaim`](crate::AuthError::MissingClaim)
    /// when an expected claim is absent, see [`TokenClaims::claim`].
    fn claims_from_payload(&self, token: &TokenClaims) -> AuthResult<Self::Claims>;

    /// Look claims up out of band after a cache miss
    ///
    /// `user_info` is present when a userinfo endpoint is configured. The raw
    /// token is passed for providers that call further APIs on the caller's
    /// behalf; it must not be logged.
    ///
    /// # Errors
    ///
    /// [`AuthError::UserInfoLookup`](crate::AuthError::UserInfoLookup) for
    /// infrastructure failures, [`AuthError::MissingClaim`](crate::AuthError::MissingClaim)
    /// when the business data does not exist.
    async fn claims_from_lookup(
        &self,
        raw_token: &str,
        token: &TokenClaims,
        user_info: Option<&UserInfoClaims>,
    ) -> AuthResult<Self::Claims>;
}
