//! # claimsgate - Bearer Token Validation and Claims Enrichment
//!
//! Validates JWT access tokens presented to protected API endpoints against
//! the issuer's rotating signing keys, then enriches them with business
//! specific "extra claims" into an immutable [`ClaimsPrincipal`].
//!
//! ## Architecture
//!
//! - [`jwt`] - [`SigningKeyStore`] (JWKS with rotation handling) and [`TokenValidator`]
//! - [`userinfo`] - authenticated OIDC userinfo lookups
//! - [`claims`] - the [`ExtraClaimsProvider`] contract, the [`ClaimsCache`] and [`ClaimsPrincipal`]
//! - [`authorizer`] - [`ClaimsAuthorizer`], the per-request pipeline
//! - [`config`] - [`OAuthConfig`] loading and validation
//! - [`discovery`] - OIDC issuer metadata discovery
//! - [`error`] - the [`AuthError`] taxonomy
//!
//! ## Guarantees
//!
//! - Claims are never resolved for a token whose signature, issuer, audience
//!   and expiry were not verified.
//! - Concurrent requests needing the same key refresh or the same claims
//!   lookup share one outbound call.
//! - Failures are never cached.
//! - Raw bearer tokens are never logged; log lines carry a short SHA-256
//!   fingerprint instead.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use claimsgate::{AuthResult, ClaimsAuthorizer, ExtraClaimsProvider, OAuthConfig, TokenClaims, UserInfoClaims};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Account {
//!     #[serde(rename = "accountId")]
//!     account_id: String,
//! }
//!
//! struct AccountProvider;
//!
//! #[async_trait]
//! impl ExtraClaimsProvider for AccountProvider {
//!     type Claims = Account;
//!
//!     async fn issue_at_token_creation(&self, _subject: &str, _email: &str) -> AuthResult<Account> {
//!         Ok(Account { account_id: "A-100".into() })
//!     }
//!
//!     fn claims_from_payload(&self, token: &TokenClaims) -> AuthResult<Account> {
//!         Ok(Account { account_id: token.claim("accountId")? })
//!     }
//!
//!     async fn claims_from_lookup(
//!         &self,
//!         _raw_token: &str,
//!         _token: &TokenClaims,
//!         _user_info: Option<&UserInfoClaims>,
//!     ) -> AuthResult<Account> {
//!         Ok(Account { account_id: "A-100".into() })
//!     }
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = OAuthConfig::new("https://issuer.example", "api://orders")
//!     .with_jwks_endpoint("https://issuer.example/.well-known/jwks.json");
//! let authorizer = ClaimsAuthorizer::from_config(&config, AccountProvider).await?;
//!
//! let principal = authorizer.validate("eyJhbGciOi...").await?;
//! println!("{} -> {}", principal.subject(), principal.extra().account_id);
//! # Ok(())
//! # }
//! ```

pub mod authorizer;
pub mod claims;
pub mod config;
pub mod discovery;
pub mod error;
mod flight;
pub mod http;
pub mod jwt;
pub mod userinfo;

pub use authorizer::ClaimsAuthorizer;
pub use claims::{ClaimsCache, ClaimsPrincipal, ExtraClaims, ExtraClaimsProvider, token_hash};
pub use config::{ClaimsStrategy, ConfigError, OAuthConfig, ProxyConfig};
pub use discovery::IssuerMetadata;
pub use error::{AuthError, AuthResult};
pub use jwt::{SigningKey, SigningKeySet, SigningKeyStore, TokenClaims, TokenValidator};
pub use userinfo::{UserInfoClaims, UserInfoClient};
