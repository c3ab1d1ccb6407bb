//! OpenID Connect issuer metadata discovery
//!
//! Used at startup when the JWKS or userinfo endpoints are not configured
//! explicitly. Unlike per-request key retrieval there is no fallback URL
//! pattern: if the issuer does not publish metadata, startup fails.

use serde::Deserialize;
use tracing::{debug, error, info};

use crate::error::{AuthError, AuthResult};

/// Issuer metadata document (OIDC Discovery §3)
///
/// Only the fields the pipeline needs; everything else is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IssuerMetadata {
    /// Issuer identifier
    pub issuer: String,

    /// JWKS URI
    pub jwks_uri: String,

    /// Userinfo endpoint, when the issuer offers one
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
}

impl IssuerMetadata {
    /// Well-known metadata URL for an issuer
    pub fn metadata_url(issuer: &str) -> String {
        format!(
            "{}/.well-known/openid-configuration",
            issuer.trim_end_matches('/')
        )
    }

    /// Fetch the metadata published by `issuer`
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeyRetrieval`] if the document cannot be fetched
    /// or parsed, or if it names a different issuer.
    pub async fn discover(http_client: &reqwest::Client, issuer: &str) -> AuthResult<Self> {
        let url = Self::metadata_url(issuer);
        debug!(issuer = %issuer, discovery_url = %url, "Fetching issuer metadata");

        let response = http_client.get(&url).send().await.map_err(|e| {
            error!(issuer = %issuer, error = %e, "Failed to fetch issuer metadata");
            AuthError::KeyRetrieval(format!("metadata lookup failed for {issuer}: {e}"))
        })?;

        if !response.status().is_success() {
            error!(
                issuer = %issuer,
                status = %response.status(),
                "Issuer metadata endpoint returned error status"
            );
            return Err(AuthError::KeyRetrieval(format!(
                "metadata lookup for {issuer} returned status {}",
                response.status()
            )));
        }

        let metadata: Self = response.json().await.map_err(|e| {
            error!(issuer = %issuer, error = %e, "Failed to parse issuer metadata");
            AuthError::KeyRetrieval(format!("invalid metadata document for {issuer}: {e}"))
        })?;

        if metadata.issuer.trim_end_matches('/') != issuer.trim_end_matches('/') {
            error!(
                issuer = %issuer,
                published_issuer = %metadata.issuer,
                "Issuer metadata names a different issuer"
            );
            return Err(AuthError::KeyRetrieval(format!(
                "metadata for {issuer} names issuer {}",
                metadata.issuer
            )));
        }

        info!(
            issuer = %issuer,
            jwks_uri = %metadata.jwks_uri,
            userinfo_endpoint = ?metadata.userinfo_endpoint,
            "Discovered issuer metadata"
        );
        Ok(metadata)
    }
}
