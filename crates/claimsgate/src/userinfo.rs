//! OpenID Connect userinfo lookups
//!
//! The userinfo endpoint is called with the caller's own access token, so the
//! issuer decides what the caller may see about themselves.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::claims::cache::fingerprint;
use crate::error::{AuthError, AuthResult};

/// Claims returned by the userinfo endpoint (OIDC Core §5.3.2)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInfoClaims {
    /// Subject identifier
    pub sub: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Additional fields
    #[serde(flatten)]
    pub additional: HashMap<String, Value>,
}

/// Userinfo endpoint shape before the subject is checked
#[derive(Deserialize)]
struct RawUserInfo {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    given_name: Option<String>,
    #[serde(default)]
    family_name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(flatten)]
    additional: HashMap<String, Value>,
}

/// Client for an OIDC userinfo endpoint
#[derive(Debug, Clone)]
pub struct UserInfoClient {
    endpoint: String,
    http_client: reqwest::Client,
}

impl UserInfoClient {
    /// Create a client for `endpoint`
    pub fn new(endpoint: impl Into<String>, http_client: reqwest::Client) -> Self {
        Self {
            endpoint: endpoint.into(),
            http_client,
        }
    }

    /// Userinfo endpoint URL
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Fetch the caller's userinfo, authenticating with their access token
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidToken`] if the endpoint answers 401
    /// - [`AuthError::UserInfoLookup`] for any other status, network or
    ///   parse failure
    /// - [`AuthError::MissingClaim`] if the response has no `sub`
    pub async fn fetch(&self, raw_token: &str) -> AuthResult<UserInfoClaims> {
        let token = fingerprint(raw_token);
        debug!(endpoint = %self.endpoint, token = %token, "Fetching userinfo");

        let response = self
            .http_client
            .post(&self.endpoint)
            .bearer_auth(raw_token)
            .header(http::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| {
                error!(endpoint = %self.endpoint, token = %token, error = %e, "Userinfo request failed");
                AuthError::UserInfoLookup(format!("userinfo request failed: {e}"))
            })?;

        let status = response.status();
        if status == http::StatusCode::UNAUTHORIZED {
            warn!(endpoint = %self.endpoint, token = %token, "Userinfo endpoint rejected the token");
            return Err(AuthError::InvalidToken(
                "userinfo endpoint rejected the token".into(),
            ));
        }
        if !status.is_success() {
            error!(
                endpoint = %self.endpoint,
                token = %token,
                status = %status,
                "Userinfo endpoint returned error status"
            );
            return Err(AuthError::UserInfoLookup(format!(
                "userinfo endpoint returned status {status}"
            )));
        }

        let raw: RawUserInfo = response.json().await.map_err(|e| {
            error!(endpoint = %self.endpoint, token = %token, error = %e, "Failed to parse userinfo JSON");
            AuthError::UserInfoLookup(format!("invalid userinfo response: {e}"))
        })?;

        let sub = raw
            .sub
            .filter(|sub| !sub.is_empty())
            .ok_or_else(|| AuthError::missing_claim("sub"))?;

        Ok(UserInfoClaims {
            sub,
            given_name: raw.given_name,
            family_name: raw.family_name,
            email: raw.email,
            additional: raw.additional,
        })
    }
}
