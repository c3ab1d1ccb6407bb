//! JWT infrastructure: signing keys, validation and verified claims
//!
//! # Architecture
//!
//! ```text
//! raw token ──► TokenValidator ──► TokenClaims (verified only)
//!                    │
//!                    ▼
//!             SigningKeyStore ──► JWKS endpoint (single-flight refresh)
//! ```
//!
//! # Modules
//!
//! - `jwks` - signing key retrieval, caching and rotation handling
//! - `validator` - signature, issuer, audience, expiry and subject checks

pub mod jwks;
pub mod validator;

pub use jwks::{SigningKey, SigningKeySet, SigningKeyStore};
pub use validator::TokenValidator;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AuthError, AuthResult};

/// `aud` is either a single string or an array of strings (RFC 7519 §4.1.3)
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Audience {
    One(String),
    Many(Vec<String>),
}

impl From<Audience> for Vec<String> {
    fn from(aud: Audience) -> Self {
        match aud {
            Audience::One(aud) => vec![aud],
            Audience::Many(auds) => auds,
        }
    }
}

/// Scopes come as a space separated `scope` string or an `scp` array
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ScopeClaim {
    Delimited(String),
    List(Vec<String>),
}

/// Payload shape produced by `jsonwebtoken::decode` after verification
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct VerifiedPayload {
    #[serde(default)]
    sub: Option<String>,
    iss: String,
    aud: Audience,
    exp: u64,
    #[serde(default)]
    iat: Option<u64>,
    #[serde(default)]
    nbf: Option<u64>,
    #[serde(default)]
    jti: Option<String>,
    #[serde(default)]
    scope: Option<ScopeClaim>,
    #[serde(default)]
    scp: Option<ScopeClaim>,
    #[serde(flatten)]
    additional: HashMap<String, Value>,
}

/// Claims of a token whose signature, issuer, audience and expiry were verified
///
/// Only [`TokenValidator::validate`] produces values of this type; it has no
/// public constructor and no `Deserialize` impl.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenClaims {
    #[serde(rename = "sub")]
    subject: String,
    #[serde(rename = "iss")]
    issuer: String,
    #[serde(rename = "aud")]
    audience: Vec<String>,
    #[serde(rename = "exp")]
    expires_at: u64,
    #[serde(rename = "iat", skip_serializing_if = "Option::is_none")]
    issued_at: Option<u64>,
    #[serde(rename = "nbf", skip_serializing_if = "Option::is_none")]
    not_before: Option<u64>,
    #[serde(rename = "jti", skip_serializing_if = "Option::is_none")]
    jwt_id: Option<String>,
    scopes: Vec<String>,
    #[serde(skip)]
    additional: HashMap<String, Value>,
}

impl TokenClaims {
    /// Build claims from a payload that `jsonwebtoken` has already verified
    pub(crate) fn from_verified(payload: VerifiedPayload) -> AuthResult<Self> {
        let subject = payload
            .sub
            .filter(|sub| !sub.trim().is_empty())
            .ok_or_else(|| AuthError::InvalidToken("token has no subject".into()))?;

        let scopes = match payload.scope.or(payload.scp) {
            Some(ScopeClaim::Delimited(scope)) => parse_scope(&scope),
            Some(ScopeClaim::List(scopes)) => scopes,
            None => Vec::new(),
        };

        Ok(Self {
            subject,
            issuer: payload.iss,
            audience: payload.aud.into(),
            expires_at: payload.exp,
            issued_at: payload.iat,
            not_before: payload.nbf,
            jwt_id: payload.jti,
            scopes,
            additional: payload.additional,
        })
    }

    /// Subject (`sub`)
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Issuer (`iss`)
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Audiences (`aud`)
    pub fn audience(&self) -> &[String] {
        &self.audience
    }

    /// Expiry (`exp`) as a Unix timestamp
    pub fn expires_at(&self) -> u64 {
        self.expires_at
    }

    /// Expiry as a UTC date-time
    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        i64::try_from(self.expires_at)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
    }

    /// Issued-at (`iat`) as a Unix timestamp
    pub fn issued_at(&self) -> Option<u64> {
        self.issued_at
    }

    /// Not-before (`nbf`) as a Unix timestamp
    pub fn not_before(&self) -> Option<u64> {
        self.not_before
    }

    /// JWT ID (`jti`)
    pub fn jwt_id(&self) -> Option<&str> {
        self.jwt_id.as_deref()
    }

    /// Granted scopes
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// Granted scopes in the space separated wire form
    pub fn scope(&self) -> String {
        self.scopes.join(" ")
    }

    /// Whether the token grants `scope`
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    /// Claims that are not registered JWT claims
    pub fn additional(&self) -> &HashMap<String, Value> {
        &self.additional
    }

    /// Read a non-registered claim embedded in the verified payload
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MissingClaim`] when the claim is absent, null, or
    /// does not have the expected shape.
    pub fn claim<T: DeserializeOwned>(&self, name: &str) -> AuthResult<T> {
        self.additional
            .get(name)
            .filter(|value| !value.is_null())
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .ok_or_else(|| AuthError::missing_claim(name))
    }
}

#[cfg(test)]
impl TokenClaims {
    /// Claims for unit tests in sibling modules
    pub(crate) fn for_tests(subject: &str, scope: &str) -> Self {
        Self {
            subject: subject.to_string(),
            issuer: "https://issuer.example".to_string(),
            audience: vec!["api://orders".to_string()],
            expires_at: 4_102_444_800,
            issued_at: None,
            not_before: None,
            jwt_id: None,
            scopes: parse_scope(scope),
            additional: HashMap::new(),
        }
    }
}

/// Split a space delimited scope string (RFC 6749 §3.3)
pub(crate) fn parse_scope(scope: &str) -> Vec<String> {
    scope.split_whitespace().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn payload(value: Value) -> VerifiedPayload {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_from_verified_payload() {
        let claims = TokenClaims::from_verified(payload(json!({
            "sub": "user-42",
            "iss": "https://issuer.example",
            "aud": "api://orders",
            "exp": 1_900_000_000u64,
            "iat": 1_899_999_000u64,
            "scope": "orders.read orders.write",
            "accountId": "A-100"
        })))
        .unwrap();

        assert_eq!(claims.subject(), "user-42");
        assert_eq!(claims.audience(), ["api://orders".to_string()]);
        assert_eq!(claims.scopes(), ["orders.read", "orders.write"]);
        assert!(claims.has_scope("orders.read"));
        assert_eq!(claims.scope(), "orders.read orders.write");
        assert_eq!(claims.claim::<String>("accountId").unwrap(), "A-100");
        assert!(claims.expiry().is_some());
    }

    #[test]
    fn test_audience_array_and_scp_list() {
        let claims = TokenClaims::from_verified(payload(json!({
            "sub": "user-42",
            "iss": "https://issuer.example",
            "aud": ["api://billing", "api://orders"],
            "exp": 1_900_000_000u64,
            "scp": ["orders.read"]
        })))
        .unwrap();

        assert_eq!(claims.audience().len(), 2);
        assert_eq!(claims.scopes(), ["orders.read"]);
    }

    #[test]
    fn test_blank_subject_is_invalid() {
        let result = TokenClaims::from_verified(payload(json!({
            "sub": "  ",
            "iss": "https://issuer.example",
            "aud": "api://orders",
            "exp": 1_900_000_000u64
        })));
        assert!(matches!(result, Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn test_missing_claim() {
        let claims = TokenClaims::for_tests("user-42", "orders.read");
        assert_eq!(
            claims.claim::<String>("accountId"),
            Err(AuthError::missing_claim("accountId"))
        );
    }

    proptest! {
        #[test]
        fn scope_parsing_drops_blank_entries(words in proptest::collection::vec("[a-z.]{1,12}", 0..6)) {
            let scope = words.join("   ");
            let parsed = parse_scope(&format!(" {scope} "));
            prop_assert_eq!(parsed, words);
        }
    }
}
