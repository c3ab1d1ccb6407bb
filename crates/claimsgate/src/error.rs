//! Error taxonomy for the validation pipeline
//!
//! Every failure a caller can observe is one of four kinds. Infrastructure
//! failures (`KeyRetrieval`, `UserInfoLookup`) and untrusted-token failures
//! (`InvalidToken`) are never merged, because they map to different HTTP
//! outcomes downstream.

use http::StatusCode;
use thiserror::Error;

/// Result type for pipeline operations
pub type AuthResult<T> = Result<T, AuthError>;

/// Classified pipeline failure
///
/// The type is `Clone` so that every waiter on a coalesced operation observes
/// the same failure value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The JWKS (or issuer metadata) endpoint was unreachable or returned malformed data
    #[error("Signing key retrieval failed: {0}")]
    KeyRetrieval(String),

    /// Signature, issuer, audience, expiry or subject checks failed, or the
    /// userinfo endpoint rejected the token with a 401
    #[error("Invalid access token: {0}")]
    InvalidToken(String),

    /// A non-401 failure reaching the extra claims source
    #[error("User info lookup failed: {0}")]
    UserInfoLookup(String),

    /// An expected claim was absent
    #[error("Missing claim: {claim}")]
    MissingClaim {
        /// Name of the claim that was expected
        claim: String,
    },
}

impl AuthError {
    /// Create a `MissingClaim` error for the named claim
    pub fn missing_claim(claim: impl Into<String>) -> Self {
        Self::MissingClaim {
            claim: claim.into(),
        }
    }

    /// HTTP status the surrounding service should return for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::KeyRetrieval(_) | Self::UserInfoLookup(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            Self::MissingClaim { .. } => StatusCode::FORBIDDEN,
        }
    }

    /// Stable machine readable error code for API responses and logs
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::KeyRetrieval(_) => "signing_key_download_failure",
            Self::InvalidToken(_) => "unauthorized",
            Self::UserInfoLookup(_) => "userinfo_failure",
            Self::MissingClaim { .. } => "claims_failure",
        }
    }

    /// Whether this is a server-side failure that may heal on retry
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Self::KeyRetrieval(_) | Self::UserInfoLookup(_))
    }
}
