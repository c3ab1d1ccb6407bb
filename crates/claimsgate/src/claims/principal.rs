//! The verified identity handed to business authorization

use serde::Serialize;

use crate::jwt::TokenClaims;

/// Verified token claims combined with deployment-specific extra claims
///
/// Immutable once assembled. Built only from [`TokenClaims`], which in turn
/// only come out of a successful [`TokenValidator::validate`](crate::TokenValidator::validate).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClaimsPrincipal<C> {
    token: TokenClaims,
    extra: C,
}

impl<C> ClaimsPrincipal<C> {
    /// Combine verified token claims with extra claims
    pub fn assemble(token: TokenClaims, extra: C) -> Self {
        Self { token, extra }
    }

    /// Verified token claims
    pub fn token(&self) -> &TokenClaims {
        &self.token
    }

    /// Deployment-specific claims
    pub fn extra(&self) -> &C {
        &self.extra
    }

    /// Verified subject (`sub`)
    pub fn subject(&self) -> &str {
        self.token.subject()
    }

    /// Scopes granted to the token
    pub fn scopes(&self) -> &[String] {
        self.token.scopes()
    }

    /// Whether the token was granted `scope`
    pub fn has_scope(&self, scope: &str) -> bool {
        self.token.has_scope(scope)
    }

    /// Split back into the two halves
    pub fn into_parts(self) -> (TokenClaims, C) {
        (self.token, self.extra)
    }
}
