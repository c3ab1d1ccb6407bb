//! Extra claims: the provider contract, the lookup cache and the final principal

pub mod cache;
pub mod principal;
pub mod provider;

pub use cache::{ClaimsCache, token_hash};
pub use principal::ClaimsPrincipal;
pub use provider::{ExtraClaims, ExtraClaimsProvider};
