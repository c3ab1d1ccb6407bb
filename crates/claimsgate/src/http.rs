//! Outbound HTTP client shared by the JWKS, discovery and userinfo calls
//!
//! The client is configured to:
//! - NOT follow redirects (SSRF protection per OAuth2 security guidance)
//! - Use rustls for TLS (no OpenSSL dependency)
//! - Time out every request
//! - Optionally route through a debugging proxy

use tracing::info;

use crate::config::{ConfigError, OAuthConfig};

/// Build the outbound HTTP client for an OAuth configuration
///
/// # Errors
///
/// Returns [`ConfigError`] if the proxy URL is invalid or the TLS backend
/// cannot be initialised.
pub fn build_client(config: &OAuthConfig) -> Result<reqwest::Client, ConfigError> {
    let mut builder = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(config.request_timeout());

    if config.proxy.enabled
        && let Some(url) = config.proxy.url.as_deref()
    {
        info!(proxy = %url, "Routing OAuth HTTP requests through proxy");
        builder = builder.proxy(reqwest::Proxy::all(url)?);
    }

    Ok(builder.build()?)
}
