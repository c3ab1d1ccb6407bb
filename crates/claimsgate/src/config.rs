//! Configuration for the validation pipeline
//!
//! The surrounding service loads an [`OAuthConfig`] once at startup, validates
//! it, and hands it to [`ClaimsAuthorizer::from_config`](crate::ClaimsAuthorizer::from_config).

use std::path::PathBuf;
use std::time::Duration;

use jsonwebtoken::Algorithm;
use serde::Deserialize;
use url::Url;

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file not found
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// Unsupported file format
    #[error("Unsupported configuration file format. Use .toml, .yaml, .yml, or .json")]
    UnsupportedFormat,

    /// Configuration parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] config::ConfigError),

    /// A value was present but not acceptable
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// An endpoint was not a valid URL
    #[error("Invalid URL '{url}': {source}")]
    InvalidUrl {
        /// The offending value
        url: String,
        /// Parser error
        source: url::ParseError,
    },

    /// The outbound HTTP client could not be built
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Endpoints were not configured and issuer metadata could not be read
    #[error("Issuer metadata lookup failed: {0}")]
    MetadataLookup(#[source] crate::error::AuthError),
}

/// Where extra claims come from for validated tokens
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimsStrategy {
    /// Extra claims were embedded by the authorization server and are read
    /// from the verified token payload
    Payload,
    /// Extra claims are looked up out of band on first sight of a token and
    /// cached for the configured time to live
    #[default]
    Lookup,
}

/// Outbound HTTP proxy settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Route JWKS, discovery and userinfo calls through the proxy
    pub enabled: bool,
    /// Proxy URL, such as `http://127.0.0.1:8888`
    pub url: Option<String>,
}

/// OAuth settings consumed by the validation pipeline
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    /// Expected `iss` claim, compared exactly
    pub issuer: String,
    /// Audience that must appear in the `aud` claim
    pub audience: String,
    /// JWKS endpoint; discovered from issuer metadata when absent
    #[serde(default)]
    pub jwks_endpoint: Option<String>,
    /// Userinfo endpoint used by the lookup strategy; discovered when absent
    #[serde(default)]
    pub user_info_endpoint: Option<String>,
    /// Time to live for cached extra claims
    #[serde(default = "default_claims_cache_ttl_minutes")]
    pub claims_cache_time_to_live_minutes: u64,
    /// Where extra claims come from
    #[serde(default)]
    pub claims_strategy: ClaimsStrategy,
    /// Signing algorithms accepted in token headers
    #[serde(default = "default_allowed_algorithms")]
    pub allowed_algorithms: Vec<Algorithm>,
    /// Clock skew tolerance applied to `exp` and `nbf`
    #[serde(default = "default_clock_skew_seconds")]
    pub clock_skew_seconds: u64,
    /// How long a downloaded key set is trusted before it is refetched
    #[serde(default = "default_jwks_cache_ttl_seconds")]
    pub jwks_cache_time_to_live_seconds: u64,
    /// Minimum age of the key set before an unknown `kid` may force a refetch
    #[serde(default = "default_jwks_min_refresh_interval_seconds")]
    pub jwks_min_refresh_interval_seconds: u64,
    /// Per-request timeout for outbound HTTP calls
    #[serde(default = "default_timeout_seconds")]
    pub request_timeout_seconds: u64,
    /// Upper bound on a coalesced key refresh or extra claims lookup
    #[serde(default = "default_timeout_seconds")]
    pub lookup_timeout_seconds: u64,
    /// Optional periodic removal of expired cache entries
    #[serde(default)]
    pub cache_sweep_interval_seconds: Option<u64>,
    /// Outbound proxy
    #[serde(default)]
    pub proxy: ProxyConfig,
}

fn default_claims_cache_ttl_minutes() -> u64 {
    30
}

fn default_allowed_algorithms() -> Vec<Algorithm> {
    vec![Algorithm::RS256]
}

fn default_clock_skew_seconds() -> u64 {
    60
}

fn default_jwks_cache_ttl_seconds() -> u64 {
    600
}

fn default_jwks_min_refresh_interval_seconds() -> u64 {
    5
}

fn default_timeout_seconds() -> u64 {
    10
}

impl OAuthConfig {
    /// Create a configuration with defaults for everything but issuer and audience
    pub fn new(issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
            jwks_endpoint: None,
            user_info_endpoint: None,
            claims_cache_time_to_live_minutes: default_claims_cache_ttl_minutes(),
            claims_strategy: ClaimsStrategy::default(),
            allowed_algorithms: default_allowed_algorithms(),
            clock_skew_seconds: default_clock_skew_seconds(),
            jwks_cache_time_to_live_seconds: default_jwks_cache_ttl_seconds(),
            jwks_min_refresh_interval_seconds: default_jwks_min_refresh_interval_seconds(),
            request_timeout_seconds: default_timeout_seconds(),
            lookup_timeout_seconds: default_timeout_seconds(),
            cache_sweep_interval_seconds: None,
            proxy: ProxyConfig::default(),
        }
    }

    /// Load configuration from a file (TOML, YAML, or JSON)
    ///
    /// Environment variables with the `CLAIMSGATE_` prefix override file
    /// settings, with `__` separating nested keys (e.g. `CLAIMSGATE_PROXY__URL`).
    ///
    /// # Errors
    ///
    /// Returns an error if the file doesn't exist, has an unsupported
    /// extension, or doesn't deserialize into a configuration.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        Self::from_file_with_prefix(path, "CLAIMSGATE")
    }

    /// Load configuration from a file with a custom environment prefix
    ///
    /// # Errors
    ///
    /// Same as [`OAuthConfig::from_file`].
    pub fn from_file_with_prefix(
        path: impl AsRef<std::path::Path>,
        env_prefix: &str,
    ) -> Result<Self, ConfigError> {
        use config::{Config, File, FileFormat};

        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let format = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => FileFormat::Toml,
            Some("yaml") | Some("yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            _ => return Err(ConfigError::UnsupportedFormat),
        };

        let config = Config::builder()
            .add_source(File::new(
                path.to_str().ok_or(ConfigError::UnsupportedFormat)?,
                format,
            ))
            .add_source(
                config::Environment::with_prefix(env_prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Set the JWKS endpoint
    pub fn with_jwks_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.jwks_endpoint = Some(endpoint.into());
        self
    }

    /// Set the userinfo endpoint
    pub fn with_user_info_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.user_info_endpoint = Some(endpoint.into());
        self
    }

    /// Choose where extra claims come from
    pub fn with_claims_strategy(mut self, strategy: ClaimsStrategy) -> Self {
        self.claims_strategy = strategy;
        self
    }

    /// Set the extra claims cache time to live, in minutes
    pub fn with_claims_cache_ttl_minutes(mut self, minutes: u64) -> Self {
        self.claims_cache_time_to_live_minutes = minutes;
        self
    }

    /// Set the algorithm allow-list
    pub fn with_allowed_algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.allowed_algorithms = algorithms;
        self
    }

    /// Set the clock skew tolerance, in seconds
    pub fn with_clock_skew_seconds(mut self, seconds: u64) -> Self {
        self.clock_skew_seconds = seconds;
        self
    }

    /// Set the minimum interval between forced key set refreshes, in seconds
    pub fn with_jwks_min_refresh_interval_seconds(mut self, seconds: u64) -> Self {
        self.jwks_min_refresh_interval_seconds = seconds;
        self
    }

    /// Set the lookup timeout, in seconds
    pub fn with_lookup_timeout_seconds(mut self, seconds: u64) -> Self {
        self.lookup_timeout_seconds = seconds;
        self
    }

    /// Route outbound calls through a proxy
    pub fn with_proxy(mut self, url: impl Into<String>) -> Self {
        self.proxy = ProxyConfig {
            enabled: true,
            url: Some(url.into()),
        };
        self
    }

    /// Extra claims cache time to live
    pub fn claims_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.claims_cache_time_to_live_minutes * 60)
    }

    /// Clock skew tolerance
    pub fn clock_skew(&self) -> Duration {
        Duration::from_secs(self.clock_skew_seconds)
    }

    /// Key set time to live
    pub fn jwks_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.jwks_cache_time_to_live_seconds)
    }

    /// Minimum interval between forced key set refreshes
    pub fn jwks_min_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.jwks_min_refresh_interval_seconds)
    }

    /// Outbound HTTP request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Coalesced operation timeout
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout_seconds)
    }

    /// Check the configuration for values the pipeline cannot work with
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] or [`ConfigError::InvalidUrl`]
    /// describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.issuer.trim().is_empty() {
            return Err(ConfigError::Invalid("issuer must not be empty".into()));
        }
        if self.audience.trim().is_empty() {
            return Err(ConfigError::Invalid("audience must not be empty".into()));
        }
        if self.allowed_algorithms.is_empty() {
            return Err(ConfigError::Invalid(
                "allowed_algorithms must list at least one algorithm".into(),
            ));
        }
        // JWKS verification is public-key only
        if let Some(alg) = self
            .allowed_algorithms
            .iter()
            .find(|alg| matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512))
        {
            return Err(ConfigError::Invalid(format!(
                "symmetric algorithm {alg:?} cannot be used with a JWKS endpoint"
            )));
        }
        if self.claims_cache_time_to_live_minutes == 0 {
            return Err(ConfigError::Invalid(
                "claims_cache_time_to_live_minutes must be greater than zero".into(),
            ));
        }
        // A zero TTL would refetch the key set on every request, bypassing
        // the unknown kid rate limit
        if self.jwks_cache_time_to_live_seconds == 0 {
            return Err(ConfigError::Invalid(
                "jwks_cache_time_to_live_seconds must be greater than zero".into(),
            ));
        }
        if self.lookup_timeout_seconds == 0 || self.request_timeout_seconds == 0 {
            return Err(ConfigError::Invalid("timeouts must be greater than zero".into()));
        }

        require_secure_url(&self.issuer)?;
        if let Some(endpoint) = &self.jwks_endpoint {
            require_secure_url(endpoint)?;
        }
        if let Some(endpoint) = &self.user_info_endpoint {
            require_secure_url(endpoint)?;
        }
        if self.proxy.enabled {
            let url = self
                .proxy
                .url
                .as_deref()
                .ok_or_else(|| ConfigError::Invalid("proxy is enabled without a url".into()))?;
            parse_url(url)?;
        }
        Ok(())
    }
}

fn parse_url(value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|source| ConfigError::InvalidUrl {
        url: value.to_string(),
        source,
    })
}

/// HTTPS everywhere except loopback development hosts
fn require_secure_url(value: &str) -> Result<(), ConfigError> {
    let url = parse_url(value)?;
    match url.scheme() {
        "https" => Ok(()),
        "http" if matches!(url.host_str(), Some("localhost") | Some("127.0.0.1")) => Ok(()),
        _ => Err(ConfigError::Invalid(format!(
            "{value} must use HTTPS (HTTP only allowed for localhost)"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn base() -> OAuthConfig {
        OAuthConfig::new("https://issuer.example", "api://orders")
            .with_jwks_endpoint("https://issuer.example/jwks")
    }

    #[test]
    fn test_defaults() {
        let config = base();
        assert_eq!(config.claims_cache_ttl(), Duration::from_secs(30 * 60));
        assert_eq!(config.clock_skew(), Duration::from_secs(60));
        assert_eq!(config.allowed_algorithms, vec![Algorithm::RS256]);
        assert_eq!(config.claims_strategy, ClaimsStrategy::Lookup);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_symmetric_algorithms() {
        let config = base().with_allowed_algorithms(vec![Algorithm::RS256, Algorithm::HS256]);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_empty_allow_list() {
        let config = base().with_allowed_algorithms(vec![]);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_plain_http_endpoints() {
        let config = base().with_jwks_endpoint("http://issuer.example/jwks");
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let local = base().with_jwks_endpoint("http://127.0.0.1:8080/jwks");
        assert!(local.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_ttl() {
        let config = base().with_claims_cache_ttl_minutes(0);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_zero_jwks_ttl() {
        let mut config = base();
        config.jwks_cache_time_to_live_seconds = 0;
        match config.validate() {
            Err(ConfigError::Invalid(msg)) => {
                assert!(msg.contains("jwks_cache_time_to_live_seconds"))
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn test_proxy_requires_url() {
        let mut config = base();
        config.proxy.enabled = true;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = base().with_proxy("http://127.0.0.1:8888");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{
                "issuer": "https://issuer.example",
                "audience": "api://orders",
                "jwks_endpoint": "https://issuer.example/jwks",
                "claims_cache_time_to_live_minutes": 15,
                "claims_strategy": "payload",
                "allowed_algorithms": ["RS256", "ES256"]
            }}"#
        )
        .unwrap();

        let config = OAuthConfig::from_file_with_prefix(file.path(), "CLAIMSGATE_TEST_JSON").unwrap();
        assert_eq!(config.audience, "api://orders");
        assert_eq!(config.claims_cache_ttl(), Duration::from_secs(15 * 60));
        assert_eq!(config.claims_strategy, ClaimsStrategy::Payload);
        assert_eq!(
            config.allowed_algorithms,
            vec![Algorithm::RS256, Algorithm::ES256]
        );
        assert_eq!(config.clock_skew_seconds, 60);
    }

    #[test]
    #[allow(unsafe_code)] // set_var is unsafe in Rust 2024
    fn test_environment_overrides_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
issuer = "https://issuer.example"
audience = "api://orders"
jwks_endpoint = "https://issuer.example/jwks"
claims_strategy = "lookup"
"#
        )
        .unwrap();

        // Prefix unique to this test so parallel tests never see it
        unsafe {
            std::env::set_var("CLAIMSGATE_ENV_TEST_CLAIMS_STRATEGY", "payload");
            std::env::set_var("CLAIMSGATE_ENV_TEST_CLOCK_SKEW_SECONDS", "5");
            std::env::set_var("CLAIMSGATE_ENV_TEST_PROXY__ENABLED", "true");
            std::env::set_var("CLAIMSGATE_ENV_TEST_PROXY__URL", "http://127.0.0.1:8888");
        }

        let config =
            OAuthConfig::from_file_with_prefix(file.path(), "CLAIMSGATE_ENV_TEST").unwrap();

        unsafe {
            std::env::remove_var("CLAIMSGATE_ENV_TEST_CLAIMS_STRATEGY");
            std::env::remove_var("CLAIMSGATE_ENV_TEST_CLOCK_SKEW_SECONDS");
            std::env::remove_var("CLAIMSGATE_ENV_TEST_PROXY__ENABLED");
            std::env::remove_var("CLAIMSGATE_ENV_TEST_PROXY__URL");
        }

        assert_eq!(config.claims_strategy, ClaimsStrategy::Payload);
        assert_eq!(config.clock_skew_seconds, 5);
        assert!(config.proxy.enabled);
        assert_eq!(config.proxy.url.as_deref(), Some("http://127.0.0.1:8888"));
        assert_eq!(config.audience, "api://orders");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file() {
        let result = OAuthConfig::from_file("/nonexistent/claimsgate.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_unsupported_extension() {
        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        let result = OAuthConfig::from_file(file.path());
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat)));
    }
}
