//! claimsgate demo - validate a bearer token from the command line
//!
//! Loads an [`OAuthConfig`] file, builds the authorizer once (the way a
//! service would at startup), validates the token and prints the resulting
//! claims principal as JSON on stdout. Logs go to stderr.
//!
//! ```text
//! RUST_LOG=claimsgate=debug claimsgate-demo --config demo/api.config.toml --token "$TOKEN"
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use claimsgate::{
    AuthError, AuthResult, ClaimsAuthorizer, ExtraClaimsProvider, OAuthConfig, TokenClaims,
    UserInfoClaims,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Command line arguments
#[derive(Parser)]
#[command(
    name = "claimsgate-demo",
    version,
    about = "Validate a bearer token and print its claims principal"
)]
struct Cli {
    /// Configuration file (.toml, .yaml, .yml or .json)
    #[arg(long, short = 'c', default_value = "api.config.toml")]
    config: PathBuf,

    /// Bearer token to validate
    #[arg(long, short = 't', env = "CLAIMSGATE_TOKEN", hide_env_values = true)]
    token: String,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

impl std::fmt::Debug for Cli {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cli")
            .field("config", &self.config)
            .field("token", &"[REDACTED]")
            .field("json_logs", &self.json_logs)
            .finish()
    }
}

/// Business claims for the orders API
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccountClaims {
    #[serde(rename = "accountId")]
    account_id: String,
}

/// Resolves the orders account for a user
///
/// A real deployment would query its own data store here.
#[derive(Debug, Default)]
struct AccountClaimsProvider;

impl AccountClaimsProvider {
    fn account_for(subject: &str) -> AuthResult<AccountClaims> {
        match subject {
            "" => Err(AuthError::missing_claim("accountId")),
            _ => Ok(AccountClaims {
                account_id: format!("A-{}", 100 + subject.len()),
            }),
        }
    }
}

#[async_trait]
impl ExtraClaimsProvider for AccountClaimsProvider {
    type Claims = AccountClaims;

    async fn issue_at_token_creation(&self, subject: &str, _email: &str) -> AuthResult<AccountClaims> {
        Self::account_for(subject)
    }

    fn claims_from_payload(&self, token: &TokenClaims) -> AuthResult<AccountClaims> {
        Ok(AccountClaims {
            account_id: token.claim("accountId")?,
        })
    }

    async fn claims_from_lookup(
        &self,
        _raw_token: &str,
        token: &TokenClaims,
        user_info: Option<&UserInfoClaims>,
    ) -> AuthResult<AccountClaims> {
        let subject = user_info.map_or(token.subject(), |info| info.sub.as_str());
        Self::account_for(subject)
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = OAuthConfig::from_file(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let authorizer = ClaimsAuthorizer::from_config(&config, AccountClaimsProvider)
        .await
        .context("building the claims authorizer")?;

    match authorizer.validate(&cli.token).await {
        Ok(principal) => {
            info!(subject = %principal.subject(), "Token accepted");
            println!("{}", serde_json::to_string_pretty(&principal)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            error!(
                code = e.error_code(),
                status = %e.status_code(),
                error = %e,
                "Token rejected"
            );
            Ok(ExitCode::FAILURE)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{e:#}"), "claimsgate-demo failed");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from([
            "claimsgate-demo",
            "--config",
            "api.config.toml",
            "--token",
            "eyJ...",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("api.config.toml"));
        assert!(!cli.json_logs);
    }

    #[test]
    fn test_cli_debug_redacts_token() {
        let cli = Cli::try_parse_from(["claimsgate-demo", "--token", "eyJhbGciOi.secret.sig"])
            .unwrap();
        let debug = format!("{cli:?}");
        assert!(!debug.contains("eyJhbGciOi.secret.sig"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_sample_config_loads() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(include_bytes!("../api.config.toml")).unwrap();

        let config = OAuthConfig::from_file_with_prefix(file.path(), "CLAIMSGATE_DEMO_TEST").unwrap();
        config.validate().unwrap();
        assert_eq!(config.audience, "api://orders");
        assert_eq!(config.cache_sweep_interval_seconds, Some(300));
    }

    #[tokio::test]
    async fn test_provider_resolves_account() {
        let provider = AccountClaimsProvider;
        let claims = provider.issue_at_token_creation("user-42", "").await.unwrap();
        assert_eq!(claims.account_id, "A-107");
        assert!(provider.issue_at_token_creation("", "").await.is_err());
    }
}
