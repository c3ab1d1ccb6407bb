//! Common test utilities for integration tests
//!
//! A wiremock issuer serving JWKS, metadata and userinfo, two checked-in RSA
//! signing keys, and a counting extra claims provider.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use claimsgate::{
    AuthError, AuthResult, ClaimsAuthorizer, ClaimsCache, ExtraClaimsProvider, SigningKeyStore,
    TokenClaims, TokenValidator, UserInfoClaims, UserInfoClient,
};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const ISSUER: &str = "https://issuer.example";
pub const AUDIENCE: &str = "api://orders";

const KEY_A_PEM: &str = include_str!("../fixtures/signing_key_a.pem");
const KEY_B_PEM: &str = include_str!("../fixtures/signing_key_b.pem");

const KEY_A_MODULUS: &str = "pwwJDdg5MUaxbm78nJj51ESmABnRwG-v3mnd9pzkNXc2S74REqb03L3r_SZXavIVi4_kM0f1h0n4dYu9UID7p1WkBkzKrh55JYWmWwgeV-mFA2H99u93uUYuceL9sLigvTeK26OhFBtfSpqHk3tkRn6jhX4pdH60yQHWtzHOYO77JUczPH2ScGzw0uPztNmqp3Lw0-Tt5GpRkppH3XXAJBcERF218E63bKQQdsDuJCk3H9XV440gOUaaNiEVf8rgZhALssuBVzWO0gl30IbgTcM4MVmHW7KOFnCGHBSyn9E3hJ-O95T8YNjzM8mTRjYhkFxeGZUfzxg1qrLjHoIQWQ";
const KEY_B_MODULUS: &str = "uD-CZYsD36_fpys-PM8hTdxMc0QrAd8htktc87ZNT-_lgrkr2jYU1dn1jpWutKE-Hns3RDidgMuATwITRYZrJX4rG4NYSjjgGWeAsjXe5RF3XgC_Qce5EzVNMFw5CVYU1tRHlpOrnr5h3UVtRfJ_LVgpqzUxHb2igelx7uFqV5Ke075J2KPGEJ6XdDSep5P7FO7Kv5X61pg5aobD1dprU4rlau0pz4MEj4yQ4Gx9SCbv-FESZ0OAQxU0rdkxigRkQWwaqyvHv7cZ-Fs4VLMlheMTVghfmxsFf20iy4qdLa3_39coA5xyGy0_eX0HyIuhS2olEgK-7Yi1oUqsW5-MHw";

/// One of the two checked-in RSA test keys
#[derive(Debug, Clone, Copy)]
pub enum TestKey {
    A,
    B,
}

impl TestKey {
    fn pem(self) -> &'static str {
        match self {
            Self::A => KEY_A_PEM,
            Self::B => KEY_B_PEM,
        }
    }

    fn modulus(self) -> &'static str {
        match self {
            Self::A => KEY_A_MODULUS,
            Self::B => KEY_B_MODULUS,
        }
    }

    /// Public JWK for this key, published under `kid`
    pub fn jwk(self, kid: &str) -> Value {
        json!({
            "kty": "RSA",
            "kid": kid,
            "use": "sig",
            "alg": "RS256",
            "n": self.modulus(),
            "e": "AQAB"
        })
    }
}

/// Mock authorization server
pub struct MockIssuer {
    pub server: MockServer,
    pub jwks_endpoint: String,
    pub user_info_endpoint: String,
}

impl MockIssuer {
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let base_url = server.uri();

        Self {
            server,
            jwks_endpoint: format!("{}/jwks", base_url),
            user_info_endpoint: format!("{}/userinfo", base_url),
        }
    }

    /// Serve a JWKS, expecting exactly `calls` downloads when given
    pub async fn mock_jwks(&self, keys: Vec<Value>, calls: Option<u64>) {
        let mut mock = Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": keys })));
        if let Some(calls) = calls {
            mock = mock.expect(calls);
        }
        mock.mount(&self.server).await;
    }

    /// Serve a delayed JWKS so concurrent callers overlap
    pub async fn mock_slow_jwks(&self, keys: Vec<Value>, delay: Duration, calls: u64) {
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "keys": keys }))
                    .set_delay(delay),
            )
            .expect(calls)
            .mount(&self.server)
            .await;
    }

    /// JWKS endpoint failing with `status` for the next `times` calls
    pub async fn mock_jwks_failure(&self, status: u16, times: u64) {
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(status))
            .up_to_n_times(times)
            .expect(times)
            .mount(&self.server)
            .await;
    }

    /// Userinfo endpoint returning `body`, expecting exactly `calls` requests
    pub async fn mock_user_info(&self, body: Value, delay: Duration, calls: u64) {
        Mock::given(method("POST"))
            .and(path("/userinfo"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(body)
                    .set_delay(delay),
            )
            .expect(calls)
            .mount(&self.server)
            .await;
    }

    pub async fn mock_user_info_status(&self, status: u16, calls: u64) {
        Mock::given(method("POST"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(status))
            .expect(calls)
            .mount(&self.server)
            .await;
    }

    /// OIDC metadata for an issuer identified by this server's URI
    pub async fn mock_metadata(&self) {
        let base_url = self.server.uri();
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "issuer": base_url,
                "jwks_uri": self.jwks_endpoint,
                "userinfo_endpoint": self.user_info_endpoint,
            })))
            .expect(1)
            .mount(&self.server)
            .await;
    }

    /// Signing key store for this server's JWKS, without refresh rate limiting
    pub fn key_store(&self) -> Arc<SigningKeyStore> {
        Arc::new(
            SigningKeyStore::new(self.jwks_endpoint.clone(), reqwest::Client::new())
                .with_min_refresh_interval(Duration::ZERO),
        )
    }

    pub fn validator(&self) -> TokenValidator {
        TokenValidator::new(ISSUER, AUDIENCE, self.key_store())
    }

    /// Lookup-strategy authorizer calling this server's userinfo endpoint
    pub fn lookup_authorizer(&self, provider: AccountProvider) -> ClaimsAuthorizer<AccountProvider> {
        ClaimsAuthorizer::with_claims_lookup(
            self.validator(),
            Arc::new(provider),
            Arc::new(ClaimsCache::new()),
            Some(UserInfoClient::new(
                self.user_info_endpoint.clone(),
                reqwest::Client::new(),
            )),
        )
    }
}

/// Get current Unix timestamp
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_secs()
}

/// Standard claims for the orders API, expiring `exp_offset_secs` from now
pub fn token_claims(sub: &str, scope: &str, exp_offset_secs: i64) -> Value {
    let now = current_timestamp();
    json!({
        "sub": sub,
        "iss": ISSUER,
        "aud": AUDIENCE,
        "exp": (now as i64 + exp_offset_secs) as u64,
        "iat": now,
        "scope": scope,
    })
}

/// Sign `claims` with an RSA test key under header `kid`
pub fn sign_token(claims: &Value, key: TestKey, kid: &str) -> String {
    sign_token_with(claims, key, kid, Algorithm::RS256)
}

pub fn sign_token_with(claims: &Value, key: TestKey, kid: &str, algorithm: Algorithm) -> String {
    let encoding_key =
        EncodingKey::from_rsa_pem(key.pem().as_bytes()).expect("Invalid RSA test key");
    let mut header = Header::new(algorithm);
    header.typ = Some("JWT".to_string());
    header.kid = Some(kid.to_string());
    encode(&header, claims, &encoding_key).expect("Failed to encode test JWT")
}

/// HS256 token under `kid`, signed with a shared secret
pub fn sign_hs256_token(claims: &Value, kid: &str) -> String {
    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some(kid.to_string());
    encode(&header, claims, &EncodingKey::from_secret(b"shared-secret"))
        .expect("Failed to encode HS256 test JWT")
}

/// Change one character in the middle of the signature segment
pub fn tamper_signature(token: &str) -> String {
    let at = token.rfind('.').expect("not a JWT") + 10;
    let mut bytes = token.as_bytes().to_vec();
    bytes[at] = if bytes[at] == b'A' { b'B' } else { b'A' };
    String::from_utf8(bytes).expect("JWT is ASCII")
}

/// Extra claims for the orders API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    #[serde(rename = "accountId")]
    pub account_id: String,
}

/// Provider resolving account A-100 and counting lookups
#[derive(Debug, Clone, Default)]
pub struct AccountProvider {
    pub lookups: Arc<AtomicUsize>,
    pub delay: Duration,
}

impl AccountProvider {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            lookups: Arc::new(AtomicUsize::new(0)),
            delay,
        }
    }

    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExtraClaimsProvider for AccountProvider {
    type Claims = Account;

    async fn issue_at_token_creation(&self, _subject: &str, email: &str) -> AuthResult<Account> {
        if email.is_empty() {
            return Err(AuthError::missing_claim("email"));
        }
        Ok(Account {
            account_id: "A-100".to_string(),
        })
    }

    fn claims_from_payload(&self, token: &TokenClaims) -> AuthResult<Account> {
        Ok(Account {
            account_id: token.claim("accountId")?,
        })
    }

    async fn claims_from_lookup(
        &self,
        _raw_token: &str,
        token: &TokenClaims,
        user_info: Option<&UserInfoClaims>,
    ) -> AuthResult<Account> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(info) = user_info
            && info.sub != token.subject()
        {
            return Err(AuthError::InvalidToken(
                "userinfo subject does not match token".into(),
            ));
        }
        Ok(Account {
            account_id: "A-100".to_string(),
        })
    }
}
