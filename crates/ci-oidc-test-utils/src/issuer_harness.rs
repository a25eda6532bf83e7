//! Mock issuer for integration tests
//!
//! Provides `MockIssuer`, a wiremock server that publishes a JWKS document at
//! the issuer's key path, plus helpers to script key rotation and outages.

use crate::crypto_fixtures::{jwks_document, TestKey};
use crate::token_builders::TEST_AUDIENCE;
use ci_oidc_auth::config::{Config, JWKS_PATH};
use serde_json::Value;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Mock CI platform issuer.
///
/// # Example
/// ```rust,ignore
/// let issuer = MockIssuer::start().await;
/// issuer.serve_keys(&[TEST_KEY_ONE]).await;
///
/// let auth = Authenticator::new(issuer.config())?;
/// let token = TEST_KEY_ONE.sign(&TestClaimsBuilder::new(&issuer.url()).build())?;
/// assert!(auth.verify(&token).await.is_ok());
/// ```
pub struct MockIssuer {
    server: MockServer,
}

impl MockIssuer {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Issuer URL, as it appears in the `iss` claim.
    pub fn url(&self) -> String {
        self.server.uri()
    }

    /// Authenticator configuration pointing at this issuer.
    ///
    /// Uses a short fetch timeout so outage tests finish quickly.
    pub fn config(&self) -> Config {
        Config::new(self.url(), TEST_AUDIENCE)
            .expect("mock issuer URL is valid")
            .with_jwks_fetch_timeout(Duration::from_secs(2))
    }

    /// Publish `keys` for every subsequent fetch.
    pub async fn serve_keys(&self, keys: &[TestKey]) {
        self.serve_body(jwks_document(keys)).await;
    }

    /// Publish `keys` for the next fetch only. Takes precedence over mocks
    /// mounted with [`MockIssuer::serve_keys`] until used.
    pub async fn serve_keys_once(&self, keys: &[TestKey]) {
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks_document(keys)))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&self.server)
            .await;
    }

    /// Publish `keys` after `delay`.
    pub async fn serve_keys_delayed(&self, keys: &[TestKey], delay: Duration) {
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(jwks_document(keys))
                    .set_delay(delay),
            )
            .mount(&self.server)
            .await;
    }

    /// Serve an arbitrary JSON body with status 200.
    pub async fn serve_body(&self, body: Value) {
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    /// Answer every fetch with `status` and an empty body.
    pub async fn serve_status(&self, status: u16) {
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Drop all mounted responses and recorded requests.
    pub async fn reset(&self) {
        self.server.reset().await;
    }

    /// Number of JWKS fetches received so far.
    pub async fn jwks_fetch_count(&self) -> usize {
        self.server
            .received_requests()
            .await
            .map(|requests| {
                requests
                    .iter()
                    .filter(|r| r.url.path() == JWKS_PATH)
                    .count()
            })
            .unwrap_or(0)
    }
}
