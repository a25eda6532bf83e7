//! Boundary adapter between a host's username/password login chain and the
//! token verification pipeline.
//!
//! The host calls [`Authenticator::authenticate`] with whatever credentials
//! it received. Attempts for other usernames are handed back untouched
//! ([`AuthDecision::PassThrough`]) so the host can try its next
//! authenticator. For the configured username the password is the CI job
//! token; every internal failure collapses to [`AuthDecision::Rejected`] and
//! the reason is only logged and counted.

use crate::auth::jwks::JwksClient;
use crate::auth::jwt::JwtValidator;
use crate::config::{Config, ConfigError};
use crate::errors::VerifyError;
use crate::groups::{derive_groups, GroupSet};
use crate::observability::metrics;
use common::secret::{ExposeSecret, SecretString};
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

/// Outcome reported to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    /// Not our username; the host should fall through to its next authenticator.
    PassThrough,
    /// Token verified; the job belongs to these groups.
    Authenticated(GroupSet),
    /// Token rejected. Deliberately carries no reason.
    Rejected,
}

/// CI job token authenticator for one issuer.
pub struct Authenticator {
    config: Config,
    jwks_client: Arc<JwksClient>,
    validator: JwtValidator,
}

impl Authenticator {
    /// Build an authenticator from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the configuration is invalid; a misconfigured
    /// deployment never gets an authenticator that rejects everything.
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        config.validate()?;

        let jwks_client = Arc::new(JwksClient::with_options(
            config.jwks_url(),
            config.jwks_cache_ttl,
            config.jwks_fetch_timeout,
        ));
        let validator = JwtValidator::new(
            Arc::clone(&jwks_client),
            config.expected_issuer().to_string(),
            config.audience.clone(),
            config.clock_skew,
        );

        tracing::info!(
            target: "ci_oidc.authenticator",
            issuer = %config.expected_issuer(),
            username = %config.username,
            project_groups = config.project_groups,
            "CI OIDC authenticator configured"
        );

        Ok(Self {
            config,
            jwks_client,
            validator,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Key source shared by this authenticator's verifications.
    pub fn jwks_client(&self) -> &Arc<JwksClient> {
        &self.jwks_client
    }

    /// Whether a login attempt for `username` belongs to this authenticator.
    pub fn handles(&self, username: &str) -> bool {
        username == self.config.username
    }

    /// Host-facing entry point.
    #[instrument(skip_all)]
    pub async fn authenticate(&self, username: &str, password: &SecretString) -> AuthDecision {
        if !self.handles(username) {
            return AuthDecision::PassThrough;
        }

        match self.verify(password.expose_secret()).await {
            Ok(groups) => AuthDecision::Authenticated(groups),
            Err(_) => AuthDecision::Rejected,
        }
    }

    /// Verify a job token and derive its groups, keeping the failure reason.
    ///
    /// # Errors
    ///
    /// Returns the [`VerifyError`] of the first stage that rejected the token.
    pub async fn verify(&self, token: &str) -> Result<GroupSet, VerifyError> {
        let started = Instant::now();

        let result = self
            .validator
            .validate_claims(token)
            .await
            .map(|claims| {
                let groups = derive_groups(&claims, self.config.project_groups);
                tracing::info!(
                    target: "ci_oidc.authenticator",
                    project_path = %claims.project_path,
                    ref_type = %claims.ref_type,
                    ref_protected = claims.ref_protected,
                    pipeline_source = %claims.pipeline_source,
                    group_count = groups.len(),
                    "CI job authenticated"
                );
                groups
            });

        metrics::record_verification(result.as_ref().map(|_| ()), started.elapsed());

        if let Err(e) = &result {
            match e {
                VerifyError::KeySourceUnavailable => tracing::warn!(
                    target: "ci_oidc.authenticator",
                    reason = e.reason(),
                    "CI job token rejected: issuer keys unavailable"
                ),
                VerifyError::ClaimValidation(field) => tracing::debug!(
                    target: "ci_oidc.authenticator",
                    reason = e.reason(),
                    claim = %field,
                    "CI job token rejected"
                ),
                VerifyError::ClaimShapeError(field) => tracing::debug!(
                    target: "ci_oidc.authenticator",
                    reason = e.reason(),
                    claim = field,
                    "CI job token rejected"
                ),
                _ => tracing::debug!(
                    target: "ci_oidc.authenticator",
                    reason = e.reason(),
                    "CI job token rejected"
                ),
            }
        }

        result
    }
}
