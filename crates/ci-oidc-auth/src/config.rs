//! Authenticator configuration.
//!
//! Configuration is loaded from environment variables, or built in code with
//! [`Config::new`] and the `with_*` setters. Either way it is validated before
//! an [`Authenticator`](crate::authenticator::Authenticator) can be built from
//! it: a missing issuer or audience is a deployment error, not a per-request
//! failure.

use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default JWKS cache TTL in seconds (24 hours).
pub const DEFAULT_JWKS_CACHE_TTL_SECONDS: u64 = 86_400;

/// Default JWKS fetch timeout in seconds.
pub const DEFAULT_JWKS_FETCH_TIMEOUT_SECONDS: u64 = 10;

/// Upper bound for the JWKS fetch timeout.
pub const MAX_JWKS_FETCH_TIMEOUT_SECONDS: u64 = 60;

/// Default username that routes a login attempt to this authenticator.
pub const DEFAULT_USERNAME: &str = "gitlab-oidc";

/// Path of the issuer's published signing keys, relative to the issuer URL.
pub const JWKS_PATH: &str = "/oauth/discovery/keys";

/// Authenticator configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Issuer base URL (e.g. `https://gitlab.example.com`), trailing slashes stripped.
    pub issuer: String,

    /// Expected `aud` claim.
    pub audience: String,

    /// How long a fetched key set is trusted before it is refreshed.
    pub jwks_cache_ttl: Duration,

    /// Derive `ci:<path>` groups from the namespace and project paths.
    pub project_groups: bool,

    /// Username that selects this authenticator.
    pub username: String,

    /// Upper bound for a single JWKS fetch.
    pub jwks_fetch_timeout: Duration,

    /// Tolerance applied to `iat` and `exp`.
    pub clock_skew: Duration,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid issuer configuration: {0}")]
    InvalidIssuer(String),

    #[error("Invalid audience configuration: {0}")]
    InvalidAudience(String),

    #[error("Invalid username configuration: {0}")]
    InvalidUsername(String),

    #[error("Invalid JWKS cache TTL configuration: {0}")]
    InvalidCacheTtl(String),

    #[error("Invalid JWKS fetch timeout configuration: {0}")]
    InvalidFetchTimeout(String),

    #[error("Invalid JWT clock skew configuration: {0}")]
    InvalidClockSkew(String),

    #[error("Invalid project groups configuration: {0}")]
    InvalidProjectGroups(String),
}

/// Strip every trailing slash from an issuer URL.
///
/// The result is both the expected `iss` claim and the prefix of the JWKS URL.
pub fn normalize_issuer(issuer: &str) -> &str {
    issuer.trim_end_matches('/')
}

impl Config {
    /// Create a configuration with defaults for everything but issuer and audience.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the issuer is not an http(s) URL or the
    /// audience is empty.
    pub fn new(issuer: impl Into<String>, audience: impl Into<String>) -> Result<Self, ConfigError> {
        let issuer: String = issuer.into();
        let config = Self {
            issuer: normalize_issuer(issuer.trim()).to_string(),
            audience: audience.into(),
            jwks_cache_ttl: Duration::from_secs(DEFAULT_JWKS_CACHE_TTL_SECONDS),
            project_groups: false,
            username: DEFAULT_USERNAME.to_string(),
            jwks_fetch_timeout: Duration::from_secs(DEFAULT_JWKS_FETCH_TIMEOUT_SECONDS),
            clock_skew: DEFAULT_CLOCK_SKEW,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_jwks_cache_ttl(mut self, ttl: Duration) -> Self {
        self.jwks_cache_ttl = ttl;
        self
    }

    pub fn with_project_groups(mut self, enabled: bool) -> Self {
        self.project_groups = enabled;
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    pub fn with_jwks_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.jwks_fetch_timeout = timeout;
        self
    }

    pub fn with_clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew = skew;
        self
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let issuer = vars
            .get("CI_OIDC_ISSUER")
            .ok_or_else(|| ConfigError::MissingEnvVar("CI_OIDC_ISSUER".to_string()))?;

        let audience = vars
            .get("CI_OIDC_AUDIENCE")
            .ok_or_else(|| ConfigError::MissingEnvVar("CI_OIDC_AUDIENCE".to_string()))?;

        let mut config = Self::new(issuer.as_str(), audience.as_str())?;

        if let Some(value_str) = vars.get("CI_OIDC_JWKS_CACHE_TTL_SECONDS") {
            let value: u64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidCacheTtl(format!(
                    "CI_OIDC_JWKS_CACHE_TTL_SECONDS must be a valid positive integer, got '{}': {}",
                    value_str, e
                ))
            })?;
            config.jwks_cache_ttl = Duration::from_secs(value);
        }

        if let Some(value_str) = vars.get("CI_OIDC_PROJECT_GROUPS") {
            config.project_groups = match value_str.trim() {
                "true" | "1" => true,
                "false" | "0" | "" => false,
                other => {
                    return Err(ConfigError::InvalidProjectGroups(format!(
                        "CI_OIDC_PROJECT_GROUPS must be true or false, got '{}'",
                        other
                    )))
                }
            };
        }

        if let Some(value) = vars.get("CI_OIDC_USERNAME") {
            config.username = value.clone();
        }

        if let Some(value_str) = vars.get("CI_OIDC_JWKS_FETCH_TIMEOUT_SECONDS") {
            let value: u64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidFetchTimeout(format!(
                    "CI_OIDC_JWKS_FETCH_TIMEOUT_SECONDS must be a valid positive integer, got '{}': {}",
                    value_str, e
                ))
            })?;
            config.jwks_fetch_timeout = Duration::from_secs(value);
        }

        if let Some(value_str) = vars.get("CI_OIDC_CLOCK_SKEW_SECONDS") {
            let value: u64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidClockSkew(format!(
                    "CI_OIDC_CLOCK_SKEW_SECONDS must be a valid non-negative integer, got '{}': {}",
                    value_str, e
                ))
            })?;
            config.clock_skew = Duration::from_secs(value);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check every field. Called by [`Config::new`], [`Config::from_vars`] and
    /// again when an authenticator is built, since fields are public.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let issuer = normalize_issuer(&self.issuer);
        if issuer.is_empty() {
            return Err(ConfigError::InvalidIssuer(
                "issuer URL must not be empty".to_string(),
            ));
        }
        let url = reqwest::Url::parse(issuer).map_err(|e| {
            ConfigError::InvalidIssuer(format!("issuer must be a valid URL, got '{}': {}", issuer, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidIssuer(format!(
                "issuer must use http or https, got '{}'",
                url.scheme()
            )));
        }

        if self.audience.trim().is_empty() {
            return Err(ConfigError::InvalidAudience(
                "audience must not be empty".to_string(),
            ));
        }

        if self.username.is_empty() {
            return Err(ConfigError::InvalidUsername(
                "username must not be empty".to_string(),
            ));
        }

        if self.jwks_cache_ttl.is_zero() {
            return Err(ConfigError::InvalidCacheTtl(
                "JWKS cache TTL must be greater than 0".to_string(),
            ));
        }

        if self.jwks_fetch_timeout.is_zero()
            || self.jwks_fetch_timeout > Duration::from_secs(MAX_JWKS_FETCH_TIMEOUT_SECONDS)
        {
            return Err(ConfigError::InvalidFetchTimeout(format!(
                "JWKS fetch timeout must be between 1 and {} seconds, got {}",
                MAX_JWKS_FETCH_TIMEOUT_SECONDS,
                self.jwks_fetch_timeout.as_secs()
            )));
        }

        if self.clock_skew > MAX_CLOCK_SKEW {
            return Err(ConfigError::InvalidClockSkew(format!(
                "clock skew must not exceed {} seconds, got {}",
                MAX_CLOCK_SKEW.as_secs(),
                self.clock_skew.as_secs()
            )));
        }

        Ok(())
    }

    /// Issuer value expected in the `iss` claim.
    pub fn expected_issuer(&self) -> &str {
        normalize_issuer(&self.issuer)
    }

    /// URL of the issuer's published key set.
    pub fn jwks_url(&self) -> String {
        format!("{}{}", self.expected_issuer(), JWKS_PATH)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([
            (
                "CI_OIDC_ISSUER".to_string(),
                "https://gitlab.example.com".to_string(),
            ),
            ("CI_OIDC_AUDIENCE".to_string(), "https://registry.example.com".to_string()),
        ])
    }

    #[test]
    fn test_from_vars_with_defaults() {
        let config = Config::from_vars(&base_vars()).expect("Config should load successfully");

        assert_eq!(config.issuer, "https://gitlab.example.com");
        assert_eq!(config.audience, "https://registry.example.com");
        assert_eq!(config.jwks_cache_ttl, Duration::from_secs(86_400));
        assert!(!config.project_groups);
        assert_eq!(config.username, "gitlab-oidc");
        assert_eq!(config.jwks_fetch_timeout, Duration::from_secs(10));
        assert_eq!(config.clock_skew, Duration::ZERO);
    }

    #[test]
    fn test_from_vars_with_custom_values() {
        let mut vars = base_vars();
        vars.insert("CI_OIDC_JWKS_CACHE_TTL_SECONDS".to_string(), "3600".to_string());
        vars.insert("CI_OIDC_PROJECT_GROUPS".to_string(), "true".to_string());
        vars.insert("CI_OIDC_USERNAME".to_string(), "ci-bot".to_string());
        vars.insert("CI_OIDC_JWKS_FETCH_TIMEOUT_SECONDS".to_string(), "3".to_string());
        vars.insert("CI_OIDC_CLOCK_SKEW_SECONDS".to_string(), "30".to_string());

        let config = Config::from_vars(&vars).unwrap();

        assert_eq!(config.jwks_cache_ttl, Duration::from_secs(3600));
        assert!(config.project_groups);
        assert_eq!(config.username, "ci-bot");
        assert_eq!(config.jwks_fetch_timeout, Duration::from_secs(3));
        assert_eq!(config.clock_skew, Duration::from_secs(30));
    }

    #[test]
    fn test_missing_issuer_is_fatal() {
        let mut vars = base_vars();
        vars.remove("CI_OIDC_ISSUER");

        let err = Config::from_vars(&vars).unwrap_err();
        assert_eq!(err, ConfigError::MissingEnvVar("CI_OIDC_ISSUER".to_string()));
    }

    #[test]
    fn test_missing_audience_is_fatal() {
        let mut vars = base_vars();
        vars.remove("CI_OIDC_AUDIENCE");

        let err = Config::from_vars(&vars).unwrap_err();
        assert_eq!(err, ConfigError::MissingEnvVar("CI_OIDC_AUDIENCE".to_string()));
    }

    #[test]
    fn test_empty_audience_is_fatal() {
        let result = Config::new("https://gitlab.example.com", "  ");
        assert!(matches!(result, Err(ConfigError::InvalidAudience(_))));
    }

    #[test]
    fn test_trailing_slashes_are_stripped() {
        let config = Config::new("https://gitlab.example.com///", "aud").unwrap();

        assert_eq!(config.issuer, "https://gitlab.example.com");
        assert_eq!(config.expected_issuer(), "https://gitlab.example.com");
        assert_eq!(
            config.jwks_url(),
            "https://gitlab.example.com/oauth/discovery/keys"
        );
    }

    #[test]
    fn test_issuer_with_path_prefix() {
        let config = Config::new("https://example.com/gitlab/", "aud").unwrap();
        assert_eq!(
            config.jwks_url(),
            "https://example.com/gitlab/oauth/discovery/keys"
        );
    }

    #[test]
    fn test_expected_issuer_normalizes_public_field() {
        let mut config = Config::new("https://gitlab.example.com", "aud").unwrap();
        config.issuer = "https://gitlab.example.com/".to_string();
        assert_eq!(config.expected_issuer(), "https://gitlab.example.com");
    }

    #[test]
    fn test_invalid_issuers_rejected() {
        for issuer in ["", "/", "not a url", "ftp://gitlab.example.com"] {
            let result = Config::new(issuer, "aud");
            assert!(
                matches!(result, Err(ConfigError::InvalidIssuer(_))),
                "issuer {issuer:?} should be rejected, got {result:?}"
            );
        }
    }

    #[test]
    fn test_invalid_cache_ttl() {
        let mut vars = base_vars();
        vars.insert("CI_OIDC_JWKS_CACHE_TTL_SECONDS".to_string(), "abc".to_string());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidCacheTtl(_))
        ));

        vars.insert("CI_OIDC_JWKS_CACHE_TTL_SECONDS".to_string(), "0".to_string());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidCacheTtl(_))
        ));
    }

    #[test]
    fn test_invalid_project_groups_flag() {
        let mut vars = base_vars();
        vars.insert("CI_OIDC_PROJECT_GROUPS".to_string(), "yes".to_string());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidProjectGroups(_))
        ));
    }

    #[test]
    fn test_project_groups_numeric_flag() {
        let mut vars = base_vars();
        vars.insert("CI_OIDC_PROJECT_GROUPS".to_string(), "1".to_string());
        assert!(Config::from_vars(&vars).unwrap().project_groups);

        vars.insert("CI_OIDC_PROJECT_GROUPS".to_string(), "0".to_string());
        assert!(!Config::from_vars(&vars).unwrap().project_groups);
    }

    #[test]
    fn test_fetch_timeout_bounds() {
        let mut vars = base_vars();
        vars.insert("CI_OIDC_JWKS_FETCH_TIMEOUT_SECONDS".to_string(), "0".to_string());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidFetchTimeout(_))
        ));

        vars.insert("CI_OIDC_JWKS_FETCH_TIMEOUT_SECONDS".to_string(), "61".to_string());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidFetchTimeout(_))
        ));

        vars.insert("CI_OIDC_JWKS_FETCH_TIMEOUT_SECONDS".to_string(), "60".to_string());
        assert!(Config::from_vars(&vars).is_ok());
    }

    #[test]
    fn test_clock_skew_bounds() {
        let mut vars = base_vars();
        vars.insert("CI_OIDC_CLOCK_SKEW_SECONDS".to_string(), "601".to_string());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidClockSkew(_))
        ));

        vars.insert("CI_OIDC_CLOCK_SKEW_SECONDS".to_string(), "-5".to_string());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidClockSkew(_))
        ));

        vars.insert("CI_OIDC_CLOCK_SKEW_SECONDS".to_string(), "600".to_string());
        assert!(Config::from_vars(&vars).is_ok());
    }

    #[test]
    fn test_empty_username_rejected() {
        let mut vars = base_vars();
        vars.insert("CI_OIDC_USERNAME".to_string(), String::new());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidUsername(_))
        ));
    }

    #[test]
    fn test_builder_setters_validated() {
        let config = Config::new("https://gitlab.example.com", "aud")
            .unwrap()
            .with_jwks_cache_ttl(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidCacheTtl(_))
        ));
    }
}
