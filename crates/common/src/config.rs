//! Logging configuration shared by CI OIDC binaries.
//!
//! Library crates only emit `tracing` events; installing a subscriber is the
//! job of whichever binary hosts them.

use std::collections::HashMap;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable holding the log filter directive.
pub const LOG_FILTER_ENV: &str = "RUST_LOG";

/// Environment variable that switches to JSON-formatted logs.
pub const LOG_JSON_ENV: &str = "CI_OIDC_LOG_JSON";

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// `EnvFilter` directive (e.g. `ci_oidc_auth=debug`).
    pub filter: String,
    /// Emit JSON lines instead of the human-readable format.
    pub json: bool,
}

impl LogConfig {
    /// Build the logging configuration from a variable map.
    ///
    /// `default_filter` is used when `RUST_LOG` is unset or empty. Any value
    /// of `CI_OIDC_LOG_JSON` other than `true`/`1` keeps plain-text output.
    #[must_use]
    pub fn from_vars(vars: &HashMap<String, String>, default_filter: &str) -> Self {
        let filter = vars
            .get(LOG_FILTER_ENV)
            .filter(|v| !v.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| default_filter.to_string());

        let json = vars
            .get(LOG_JSON_ENV)
            .is_some_and(|v| matches!(v.trim(), "true" | "1"));

        Self { filter, json }
    }

    /// Install the global `tracing` subscriber, writing to stderr.
    ///
    /// Returns `false` if a subscriber was already installed (e.g. by a test
    /// harness); the existing one is kept.
    #[must_use]
    pub fn init_tracing(&self) -> bool {
        let filter = EnvFilter::try_new(&self.filter).unwrap_or_else(|_| EnvFilter::new("info"));
        let registry = tracing_subscriber::registry().with(filter);

        if self.json {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .try_init()
                .is_ok()
        } else {
            registry
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .try_init()
                .is_ok()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_unset() {
        let config = LogConfig::from_vars(&HashMap::new(), "ci_oidc_auth=info");
        assert_eq!(config.filter, "ci_oidc_auth=info");
        assert!(!config.json);
    }

    #[test]
    fn test_reads_filter_and_json_flag() {
        let vars = HashMap::from([
            (LOG_FILTER_ENV.to_string(), "debug".to_string()),
            (LOG_JSON_ENV.to_string(), "true".to_string()),
        ]);
        let config = LogConfig::from_vars(&vars, "info");
        assert_eq!(config.filter, "debug");
        assert!(config.json);
    }

    #[test]
    fn test_blank_filter_falls_back_to_default() {
        let vars = HashMap::from([
            (LOG_FILTER_ENV.to_string(), "  ".to_string()),
            (LOG_JSON_ENV.to_string(), "yes".to_string()),
        ]);
        let config = LogConfig::from_vars(&vars, "warn");
        assert_eq!(config.filter, "warn");
        assert!(!config.json);
    }

    #[test]
    fn test_second_init_reports_existing_subscriber() {
        let config = LogConfig::from_vars(&HashMap::new(), "common=debug");
        // The first call may lose to another test in this process.
        let _ = config.init_tracing();
        assert!(!config.init_tracing());
    }
}
