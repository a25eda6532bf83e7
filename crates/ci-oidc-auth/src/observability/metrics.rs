//! Metrics definitions for the CI OIDC authenticator.
//!
//! All metrics follow Prometheus naming conventions:
//! - `ci_oidc_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `outcome`: `success` or one of the [`VerifyError::reason`] labels (8 values)
//! - `status`: `success`, `error`, `timeout` (3 values)
//! - `result`: `hit`, `miss`, `stale` (3 values)
//!
//! Subjects, project paths and key IDs are never used as labels.

use crate::errors::VerifyError;
use metrics::{counter, histogram};
use std::time::Duration;

/// Record the outcome of one token verification.
///
/// Metric: `ci_oidc_verifications_total`, `ci_oidc_verification_duration_seconds`
/// Labels: `outcome`
pub fn record_verification(result: Result<(), &VerifyError>, duration: Duration) {
    let outcome = match result {
        Ok(()) => "success",
        Err(e) => e.reason(),
    };

    histogram!("ci_oidc_verification_duration_seconds", "outcome" => outcome)
        .record(duration.as_secs_f64());

    counter!("ci_oidc_verifications_total", "outcome" => outcome).increment(1);
}

/// Record a JWKS fetch against the issuer.
///
/// Metric: `ci_oidc_jwks_fetches_total`, `ci_oidc_jwks_fetch_duration_seconds`
/// Labels: `status`
pub fn record_jwks_fetch(status: &'static str, duration: Duration) {
    histogram!("ci_oidc_jwks_fetch_duration_seconds", "status" => status)
        .record(duration.as_secs_f64());

    counter!("ci_oidc_jwks_fetches_total", "status" => status).increment(1);
}

/// Record a JWKS cache lookup.
///
/// Metric: `ci_oidc_jwks_cache_total`
/// Labels: `result`
pub fn record_jwks_cache(result: &'static str) {
    counter!("ci_oidc_jwks_cache_total", "result" => result).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    // No recorder is installed, so these only prove the calls are cheap no-ops.
    #[test]
    fn test_record_without_recorder() {
        record_verification(Ok(()), Duration::from_millis(3));
        record_verification(Err(&VerifyError::BadSignature), Duration::from_millis(1));
        record_jwks_fetch("success", Duration::from_millis(20));
        record_jwks_cache("hit");
    }
}
