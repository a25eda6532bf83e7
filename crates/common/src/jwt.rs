//! JWT utilities shared across the CI OIDC crates.
//!
//! This module provides the pre-verification and post-verification checks that
//! do not depend on a key:
//! - Size limits for DoS prevention
//! - Clock skew bounds for time-claim validation
//! - Header parsing (`alg` and `kid`) without signature verification
//! - `iat` / `exp` validation against an explicit `now`
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - Header values are untrusted until the signature has been verified; `kid`
//!   is only ever used as a lookup key into a trusted JWKS
//! - Generic error messages prevent information leakage
//!
//! # Usage
//!
//! ```rust,ignore
//! use common::jwt::{parse_header, validate_exp, validate_iat};
//!
//! let header = parse_header(token)?;
//! let jwk = jwks_client.get_key(&header.kid).await?;
//! // ... verify signature ...
//! validate_iat(claims.iat, clock_skew)?;
//! validate_exp(claims.exp, clock_skew)?;
//! ```

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum allowed JWT size in bytes (8KB).
///
/// CI job tokens are typically 900-1200 bytes (RS256 signature plus the
/// pipeline claims). Anything larger than this is rejected BEFORE base64
/// decoding or signature verification.
pub const MAX_JWT_SIZE_BYTES: usize = 8192; // 8KB

/// Default JWT clock skew tolerance.
///
/// Zero: `iat <= now < exp` is enforced exactly unless the deployment opts in
/// to a tolerance.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(0);

/// Maximum allowed JWT clock skew tolerance (10 minutes).
///
/// Prevents misconfiguration that would let long-expired tokens through.
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during key-independent JWT validation.
///
/// Note: Error messages are intentionally generic to prevent information leakage.
/// Detailed information is logged at debug level for troubleshooting.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token size exceeds maximum allowed.
    #[error("The access token is invalid or expired")]
    TokenTooLarge,

    /// Token format is invalid (not a valid JWT structure).
    #[error("The access token is invalid or expired")]
    MalformedToken,

    /// Token header is missing the `alg` field.
    #[error("The access token is invalid or expired")]
    MissingAlgorithm,

    /// Token header is missing the `kid` field.
    #[error("The access token is invalid or expired")]
    MissingKid,

    /// Token `iat` claim is in the future (beyond clock skew).
    #[error("The access token is invalid or expired")]
    IatInFuture,

    /// Token `exp` claim has passed (beyond clock skew).
    #[error("The access token is invalid or expired")]
    Expired,
}

// =============================================================================
// Header
// =============================================================================

/// The two header fields needed before a key can be selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenHeader {
    /// Declared signature algorithm, verbatim (e.g. `RS256`).
    pub alg: String,

    /// Key identifier used for JWKS lookup.
    pub kid: String,
}

#[derive(Deserialize)]
struct RawHeader {
    #[serde(default)]
    alg: Option<serde_json::Value>,
    #[serde(default)]
    kid: Option<serde_json::Value>,
}

/// Parse the `alg` and `kid` header fields of a compact JWT without verifying it.
///
/// `alg` is returned as the raw string so that callers can reject algorithms
/// `jsonwebtoken` does not even model (such as `none`) with a precise reason.
///
/// # Errors
///
/// - `TokenTooLarge` - Token exceeds `MAX_JWT_SIZE_BYTES`
/// - `MalformedToken` - Not three dot-separated parts, bad base64url, or the
///   header is not a JSON object
/// - `MissingAlgorithm` - `alg` absent, empty or not a string
/// - `MissingKid` - `kid` absent, empty or not a string
pub fn parse_header(token: &str) -> Result<TokenHeader, JwtValidationError> {
    // Check token size first (DoS prevention)
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }

    // JWT format: header.payload.signature
    let mut parts = token.split('.');
    let (Some(header_part), Some(payload_part), Some(signature_part), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        tracing::debug!(target: "common.jwt", "Token rejected: invalid JWT format");
        return Err(JwtValidationError::MalformedToken);
    };

    if header_part.is_empty() || payload_part.is_empty() || signature_part.is_empty() {
        tracing::debug!(target: "common.jwt", "Token rejected: empty JWT segment");
        return Err(JwtValidationError::MalformedToken);
    }

    let header_bytes = URL_SAFE_NO_PAD.decode(header_part).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to decode JWT header base64");
        JwtValidationError::MalformedToken
    })?;

    let header: RawHeader = serde_json::from_slice(&header_bytes).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to parse JWT header JSON");
        JwtValidationError::MalformedToken
    })?;

    let alg = non_empty_string(header.alg).ok_or(JwtValidationError::MissingAlgorithm)?;
    let kid = non_empty_string(header.kid).ok_or(JwtValidationError::MissingKid)?;

    Ok(TokenHeader { alg, kid })
}

fn non_empty_string(value: Option<serde_json::Value>) -> Option<String> {
    match value {
        Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s),
        _ => None,
    }
}

// =============================================================================
// Time claims
// =============================================================================

/// Validate the `iat` (issued-at) claim against the current time.
///
/// # Errors
///
/// Returns `JwtValidationError::IatInFuture` if `iat` is later than
/// `now + clock_skew`.
pub fn validate_iat(iat: i64, clock_skew: Duration) -> Result<(), JwtValidationError> {
    validate_iat_at(iat, clock_skew, chrono::Utc::now().timestamp())
}

/// Deterministic `iat` validation against an explicit `now` timestamp.
///
/// # Errors
///
/// Returns `JwtValidationError::IatInFuture` if `iat > now + clock_skew`.
pub fn validate_iat_at(iat: i64, clock_skew: Duration, now: i64) -> Result<(), JwtValidationError> {
    let max_iat = now.saturating_add(skew_secs(clock_skew));

    if iat > max_iat {
        tracing::debug!(
            target: "common.jwt",
            iat = iat,
            now = now,
            max_allowed = max_iat,
            "Token rejected: iat is in the future"
        );
        return Err(JwtValidationError::IatInFuture);
    }

    Ok(())
}

/// Validate the `exp` (expiry) claim against the current time.
///
/// # Errors
///
/// Returns `JwtValidationError::Expired` if `now >= exp + clock_skew`.
pub fn validate_exp(exp: i64, clock_skew: Duration) -> Result<(), JwtValidationError> {
    validate_exp_at(exp, clock_skew, chrono::Utc::now().timestamp())
}

/// Deterministic `exp` validation against an explicit `now` timestamp.
///
/// The token is valid strictly before `exp`; `now == exp` is already expired.
///
/// # Errors
///
/// Returns `JwtValidationError::Expired` if `now >= exp + clock_skew`.
pub fn validate_exp_at(exp: i64, clock_skew: Duration, now: i64) -> Result<(), JwtValidationError> {
    let deadline = exp.saturating_add(skew_secs(clock_skew));

    if now >= deadline {
        tracing::debug!(
            target: "common.jwt",
            exp = exp,
            now = now,
            "Token rejected: expired"
        );
        return Err(JwtValidationError::Expired);
    }

    Ok(())
}

fn skew_secs(clock_skew: Duration) -> i64 {
    i64::try_from(clock_skew.as_secs()).unwrap_or(i64::MAX)
}

// =============================================================================
// Tests
// =============================================================================
