//! Verification error taxonomy.
//!
//! Every variant renders the same generic message so that nothing about the
//! failing stage leaks to a client. The variants themselves stay distinct for
//! logging, metrics and tests; [`VerifyError::reason`] is the bounded label
//! used for both.

use std::fmt;
use thiserror::Error;

/// Registered claim that failed trust validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClaimField {
    /// `iss` does not equal the configured issuer.
    Issuer,
    /// `aud` is not exactly the configured audience.
    Audience,
    /// `iat` is missing or in the future.
    IssuedAt,
    /// `exp` is missing or has passed.
    Expiry,
}

impl ClaimField {
    /// Claim name as it appears in the token payload.
    pub fn claim_name(self) -> &'static str {
        match self {
            ClaimField::Issuer => "iss",
            ClaimField::Audience => "aud",
            ClaimField::IssuedAt => "iat",
            ClaimField::Expiry => "exp",
        }
    }
}

impl fmt::Display for ClaimField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.claim_name())
    }
}

/// Why a token was not accepted.
///
/// `Clone` so that a single failed JWKS fetch can be handed to every caller
/// that was waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    /// Not a well-formed three-part signed token (or header lacks `alg`/`kid`).
    #[error("The access token is invalid or expired")]
    MalformedToken,

    /// Header declares an algorithm other than RS256.
    #[error("The access token is invalid or expired")]
    UnsupportedAlgorithm,

    /// No usable key for the token's `kid`, even after a refresh.
    #[error("The access token is invalid or expired")]
    UnknownKey,

    /// The issuer's key endpoint could not be fetched or parsed.
    #[error("Authentication service unavailable")]
    KeySourceUnavailable,

    /// Signature does not verify under the resolved key.
    #[error("The access token is invalid or expired")]
    BadSignature,

    /// Issuer, audience or time claims rejected.
    #[error("The access token is invalid or expired")]
    ClaimValidation(ClaimField),

    /// A required pipeline claim is missing or has the wrong shape.
    #[error("The access token is invalid or expired")]
    ClaimShapeError(&'static str),
}

impl VerifyError {
    /// Bounded label for logs and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            VerifyError::MalformedToken => "malformed_token",
            VerifyError::UnsupportedAlgorithm => "unsupported_algorithm",
            VerifyError::UnknownKey => "unknown_key",
            VerifyError::KeySourceUnavailable => "key_source_unavailable",
            VerifyError::BadSignature => "bad_signature",
            VerifyError::ClaimValidation(_) => "claim_validation",
            VerifyError::ClaimShapeError(_) => "claim_shape",
        }
    }
}
