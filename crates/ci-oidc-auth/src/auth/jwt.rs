//! JWT validation for CI job tokens.
//!
//! Validates ID tokens using public keys fetched from the issuer's JWKS
//! endpoint.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - Only RS256 is accepted; the allow-list is fixed to close algorithm
//!   confusion (`none`, HS256 with the public key as secret, ...)
//! - The signature is verified before any claim is trusted
//! - `iss` and `aud` are compared by exact string equality
//! - Generic error messages prevent information leakage

use crate::auth::claims::VerifiedClaims;
use crate::auth::jwks::{Jwk, JwksClient};
use crate::errors::{ClaimField, VerifyError};
use common::jwt::{parse_header, validate_exp_at, validate_iat_at};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// The only accepted signature algorithm.
pub const ALLOWED_ALGORITHM: &str = "RS256";

/// JWT validator using the issuer's JWKS.
pub struct JwtValidator {
    /// JWKS client for fetching public keys.
    jwks_client: Arc<JwksClient>,

    /// Required `iss` value (normalized issuer URL).
    expected_issuer: String,

    /// Required `aud` value.
    expected_audience: String,

    /// Clock skew tolerance for `iat` and `exp`.
    clock_skew: Duration,
}

impl JwtValidator {
    /// Create a new JWT validator.
    ///
    /// # Arguments
    ///
    /// * `jwks_client` - Client for fetching public keys
    /// * `expected_issuer` - Exact `iss` value to accept
    /// * `expected_audience` - Exact `aud` value to accept
    /// * `clock_skew` - Tolerance for `iat` and `exp`
    pub fn new(
        jwks_client: Arc<JwksClient>,
        expected_issuer: String,
        expected_audience: String,
        clock_skew: Duration,
    ) -> Self {
        Self {
            jwks_client,
            expected_issuer,
            expected_audience,
            clock_skew,
        }
    }

    /// Validate a JWT and return its verified payload.
    ///
    /// # Security Checks
    ///
    /// 1. Size and structure check, `alg`/`kid` extracted from the header
    /// 2. `alg` must be RS256
    /// 3. Public key resolved from JWKS (refreshing on unknown `kid`)
    /// 4. RS256 signature verified
    /// 5. `iss`, `aud`, `exp`, `iat` validated
    ///
    /// # Errors
    ///
    /// Each stage has its own [`VerifyError`] variant; no stage is retried.
    #[instrument(skip_all)]
    pub async fn validate(&self, token: &str) -> Result<Value, VerifyError> {
        // 1. Extract header (includes size check via common::jwt)
        let header = parse_header(token).map_err(|e| {
            tracing::debug!(target: "ci_oidc.auth.jwt", error = ?e, "Token header parsing failed");
            VerifyError::MalformedToken
        })?;

        // 2. Fixed algorithm allow-list
        if header.alg != ALLOWED_ALGORITHM {
            tracing::debug!(target: "ci_oidc.auth.jwt", alg = %header.alg, "Token algorithm not allowed");
            return Err(VerifyError::UnsupportedAlgorithm);
        }

        // 3. Fetch public key from JWKS
        let jwk = self.jwks_client.get_key(&header.kid).await?;

        // 4. Verify signature and decode payload
        let payload = verify_signature(token, &jwk)?;

        // 5. Registered claims
        validate_registered_claims(
            &payload,
            &self.expected_issuer,
            &self.expected_audience,
            self.clock_skew,
            chrono::Utc::now().timestamp(),
        )?;

        tracing::debug!(target: "ci_oidc.auth.jwt", "Token validated successfully");
        Ok(payload)
    }

    /// Validate a JWT and extract the typed pipeline claims.
    ///
    /// # Errors
    ///
    /// Everything [`JwtValidator::validate`] returns, plus
    /// `VerifyError::ClaimShapeError` when a pipeline claim is missing.
    pub async fn validate_claims(&self, token: &str) -> Result<VerifiedClaims, VerifyError> {
        let payload = self.validate(token).await?;
        VerifiedClaims::from_payload(&payload)
    }
}

/// Verify the RS256 signature and decode the payload.
///
/// Claim validation is switched off in `jsonwebtoken`; it is done by
/// [`validate_registered_claims`] so every failure maps to a precise field.
fn verify_signature(token: &str, jwk: &Jwk) -> Result<Value, VerifyError> {
    let decoding_key = decoding_key(jwk)?;

    let mut validation = Validation::new(Algorithm::RS256);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims = HashSet::new();

    let token_data = decode::<Value>(token, &decoding_key, &validation).map_err(|e| {
        tracing::debug!(target: "ci_oidc.auth.jwt", error = %e, "Token verification failed");
        match e.kind() {
            ErrorKind::InvalidSignature => VerifyError::BadSignature,
            ErrorKind::InvalidRsaKey(_) | ErrorKind::InvalidKeyFormat => VerifyError::UnknownKey,
            _ => VerifyError::MalformedToken,
        }
    })?;

    Ok(token_data.claims)
}

/// Build an RSA decoding key from a JWK.
///
/// A JWK that cannot verify RS256 is treated as if the `kid` were unknown.
fn decoding_key(jwk: &Jwk) -> Result<DecodingKey, VerifyError> {
    if jwk.kty != "RSA" {
        tracing::warn!(target: "ci_oidc.auth.jwt", kty = %jwk.kty, "Unexpected JWK key type");
        return Err(VerifyError::UnknownKey);
    }
    if let Some(alg) = &jwk.alg {
        if alg != ALLOWED_ALGORITHM {
            tracing::warn!(target: "ci_oidc.auth.jwt", alg = %alg, "Unexpected JWK algorithm");
            return Err(VerifyError::UnknownKey);
        }
    }

    let (Some(n), Some(e)) = (jwk.n.as_deref(), jwk.e.as_deref()) else {
        tracing::error!(target: "ci_oidc.auth.jwt", kid = %jwk.kid, "JWK missing n or e field");
        return Err(VerifyError::UnknownKey);
    };

    DecodingKey::from_rsa_components(n, e).map_err(|e| {
        tracing::error!(target: "ci_oidc.auth.jwt", error = %e, "Invalid RSA public key encoding");
        VerifyError::UnknownKey
    })
}

/// Validate `iss`, `aud`, `exp` and `iat` against an explicit `now`.
///
/// A missing or mistyped claim fails as its own field.
pub(crate) fn validate_registered_claims(
    payload: &Value,
    expected_issuer: &str,
    expected_audience: &str,
    clock_skew: Duration,
    now: i64,
) -> Result<(), VerifyError> {
    if payload.get("iss").and_then(Value::as_str) != Some(expected_issuer) {
        tracing::debug!(target: "ci_oidc.auth.jwt", "Token issuer mismatch");
        return Err(VerifyError::ClaimValidation(ClaimField::Issuer));
    }

    if payload.get("aud").and_then(Value::as_str) != Some(expected_audience) {
        tracing::debug!(target: "ci_oidc.auth.jwt", "Token audience mismatch");
        return Err(VerifyError::ClaimValidation(ClaimField::Audience));
    }

    let exp = payload
        .get("exp")
        .and_then(Value::as_i64)
        .ok_or(VerifyError::ClaimValidation(ClaimField::Expiry))?;
    validate_exp_at(exp, clock_skew, now)
        .map_err(|_| VerifyError::ClaimValidation(ClaimField::Expiry))?;

    let iat = payload
        .get("iat")
        .and_then(Value::as_i64)
        .ok_or(VerifyError::ClaimValidation(ClaimField::IssuedAt))?;
    validate_iat_at(iat, clock_skew, now)
        .map_err(|_| VerifyError::ClaimValidation(ClaimField::IssuedAt))?;

    Ok(())
}
