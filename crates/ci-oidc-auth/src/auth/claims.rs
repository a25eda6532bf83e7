//! Typed claims of a verified CI job token.
//!
//! The payload is first parsed into a loose [`RawClaims`] shape and then
//! validated field by field into [`VerifiedClaims`], so a missing claim is a
//! typed `ClaimShapeError` naming the field instead of a panic on access.

use crate::errors::VerifyError;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;

/// Kind of git ref the pipeline ran for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefType {
    Branch,
    Tag,
}

impl RefType {
    pub fn as_str(self) -> &'static str {
        match self {
            RefType::Branch => "branch",
            RefType::Tag => "tag",
        }
    }
}

impl fmt::Display for RefType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Claims of a token whose signature, issuer, audience and lifetime have
/// already been verified.
///
/// The `subject` field is redacted in Debug output.
#[derive(Clone, PartialEq, Eq)]
pub struct VerifiedClaims {
    pub subject: String,
    pub issuer: String,
    pub audience: String,
    pub issued_at: i64,
    pub expires_at: i64,
    pub git_ref: String,
    pub ref_type: RefType,
    /// `true` only for the exact claim string `"true"`.
    pub ref_protected: bool,
    pub project_path: String,
    pub namespace_path: String,
    pub pipeline_source: String,
}

impl fmt::Debug for VerifiedClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifiedClaims")
            .field("subject", &"[REDACTED]")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("git_ref", &self.git_ref)
            .field("ref_type", &self.ref_type)
            .field("ref_protected", &self.ref_protected)
            .field("project_path", &self.project_path)
            .field("namespace_path", &self.namespace_path)
            .field("pipeline_source", &self.pipeline_source)
            .finish()
    }
}

/// Payload as decoded, before any field is required.
#[derive(Debug, Default, Deserialize)]
struct RawClaims {
    #[serde(default)]
    sub: Option<Value>,
    #[serde(default)]
    iss: Option<Value>,
    #[serde(default)]
    aud: Option<Value>,
    #[serde(default)]
    iat: Option<Value>,
    #[serde(default)]
    exp: Option<Value>,
    #[serde(default, rename = "ref")]
    git_ref: Option<Value>,
    #[serde(default)]
    ref_type: Option<Value>,
    #[serde(default)]
    ref_protected: Option<Value>,
    #[serde(default)]
    project_path: Option<Value>,
    #[serde(default)]
    namespace_path: Option<Value>,
    #[serde(default)]
    pipeline_source: Option<Value>,
}

impl VerifiedClaims {
    /// Extract typed claims from a verified payload.
    ///
    /// # Errors
    ///
    /// Returns `VerifyError::ClaimShapeError(field)` when a required claim is
    /// absent or not a string, when `ref_type` is neither `branch` nor `tag`,
    /// or when a path claim is empty. `ref_protected` never fails: anything
    /// other than the string `"true"`, including absence, means unprotected.
    pub fn from_payload(payload: &Value) -> Result<Self, VerifyError> {
        let raw = RawClaims::deserialize(payload).map_err(|e| {
            tracing::debug!(target: "ci_oidc.auth.claims", error = %e, "Token payload is not a JSON object");
            VerifyError::ClaimShapeError("payload")
        })?;

        let ref_type = match required_str(raw.ref_type, "ref_type")?.as_str() {
            "branch" => RefType::Branch,
            "tag" => RefType::Tag,
            other => {
                tracing::debug!(target: "ci_oidc.auth.claims", ref_type = %other, "Unsupported ref_type claim");
                return Err(VerifyError::ClaimShapeError("ref_type"));
            }
        };

        let ref_protected = raw.ref_protected.as_ref().is_some_and(is_protected);

        Ok(Self {
            subject: required_str(raw.sub, "sub")?,
            issuer: required_str(raw.iss, "iss")?,
            audience: required_str(raw.aud, "aud")?,
            issued_at: required_i64(raw.iat, "iat")?,
            expires_at: required_i64(raw.exp, "exp")?,
            git_ref: required_str(raw.git_ref, "ref")?,
            ref_type,
            ref_protected,
            project_path: required_path(raw.project_path, "project_path")?,
            namespace_path: required_path(raw.namespace_path, "namespace_path")?,
            pipeline_source: required_str(raw.pipeline_source, "pipeline_source")?,
        })
    }
}

/// The issuer sends `ref_protected` as a string; only `"true"` counts.
/// JSON `null` deserializes as an absent claim.
fn is_protected(value: &Value) -> bool {
    let protected = matches!(value, Value::String(s) if s == "true");
    if !protected && !matches!(value, Value::String(s) if s == "false") {
        tracing::debug!(
            target: "ci_oidc.auth.claims",
            "Unexpected ref_protected value, treating ref as unprotected"
        );
    }
    protected
}

fn required_str(value: Option<Value>, field: &'static str) -> Result<String, VerifyError> {
    match value {
        Some(Value::String(s)) => Ok(s),
        Some(_) => {
            tracing::debug!(target: "ci_oidc.auth.claims", field, "Claim is not a string");
            Err(VerifyError::ClaimShapeError(field))
        }
        None => {
            tracing::debug!(target: "ci_oidc.auth.claims", field, "Missing required claim");
            Err(VerifyError::ClaimShapeError(field))
        }
    }
}

fn required_i64(value: Option<Value>, field: &'static str) -> Result<i64, VerifyError> {
    value.as_ref().and_then(Value::as_i64).ok_or_else(|| {
        tracing::debug!(target: "ci_oidc.auth.claims", field, "Claim is not an integer timestamp");
        VerifyError::ClaimShapeError(field)
    })
}

fn required_path(value: Option<Value>, field: &'static str) -> Result<String, VerifyError> {
    let path = required_str(value, field)?;
    if path.is_empty() {
        tracing::debug!(target: "ci_oidc.auth.claims", field, "Path claim is empty");
        return Err(VerifyError::ClaimShapeError(field));
    }
    Ok(path)
}
