//! Builder patterns for test data construction
//!
//! Provides a fluent API for GitLab-shaped CI job token claims.

use chrono::{Duration, Utc};
use serde_json::{json, Map, Value};

/// Audience used by test configurations.
pub const TEST_AUDIENCE: &str = "https://registry.example.com";

/// Builder for CI job token claims
///
/// Defaults describe a push pipeline on the protected `main` branch of
/// `my-group/my-project`, issued now and valid for an hour.
///
/// # Example
/// ```rust,ignore
/// let claims = TestClaimsBuilder::new(&issuer)
///     .project("my-org/team-a", "my-org/team-a/app")
///     .tag("v1.0.0")
///     .unprotected()
///     .build();
/// ```
pub struct TestClaimsBuilder {
    claims: Map<String, Value>,
}

impl TestClaimsBuilder {
    /// Create a new claims builder for `issuer` with defaults
    pub fn new(issuer: &str) -> Self {
        let now = Utc::now();
        let claims = json!({
            "namespace_id": "72",
            "namespace_path": "my-group",
            "project_id": "20",
            "project_path": "my-group/my-project",
            "user_id": "1",
            "user_login": "sample-user",
            "pipeline_id": "574",
            "pipeline_source": "push",
            "job_id": "302",
            "ref": "main",
            "ref_type": "branch",
            "ref_path": "refs/heads/main",
            "ref_protected": "true",
            "jti": "235b3a54-b797-45c7-ae9a-f72d7bc6ef5b",
            "iss": issuer,
            "iat": now.timestamp(),
            "nbf": now.timestamp(),
            "exp": (now + Duration::seconds(3600)).timestamp(),
            "sub": "project_path:my-group/my-project:ref_type:branch:ref:main",
            "aud": TEST_AUDIENCE,
        });
        let Value::Object(claims) = claims else {
            unreachable!("json! object literal")
        };
        Self { claims }
    }

    /// Set the namespace and project paths (and a matching subject)
    pub fn project(mut self, namespace_path: &str, project_path: &str) -> Self {
        self.set("namespace_path", json!(namespace_path));
        self.set("project_path", json!(project_path));
        self.set(
            "sub",
            json!(format!(
                "project_path:{}:ref_type:branch:ref:main",
                project_path
            )),
        );
        self
    }

    /// Run on branch `name`
    pub fn branch(mut self, name: &str) -> Self {
        self.set("ref", json!(name));
        self.set("ref_type", json!("branch"));
        self.set("ref_path", json!(format!("refs/heads/{}", name)));
        self
    }

    /// Run on tag `name`
    pub fn tag(mut self, name: &str) -> Self {
        self.set("ref", json!(name));
        self.set("ref_type", json!("tag"));
        self.set("ref_path", json!(format!("refs/tags/{}", name)));
        self
    }

    /// Mark the ref as unprotected
    pub fn unprotected(mut self) -> Self {
        self.set("ref_protected", json!("false"));
        self
    }

    pub fn issuer(mut self, issuer: &str) -> Self {
        self.set("iss", json!(issuer));
        self
    }

    pub fn audience(mut self, audience: &str) -> Self {
        self.set("aud", json!(audience));
        self
    }

    /// Set expiration in seconds from now (negative for an expired token)
    pub fn expires_in(mut self, seconds: i64) -> Self {
        self.set(
            "exp",
            json!((Utc::now() + Duration::seconds(seconds)).timestamp()),
        );
        self
    }

    /// Set issued-at in seconds from now (positive for a future token)
    pub fn issued_in(mut self, seconds: i64) -> Self {
        self.set(
            "iat",
            json!((Utc::now() + Duration::seconds(seconds)).timestamp()),
        );
        self
    }

    /// Set or override any claim
    pub fn claim(mut self, name: &str, value: Value) -> Self {
        self.set(name, value);
        self
    }

    /// Drop a claim entirely
    pub fn without(mut self, name: &str) -> Self {
        self.claims.remove(name);
        self
    }

    /// Build the claims as a JSON value
    pub fn build(self) -> Value {
        Value::Object(self.claims)
    }

    fn set(&mut self, name: &str, value: Value) {
        self.claims.insert(name.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let claims = TestClaimsBuilder::new("https://gitlab.example.com").build();

        assert_eq!(claims["iss"], "https://gitlab.example.com");
        assert_eq!(claims["aud"], TEST_AUDIENCE);
        assert_eq!(claims["ref_protected"], "true");
        assert!(claims["exp"].as_i64().unwrap() > claims["iat"].as_i64().unwrap());
    }

    #[test]
    fn test_builder_overrides() {
        let claims = TestClaimsBuilder::new("https://gitlab.example.com")
            .project("org/team", "org/team/app")
            .tag("v1.0.0")
            .unprotected()
            .without("pipeline_source")
            .build();

        assert_eq!(claims["project_path"], "org/team/app");
        assert_eq!(claims["ref_type"], "tag");
        assert_eq!(claims["ref_protected"], "false");
        assert!(claims.get("pipeline_source").is_none());
    }
}
