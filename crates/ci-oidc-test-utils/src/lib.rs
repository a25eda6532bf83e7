//! # CI OIDC Test Utilities
//!
//! Shared test utilities for the CI OIDC authenticator.
//!
//! This crate provides:
//! - Deterministic RSA fixtures (fixed keys for reproducible tokens)
//! - Claims builders (TestClaimsBuilder)
//! - Mock issuer harness (MockIssuer serving a JWKS over wiremock)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ci_oidc_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> anyhow::Result<()> {
//!     let issuer = MockIssuer::start().await;
//!     issuer.serve_keys(&[TEST_KEY_ONE]).await;
//!
//!     let claims = TestClaimsBuilder::new(&issuer.url())
//!         .project("my-org/team-a", "my-org/team-a/app")
//!         .build();
//!     let token = TEST_KEY_ONE.sign(&claims)?;
//!
//!     let auth = Authenticator::new(issuer.config())?;
//!     assert!(auth.verify(&token).await?.contains("ci-protected"));
//!     Ok(())
//! }
//! ```

pub mod crypto_fixtures;
pub mod issuer_harness;
pub mod token_builders;

// Re-export commonly used items
pub use crypto_fixtures::*;
pub use issuer_harness::*;
pub use token_builders::*;
