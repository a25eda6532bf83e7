//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports the [`secrecy`] types used for CI job tokens. A job token is a
//! bearer credential for as long as it is unexpired, so it travels through the
//! authenticator as a `SecretString` and is only exposed at the point where it
//! is handed to the verifier.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct LoginAttempt {
//!     username: String,
//!     password: SecretString, // Debug shows "[REDACTED]"
//! }
//!
//! let attempt = LoginAttempt {
//!     username: "gitlab-oidc".to_string(),
//!     password: SecretString::from("eyJhbGciOiJSUzI1NiJ9.e30.sig"),
//! };
//!
//! let logged = format!("{attempt:?}");
//! assert!(!logged.contains("eyJhbGci"));
//!
//! let token: &str = attempt.password.expose_secret();
//! assert!(token.starts_with("eyJ"));
//! ```

pub use secrecy::{ExposeSecret, SecretString};
