//! CI OIDC authenticator library.
//!
//! Authenticates CI jobs by the OIDC ID token their platform issues and maps
//! the token's claims to access groups:
//!
//! - Signature verification against the issuer's published JWKS (RS256 only)
//! - Issuer, audience and lifetime checks with configurable clock skew
//! - Group derivation from the job's project hierarchy and ref protection
//!
//! # Architecture
//!
//! ```text
//! authenticator.rs -> auth/jwt.rs -> auth/jwks.rs (cached issuer keys)
//!                  \-> groups.rs  <- auth/claims.rs
//! ```
//!
//! # Modules
//!
//! - `auth` - JWKS cache, token validation and claim extraction
//! - `authenticator` - Username/password adapter for host login chains
//! - `config` - Configuration from environment
//! - `errors` - Verification error taxonomy
//! - `groups` - Group derivation
//! - `observability` - Metrics

pub mod auth;
pub mod authenticator;
pub mod config;
pub mod errors;
pub mod groups;
pub mod observability;

pub use authenticator::{AuthDecision, Authenticator};
pub use config::{Config, ConfigError};
pub use errors::{ClaimField, VerifyError};
pub use groups::{derive_groups, GroupSet};
