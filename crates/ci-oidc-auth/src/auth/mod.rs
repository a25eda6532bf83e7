//! Token verification against the issuer's JWKS endpoint.
//!
//! # Components
//!
//! - `jwks` - JWKS client with a shared, coalesced key cache
//! - `jwt` - RS256 signature and registered-claim validation
//! - `claims` - Typed CI job claims extracted from a verified payload

pub mod claims;
pub mod jwks;
pub mod jwt;

pub use claims::{RefType, VerifiedClaims};
pub use jwks::JwksClient;
pub use jwt::JwtValidator;
