//! Observability for the CI OIDC authenticator.
//!
//! The library records through the `metrics` facade only; a host that wants
//! the numbers installs a recorder (Prometheus or otherwise) itself.

pub mod metrics;
