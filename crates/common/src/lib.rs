//! Common utilities shared across the CI OIDC crates.

#![warn(clippy::pedantic)]

/// Module for logging configuration and subscriber setup
pub mod config;

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for JWT utilities (size limits, header parsing, time claims)
pub mod jwt;
