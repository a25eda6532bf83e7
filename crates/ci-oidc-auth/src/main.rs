//! ci-oidc-verify
//!
//! Verifies one CI job token read from stdin using the same configuration a
//! host deployment would use, and prints the derived groups as a JSON array.
//! Exit status is 0 on success and 1 on rejection, so the tool can back a
//! shell-based auth hook or be used to debug an issuer setup.

use anyhow::Context;
use ci_oidc_auth::{Authenticator, Config};
use common::config::LogConfig;
use std::collections::HashMap;
use std::env;
use std::io::Read;
use std::process::ExitCode;
use tracing::{debug, error, info};

/// Covers the `ci_oidc*` targets and the shared `common.*` targets.
const DEFAULT_LOG_FILTER: &str = "ci_oidc=info,common=info";

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let vars: HashMap<String, String> = env::vars().collect();
    // stdout carries the result; the subscriber writes to stderr.
    if !LogConfig::from_vars(&vars, DEFAULT_LOG_FILTER).init_tracing() {
        debug!("Tracing subscriber already installed, keeping it");
    }

    let config = Config::from_vars(&vars).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        issuer = %config.expected_issuer(),
        jwks_cache_ttl_seconds = config.jwks_cache_ttl.as_secs(),
        project_groups = config.project_groups,
        "Configuration loaded successfully"
    );

    let authenticator = Authenticator::new(config)?;

    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("failed to read token from stdin")?;
    let token = input.trim();

    match authenticator.verify(token).await {
        Ok(groups) => {
            println!("{}", serde_json::to_string(&groups)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("not authenticated: {}", e.reason());
            Ok(ExitCode::FAILURE)
        }
    }
}
