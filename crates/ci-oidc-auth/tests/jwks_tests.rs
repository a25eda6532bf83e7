//! JWKS cache integration tests.
//!
//! Counts fetches against a mock issuer to check caching, key rotation,
//! coalescing of concurrent refreshes and behavior during issuer outages.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use ci_oidc_auth::auth::JwksClient;
use ci_oidc_auth::config::JWKS_PATH;
use ci_oidc_auth::{Authenticator, VerifyError};
use ci_oidc_test_utils::*;
use futures::future::join_all;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn token_for(issuer: &MockIssuer, key: TestKey) -> String {
    key.sign(&TestClaimsBuilder::new(&issuer.url()).build())
        .unwrap()
}

// ============================================================================
// Caching
// ============================================================================

#[tokio::test]
async fn test_known_kid_served_from_cache() -> Result<()> {
    let issuer = MockIssuer::start().await;
    issuer.serve_keys(&[TEST_KEY_ONE]).await;
    let auth = Authenticator::new(issuer.config())?;
    let token = token_for(&issuer, TEST_KEY_ONE);

    for _ in 0..5 {
        auth.verify(&token).await?;
    }

    assert_eq!(issuer.jwks_fetch_count().await, 1);
    Ok(())
}

#[tokio::test]
async fn test_stale_cache_refetched_after_ttl() -> Result<()> {
    let issuer = MockIssuer::start().await;
    issuer.serve_keys(&[TEST_KEY_ONE]).await;
    let auth = Authenticator::new(
        issuer
            .config()
            .with_jwks_cache_ttl(Duration::from_millis(200)),
    )?;
    let token = token_for(&issuer, TEST_KEY_ONE);

    auth.verify(&token).await?;
    auth.verify(&token).await?;
    assert_eq!(issuer.jwks_fetch_count().await, 1);

    tokio::time::sleep(Duration::from_millis(300)).await;

    auth.verify(&token).await?;
    assert_eq!(issuer.jwks_fetch_count().await, 2);
    Ok(())
}

// ============================================================================
// Key rotation
// ============================================================================

#[tokio::test]
async fn test_rotated_key_found_after_one_refresh() -> Result<()> {
    let issuer = MockIssuer::start().await;
    issuer.serve_keys_once(&[TEST_KEY_ONE]).await;
    issuer.serve_keys(&[TEST_KEY_ONE, TEST_KEY_TWO]).await;
    let auth = Authenticator::new(issuer.config())?;

    auth.verify(&token_for(&issuer, TEST_KEY_ONE)).await?;
    assert_eq!(issuer.jwks_fetch_count().await, 1);

    auth.verify(&token_for(&issuer, TEST_KEY_TWO)).await?;
    assert_eq!(issuer.jwks_fetch_count().await, 2);

    // Both keys now cached.
    auth.verify(&token_for(&issuer, TEST_KEY_ONE)).await?;
    auth.verify(&token_for(&issuer, TEST_KEY_TWO)).await?;
    assert_eq!(issuer.jwks_fetch_count().await, 2);
    Ok(())
}

#[tokio::test]
async fn test_unknown_kid_refreshes_exactly_once() -> Result<()> {
    let issuer = MockIssuer::start().await;
    issuer.serve_keys(&[TEST_KEY_ONE]).await;
    let auth = Authenticator::new(issuer.config())?;

    auth.verify(&token_for(&issuer, TEST_KEY_ONE)).await?;
    assert_eq!(issuer.jwks_fetch_count().await, 1);

    let unknown = TEST_KEY_TWO.with_kid("retired-key");
    assert_eq!(
        auth.verify(&token_for(&issuer, unknown)).await,
        Err(VerifyError::UnknownKey)
    );
    assert_eq!(issuer.jwks_fetch_count().await, 2);
    Ok(())
}

#[tokio::test]
async fn test_unknown_kid_on_cold_cache_fetches_once() -> Result<()> {
    let issuer = MockIssuer::start().await;
    issuer.serve_keys(&[TEST_KEY_ONE]).await;
    let auth = Authenticator::new(issuer.config())?;

    assert_eq!(
        auth.verify(&token_for(&issuer, TEST_KEY_TWO)).await,
        Err(VerifyError::UnknownKey)
    );
    assert_eq!(issuer.jwks_fetch_count().await, 1);
    Ok(())
}

#[tokio::test]
async fn test_retired_key_rejected_after_rotation() -> Result<()> {
    let issuer = MockIssuer::start().await;
    issuer.serve_keys_once(&[TEST_KEY_ONE]).await;
    issuer.serve_keys(&[TEST_KEY_TWO]).await;
    let auth = Authenticator::new(issuer.config())?;

    auth.verify(&token_for(&issuer, TEST_KEY_ONE)).await?;
    auth.verify(&token_for(&issuer, TEST_KEY_TWO)).await?;

    // The refresh replaced the whole set, so key one is gone.
    assert_eq!(
        auth.verify(&token_for(&issuer, TEST_KEY_ONE)).await,
        Err(VerifyError::UnknownKey)
    );
    assert_eq!(issuer.jwks_fetch_count().await, 3);
    Ok(())
}

// ============================================================================
// Coalescing
// ============================================================================

#[tokio::test]
async fn test_concurrent_cold_cache_single_fetch() -> Result<()> {
    let issuer = MockIssuer::start().await;
    issuer
        .serve_keys_delayed(&[TEST_KEY_ONE], Duration::from_millis(300))
        .await;
    let auth = Authenticator::new(issuer.config())?;
    let token = token_for(&issuer, TEST_KEY_ONE);

    let results = join_all((0..20).map(|_| auth.verify(&token))).await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(issuer.jwks_fetch_count().await, 1);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_tasks_share_one_fetch() -> Result<()> {
    let issuer = MockIssuer::start().await;
    issuer
        .serve_keys_delayed(&[TEST_KEY_ONE], Duration::from_millis(300))
        .await;
    let auth = Arc::new(Authenticator::new(issuer.config())?);
    let token = Arc::new(token_for(&issuer, TEST_KEY_ONE));

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let auth = Arc::clone(&auth);
            let token = Arc::clone(&token);
            tokio::spawn(async move { auth.verify(&token).await })
        })
        .collect();

    for handle in handles {
        assert!(handle.await?.is_ok());
    }
    assert_eq!(issuer.jwks_fetch_count().await, 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_cold_cache_burst_single_fetch_without_delay() -> Result<()> {
    // An undelayed issuer lets early callers finish the fetch while later
    // ones are still on their way to the fetch slot.
    for _ in 0..10 {
        let issuer = MockIssuer::start().await;
        issuer.serve_keys(&[TEST_KEY_ONE]).await;
        let client = Arc::new(JwksClient::new(format!("{}{}", issuer.url(), JWKS_PATH)));

        let handles: Vec<_> = (0..300)
            .map(|_| {
                let client = Arc::clone(&client);
                tokio::spawn(async move { client.get_key(TEST_KEY_ONE.kid).await })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await??.kid, TEST_KEY_ONE.kid);
        }
        assert_eq!(issuer.jwks_fetch_count().await, 1);
    }
    Ok(())
}

#[tokio::test]
async fn test_dropped_caller_does_not_cancel_shared_fetch() -> Result<()> {
    let issuer = MockIssuer::start().await;
    issuer
        .serve_keys_delayed(&[TEST_KEY_ONE], Duration::from_millis(300))
        .await;
    let client = Arc::new(JwksClient::with_options(
        format!("{}{}", issuer.url(), JWKS_PATH),
        Duration::from_secs(3600),
        Duration::from_secs(5),
    ));

    let first = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.get_key(TEST_KEY_ONE.kid).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.get_key(TEST_KEY_ONE.kid).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    first.abort();
    let key = second.await??;

    assert_eq!(key.kid, TEST_KEY_ONE.kid);
    assert_eq!(issuer.jwks_fetch_count().await, 1);
    Ok(())
}

// ============================================================================
// Issuer outages
// ============================================================================

#[tokio::test]
async fn test_error_status_is_key_source_unavailable() -> Result<()> {
    let issuer = MockIssuer::start().await;
    issuer.serve_status(503).await;
    let auth = Authenticator::new(issuer.config())?;

    assert_eq!(
        auth.verify(&token_for(&issuer, TEST_KEY_ONE)).await,
        Err(VerifyError::KeySourceUnavailable)
    );
    Ok(())
}

#[tokio::test]
async fn test_invalid_documents_are_key_source_unavailable() -> Result<()> {
    for body in [
        json!("not a key set"),
        json!({"keys": []}),
        json!({"keys": [{"kty": "RSA"}, {"kid": "no-kty"}]}),
    ] {
        let issuer = MockIssuer::start().await;
        issuer.serve_body(body.clone()).await;
        let auth = Authenticator::new(issuer.config())?;

        assert_eq!(
            auth.verify(&token_for(&issuer, TEST_KEY_ONE)).await,
            Err(VerifyError::KeySourceUnavailable),
            "{body} should not be accepted as a key set"
        );
    }
    Ok(())
}

#[tokio::test]
async fn test_fetch_timeout_is_key_source_unavailable() -> Result<()> {
    let issuer = MockIssuer::start().await;
    issuer
        .serve_keys_delayed(&[TEST_KEY_ONE], Duration::from_secs(5))
        .await;
    let auth = Authenticator::new(
        issuer
            .config()
            .with_jwks_fetch_timeout(Duration::from_secs(1)),
    )?;

    let started = std::time::Instant::now();
    assert_eq!(
        auth.verify(&token_for(&issuer, TEST_KEY_ONE)).await,
        Err(VerifyError::KeySourceUnavailable)
    );
    assert!(started.elapsed() < Duration::from_secs(4));
    Ok(())
}

#[tokio::test]
async fn test_failed_refresh_keeps_previous_key_set() -> Result<()> {
    let issuer = MockIssuer::start().await;
    issuer.serve_keys_once(&[TEST_KEY_ONE]).await;
    issuer.serve_status(500).await;
    let auth = Authenticator::new(issuer.config())?;

    auth.verify(&token_for(&issuer, TEST_KEY_ONE)).await?;

    // Unknown kid forces a refresh, which fails.
    assert_eq!(
        auth.verify(&token_for(&issuer, TEST_KEY_TWO)).await,
        Err(VerifyError::KeySourceUnavailable)
    );
    assert_eq!(auth.jwks_client().cached_key_count().await, 1);

    // Known kid still verifies from the retained set without a fetch.
    auth.verify(&token_for(&issuer, TEST_KEY_ONE)).await?;
    assert_eq!(issuer.jwks_fetch_count().await, 2);
    Ok(())
}

#[tokio::test]
async fn test_recovers_after_outage() -> Result<()> {
    let issuer = MockIssuer::start().await;
    issuer.serve_status(500).await;
    let auth = Authenticator::new(issuer.config())?;
    let token = token_for(&issuer, TEST_KEY_ONE);

    assert_eq!(
        auth.verify(&token).await,
        Err(VerifyError::KeySourceUnavailable)
    );

    issuer.reset().await;
    issuer.serve_keys(&[TEST_KEY_ONE]).await;

    auth.verify(&token).await?;
    assert_eq!(auth.jwks_client().cached_key_count().await, 1);
    Ok(())
}

#[tokio::test]
async fn test_force_refresh_replaces_key_set() -> Result<()> {
    let issuer = MockIssuer::start().await;
    issuer.serve_keys_once(&[TEST_KEY_ONE, TEST_KEY_TWO]).await;
    issuer.serve_keys(&[TEST_KEY_TWO]).await;
    let client = JwksClient::new(format!("{}{}", issuer.url(), JWKS_PATH));

    client.force_refresh().await?;
    assert_eq!(client.cached_key_count().await, 2);

    client.force_refresh().await?;
    assert_eq!(client.cached_key_count().await, 1);
    assert_eq!(
        client.get_key(TEST_KEY_ONE.kid).await.unwrap_err(),
        VerifyError::UnknownKey
    );
    Ok(())
}
