//! JWKS client for fetching and caching the issuer's public signing keys.
//!
//! Keys are fetched from `{issuer}/oauth/discovery/keys` and cached for a
//! configurable TTL. The cache is refreshed when:
//!
//! - nothing has been fetched yet,
//! - the cached set is older than its TTL, or
//! - the requested `kid` is not in the cached set (the issuer rotated keys).
//!
//! A verification call performs at most one refresh. Concurrent callers that
//! need a refresh at the same moment share a single in-flight fetch and all
//! observe its result.
//!
//! # Security
//!
//! - A failed fetch never touches the cached set
//! - A fetch that returns no usable keys counts as a failure
//! - Fetches are bounded by a timeout so a slow issuer cannot hang logins

use crate::config::{DEFAULT_JWKS_CACHE_TTL_SECONDS, DEFAULT_JWKS_FETCH_TIMEOUT_SECONDS};
use crate::errors::VerifyError;
use crate::observability::metrics;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::instrument;

/// JSON Web Key from the issuer's JWKS endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Jwk {
    /// Key type ("RSA" for RS256 keys).
    pub kty: String,

    /// Key ID - used to select the correct key for verification.
    pub kid: String,

    /// Algorithm the key is published for (should be "RS256" when present).
    #[serde(default)]
    pub alg: Option<String>,

    /// Key use (should be "sig" for signing).
    #[serde(default, rename = "use")]
    pub key_use: Option<String>,

    /// RSA modulus (base64url encoded).
    #[serde(default)]
    pub n: Option<String>,

    /// RSA public exponent (base64url encoded).
    #[serde(default)]
    pub e: Option<String>,
}

/// JWKS response body.
///
/// Keys are kept as raw JSON so that one malformed entry does not discard the
/// whole set.
#[derive(Debug, Clone, Deserialize)]
struct JwksResponse {
    keys: Vec<serde_json::Value>,
}

/// A fetched key set.
#[derive(Debug)]
struct CachedJwks {
    /// Map of key ID to JWK. Never empty.
    keys: HashMap<String, Jwk>,

    /// When this set was fetched.
    fetched_at: Instant,
}

impl CachedJwks {
    fn is_stale(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() > ttl
    }
}

type FetchResult = Result<Arc<CachedJwks>, VerifyError>;
type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

/// The fetch currently being awaited by one or more callers.
struct InFlight {
    generation: u64,
    started_at: Instant,
    fetch: SharedFetch,
}

#[derive(Default)]
struct FetchSlot {
    next_generation: u64,
    in_flight: Option<InFlight>,
}

/// One caller's handle on a shared fetch.
///
/// Dropping it, on completion or because the caller was cancelled, clears the
/// slot once the fetch has finished or no other caller is left waiting on it.
/// Dropping the last handle drops the fetch itself, which cancels the request.
struct FetchWaiter<'a> {
    slot: &'a Mutex<FetchSlot>,
    generation: u64,
    fetch: Option<SharedFetch>,
}

impl FetchWaiter<'_> {
    async fn wait(&mut self) -> FetchResult {
        match self.fetch.as_mut() {
            Some(fetch) => fetch.await,
            None => Err(VerifyError::KeySourceUnavailable),
        }
    }
}

impl Drop for FetchWaiter<'_> {
    fn drop(&mut self) {
        let Some(fetch) = self.fetch.take() else {
            return;
        };
        let finished = fetch.peek().is_some();
        drop(fetch);

        // Contended: the holder either joins this entry or replaces it.
        let Ok(mut slot) = self.slot.try_lock() else {
            return;
        };
        let release = slot.in_flight.as_ref().is_some_and(|in_flight| {
            in_flight.generation == self.generation
                && (finished || in_flight.fetch.strong_count() == Some(1))
        });
        if release {
            if !finished {
                tracing::debug!(target: "ci_oidc.auth.jwks", "Abandoned JWKS fetch cancelled");
            }
            slot.in_flight = None;
        }
    }
}

/// JWKS client for one issuer.
///
/// Thread-safe; share it behind an `Arc`. Cached lookups take only a read
/// lock, so verifications for already-known keys run fully in parallel.
pub struct JwksClient {
    /// URL to the JWKS endpoint.
    jwks_url: String,

    /// HTTP client for fetching JWKS.
    http_client: reqwest::Client,

    /// Current key set, replaced wholesale by each successful fetch.
    cache: Arc<RwLock<Option<Arc<CachedJwks>>>>,

    /// Coalescing point for refreshes.
    fetch_slot: Mutex<FetchSlot>,

    /// Cache TTL duration.
    cache_ttl: Duration,

    /// Upper bound for a single fetch.
    fetch_timeout: Duration,
}

impl JwksClient {
    /// Create a new JWKS client with default TTL and timeout.
    pub fn new(jwks_url: String) -> Self {
        Self::with_options(
            jwks_url,
            Duration::from_secs(DEFAULT_JWKS_CACHE_TTL_SECONDS),
            Duration::from_secs(DEFAULT_JWKS_FETCH_TIMEOUT_SECONDS),
        )
    }

    /// Create a new JWKS client.
    ///
    /// # Arguments
    ///
    /// * `jwks_url` - URL to the issuer's JWKS endpoint
    /// * `cache_ttl` - How long to trust a fetched key set
    /// * `fetch_timeout` - Upper bound for one fetch, connect to last body byte
    pub fn with_options(jwks_url: String, cache_ttl: Duration, fetch_timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .connect_timeout(fetch_timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(target: "ci_oidc.auth.jwks", error = %e, "Failed to build HTTP client with custom config, using defaults");
                reqwest::Client::new()
            });

        Self {
            jwks_url,
            http_client,
            cache: Arc::new(RwLock::new(None)),
            fetch_slot: Mutex::new(FetchSlot::default()),
            cache_ttl,
            fetch_timeout,
        }
    }

    /// URL this client fetches from.
    pub fn jwks_url(&self) -> &str {
        &self.jwks_url
    }

    /// Get a JWK by key ID.
    ///
    /// Serves from cache when the set is fresh and contains `kid`; otherwise
    /// refreshes once (joining any fetch already in flight) and looks again.
    ///
    /// # Errors
    ///
    /// Returns `VerifyError::KeySourceUnavailable` if JWKS cannot be fetched.
    /// Returns `VerifyError::UnknownKey` if the key ID is absent after refresh.
    #[instrument(skip(self), fields(kid = %kid))]
    pub async fn get_key(&self, kid: &str) -> Result<Jwk, VerifyError> {
        let observed = {
            let cache = self.cache.read().await;
            match cache.as_ref() {
                Some(cached) if !cached.is_stale(self.cache_ttl) => {
                    if let Some(key) = cached.keys.get(kid) {
                        tracing::debug!(target: "ci_oidc.auth.jwks", "JWKS cache hit");
                        metrics::record_jwks_cache("hit");
                        return Ok(key.clone());
                    }
                    tracing::debug!(target: "ci_oidc.auth.jwks", "Key not found in JWKS cache, refreshing");
                    metrics::record_jwks_cache("miss");
                }
                Some(_) => {
                    tracing::debug!(target: "ci_oidc.auth.jwks", "JWKS cache stale, refreshing");
                    metrics::record_jwks_cache("stale");
                }
                None => {
                    tracing::debug!(target: "ci_oidc.auth.jwks", "JWKS cache empty, fetching");
                    metrics::record_jwks_cache("miss");
                }
            }
            cache.clone()
        };

        let refreshed = self.refresh(observed.as_ref()).await?;

        if let Some(key) = refreshed.keys.get(kid) {
            return Ok(key.clone());
        }

        tracing::warn!(target: "ci_oidc.auth.jwks", "Key not found in JWKS after refresh");
        Err(VerifyError::UnknownKey)
    }

    /// Force refresh the cache.
    ///
    /// Joins a fetch already in flight, or takes a set written since the call
    /// started, rather than starting another fetch.
    pub async fn force_refresh(&self) -> Result<(), VerifyError> {
        let observed = self.cache.read().await.clone();
        self.refresh(observed.as_ref()).await.map(|_| ())
    }

    /// Number of keys in the current set (0 if never fetched).
    pub async fn cached_key_count(&self) -> usize {
        self.cache
            .read()
            .await
            .as_ref()
            .map_or(0, |cached| cached.keys.len())
    }

    /// Refresh the key set, coalescing with any fetch already in flight.
    ///
    /// `observed` is the set the caller saw before deciding to refresh. If a
    /// different set has been stored by the time the slot lock is held, some
    /// other caller's fetch already completed and its result is used.
    async fn refresh(&self, observed: Option<&Arc<CachedJwks>>) -> FetchResult {
        let mut waiter = {
            let mut slot = self.fetch_slot.lock().await;
            match slot.in_flight.as_ref() {
                Some(in_flight) if self.is_joinable(in_flight) => {
                    tracing::debug!(target: "ci_oidc.auth.jwks", "Joining in-flight JWKS fetch");
                    FetchWaiter {
                        slot: &self.fetch_slot,
                        generation: in_flight.generation,
                        fetch: Some(in_flight.fetch.clone()),
                    }
                }
                _ => {
                    if let Some(current) = self.stored_since(observed).await {
                        tracing::debug!(target: "ci_oidc.auth.jwks", "JWKS refreshed by a concurrent caller");
                        return Ok(current);
                    }

                    slot.next_generation = slot.next_generation.wrapping_add(1);
                    let generation = slot.next_generation;
                    let fetch = self.start_fetch();
                    slot.in_flight = Some(InFlight {
                        generation,
                        started_at: Instant::now(),
                        fetch: fetch.clone(),
                    });
                    FetchWaiter {
                        slot: &self.fetch_slot,
                        generation,
                        fetch: Some(fetch),
                    }
                }
            }
        };

        waiter.wait().await
    }

    /// The cached set, if it is not the one the caller observed.
    async fn stored_since(&self, observed: Option<&Arc<CachedJwks>>) -> Option<Arc<CachedJwks>> {
        let cache = self.cache.read().await;
        let current = cache.as_ref()?;
        let replaced = observed.map_or(true, |seen| !Arc::ptr_eq(seen, current));
        replaced.then(|| Arc::clone(current))
    }

    /// A slot entry may be joined only while it is still running and younger
    /// than the fetch timeout. Finished entries whose waiters could not take
    /// the slot lock on the way out are replaced.
    fn is_joinable(&self, in_flight: &InFlight) -> bool {
        in_flight.fetch.peek().is_none() && in_flight.started_at.elapsed() < self.fetch_timeout
    }

    /// Build the shared fetch future.
    ///
    /// The future owns everything it needs, so it keeps running for the
    /// remaining callers when any one caller is dropped.
    fn start_fetch(&self) -> SharedFetch {
        let http_client = self.http_client.clone();
        let jwks_url = self.jwks_url.clone();
        let cache = Arc::clone(&self.cache);
        let fetch_timeout = self.fetch_timeout;

        async move {
            let started = Instant::now();
            match fetch_jwks(&http_client, &jwks_url, fetch_timeout).await {
                Ok(keys) => {
                    metrics::record_jwks_fetch("success", started.elapsed());
                    tracing::info!(
                        target: "ci_oidc.auth.jwks",
                        key_count = keys.len(),
                        "JWKS cache refreshed"
                    );

                    let fetched = Arc::new(CachedJwks {
                        keys,
                        fetched_at: Instant::now(),
                    });
                    *cache.write().await = Some(Arc::clone(&fetched));
                    Ok(fetched)
                }
                Err(status) => {
                    metrics::record_jwks_fetch(status, started.elapsed());
                    Err(VerifyError::KeySourceUnavailable)
                }
            }
        }
        .boxed()
        .shared()
    }
}

/// Fetch and parse the key set. Errors carry the metrics `status` label.
async fn fetch_jwks(
    http_client: &reqwest::Client,
    jwks_url: &str,
    fetch_timeout: Duration,
) -> Result<HashMap<String, Jwk>, &'static str> {
    tracing::debug!(target: "ci_oidc.auth.jwks", url = %jwks_url, "Fetching JWKS from issuer");

    let response = http_client
        .get(jwks_url)
        .timeout(fetch_timeout)
        .send()
        .await
        .map_err(|e| {
            tracing::error!(target: "ci_oidc.auth.jwks", error = %e, "Failed to fetch JWKS");
            if e.is_timeout() {
                "timeout"
            } else {
                "error"
            }
        })?;

    if !response.status().is_success() {
        tracing::error!(
            target: "ci_oidc.auth.jwks",
            status = %response.status(),
            "JWKS endpoint returned error"
        );
        return Err("error");
    }

    let jwks: JwksResponse = response.json().await.map_err(|e| {
        tracing::error!(target: "ci_oidc.auth.jwks", error = %e, "Failed to parse JWKS response");
        if e.is_timeout() {
            "timeout"
        } else {
            "error"
        }
    })?;

    let keys = build_key_map(jwks.keys);
    if keys.is_empty() {
        tracing::error!(target: "ci_oidc.auth.jwks", "JWKS response contained no usable keys");
        return Err("error");
    }

    Ok(keys)
}

/// Index keys by `kid`, skipping entries that are not valid JWK objects.
fn build_key_map(raw_keys: Vec<serde_json::Value>) -> HashMap<String, Jwk> {
    raw_keys
        .into_iter()
        .filter_map(|raw| match serde_json::from_value::<Jwk>(raw) {
            Ok(key) if !key.kid.is_empty() => Some((key.kid.clone(), key)),
            Ok(_) => {
                tracing::warn!(target: "ci_oidc.auth.jwks", "Skipping JWK with empty kid");
                None
            }
            Err(e) => {
                tracing::warn!(target: "ci_oidc.auth.jwks", error = %e, "Skipping malformed JWK");
                None
            }
        })
        .collect()
}
