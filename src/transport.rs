//! Signed HTTP transport
//!
//! Wraps outbound GET/POST with the federation headers (Date, Digest,
//! Signature, Accept, User-Agent), enforces the timeout, response-size
//! and redirect limits, and converts non-2xx responses into typed
//! failures. Remote servers are untrusted: a slow, unreachable, or
//! oversized peer fails that one call and nothing else.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use moka::future::Cache;
use serde_json::Value;

use crate::config::FederationConfig;
use crate::error::{FederationError, Result};
use crate::keys::{KeyStore, SigningIdentity};
use crate::metrics;
use crate::signature;

/// The ActivityPub media type
pub const ACTIVITY_JSON: &str = "application/activity+json";

/// The WebFinger JRD media type
pub const JRD_JSON: &str = "application/jrd+json";

/// Upper bound for any per-entry response cache TTL.
const RESPONSE_CACHE_CEILING: Duration = Duration::from_secs(86_400);

/// Caching behavior for a signed GET
#[derive(Debug, Clone, Copy)]
pub enum CachePolicy {
    /// Always hit the network; never store.
    Bypass,
    /// Use the configured default response TTL.
    Default,
    /// Cache for a caller-specified duration.
    Ttl(Duration),
}

#[derive(Clone)]
struct CachedResponse {
    body: Arc<Value>,
    expires_at: Instant,
}

/// Signed outbound HTTP
pub struct Transport {
    client: reqwest::Client,
    config: Arc<FederationConfig>,
    keys: Arc<KeyStore>,
    response_cache: Cache<String, CachedResponse>,
}

impl Transport {
    pub fn new(config: Arc<FederationConfig>, keys: Arc<KeyStore>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.instance.user_agent())
            .timeout(config.http.timeout())
            .redirect(reqwest::redirect::Policy::limited(config.http.max_redirects))
            .build()
            .map_err(|e| FederationError::Internal(anyhow::anyhow!(e)))?;

        let response_cache = Cache::builder()
            .max_capacity(10_000)
            .time_to_live(RESPONSE_CACHE_CEILING)
            .build();

        Ok(Self {
            client,
            config,
            keys,
            response_cache,
        })
    }

    /// POST a signed Activity body to a remote inbox.
    ///
    /// Signs over `(request-target) host date digest`. Any status >= 400
    /// becomes a typed failure carrying the status; 404/410 are
    /// distinguished as tombstones.
    pub async fn post(
        &self,
        url: &str,
        body: &[u8],
        signing_identity: &SigningIdentity,
    ) -> Result<u16> {
        let signed = signature::sign_request(
            "POST",
            url,
            Some(body),
            &signing_identity.private_key_pem,
            &signing_identity.key_id,
        )?;

        let mut request = self
            .client
            .post(url)
            .header("Accept", ACTIVITY_JSON)
            .header("Content-Type", ACTIVITY_JSON)
            .header("Date", &signed.date)
            .header("Signature", &signed.signature);

        if let Some(ref digest) = signed.digest {
            request = request.header("Digest", digest);
        }

        let started = Instant::now();
        let outcome = request.body(body.to_vec()).send().await;
        metrics::FEDERATION_REQUEST_DURATION_SECONDS
            .with_label_values(&["out"])
            .observe(started.elapsed().as_secs_f64());

        let response = match outcome {
            Ok(response) => response,
            Err(error) => {
                self.observe_post(url, None);
                return Err(error.into());
            }
        };

        let status = response.status().as_u16();
        self.observe_post(url, Some(status));

        if status >= 400 {
            return Err(status_error(status));
        }

        Ok(status)
    }

    fn observe_post(&self, url: &str, status: Option<u16>) {
        let status_label = status.map_or_else(|| "error".to_string(), |s| s.to_string());
        metrics::FEDERATION_REQUESTS_TOTAL
            .with_label_values(&["out", &status_label])
            .inc();
        match status {
            Some(status) if status < 400 => {
                tracing::debug!(url = %url, status = status, "Delivered signed POST");
            }
            Some(status) => {
                tracing::warn!(url = %url, status = status, "Signed POST rejected");
            }
            None => {
                tracing::warn!(url = %url, "Signed POST failed before a response");
            }
        }
    }

    /// Signed GET for an ActivityPub document.
    ///
    /// Signed by the instance service actor; use [`Transport::get_as`]
    /// when a caller-specific identity or Accept type is needed.
    pub async fn get(&self, url: &str, cache: CachePolicy) -> Result<Arc<Value>> {
        self.get_as(url, ACTIVITY_JSON, None, cache).await
    }

    /// Signed GET with explicit Accept type and optional identity.
    ///
    /// On a cache hit the network is not touched. Responses are parsed
    /// as JSON; an unparseable 2xx body is `InvalidJson`.
    pub async fn get_as(
        &self,
        url: &str,
        accept: &str,
        signing_identity: Option<&SigningIdentity>,
        cache: CachePolicy,
    ) -> Result<Arc<Value>> {
        if !matches!(cache, CachePolicy::Bypass) {
            if let Some(entry) = self.response_cache.get(url).await {
                if entry.expires_at > Instant::now() {
                    metrics::CACHE_HITS_TOTAL
                        .with_label_values(&["response"])
                        .inc();
                    return Ok(entry.body);
                }
                self.response_cache.invalidate(url).await;
            }
            metrics::CACHE_MISSES_TOTAL
                .with_label_values(&["response"])
                .inc();
        }

        let service_identity;
        let signing_identity = match signing_identity {
            Some(identity) => identity,
            None => {
                service_identity = self.service_identity().await?;
                &service_identity
            }
        };

        let signed = signature::sign_request(
            "GET",
            url,
            None,
            &signing_identity.private_key_pem,
            &signing_identity.key_id,
        )?;

        let started = Instant::now();
        let outcome = self
            .client
            .get(url)
            .header("Accept", accept)
            .header("Date", &signed.date)
            .header("Signature", &signed.signature)
            .send()
            .await;
        metrics::FEDERATION_REQUEST_DURATION_SECONDS
            .with_label_values(&["out"])
            .observe(started.elapsed().as_secs_f64());

        let response = outcome?;
        let status = response.status().as_u16();
        metrics::FEDERATION_REQUESTS_TOTAL
            .with_label_values(&["out", &status.to_string()])
            .inc();

        if status >= 400 {
            return Err(status_error(status));
        }

        let body_bytes = self.read_capped(response).await?;
        let body: Value = serde_json::from_slice(&body_bytes)
            .map_err(|e| FederationError::InvalidJson(format!("{url}: {e}")))?;
        let body = Arc::new(body);

        let ttl = match cache {
            CachePolicy::Bypass => None,
            CachePolicy::Default => Some(self.config.cache.response_ttl()),
            CachePolicy::Ttl(duration) => Some(duration.min(RESPONSE_CACHE_CEILING)),
        };
        if let Some(ttl) = ttl {
            self.response_cache
                .insert(
                    url.to_string(),
                    CachedResponse {
                        body: body.clone(),
                        expires_at: Instant::now() + ttl,
                    },
                )
                .await;
        }

        Ok(body)
    }

    /// Drain a response body under the configured size cap.
    async fn read_capped(&self, response: reqwest::Response) -> Result<Vec<u8>> {
        let cap = self.config.http.max_response_bytes;

        if let Some(length) = response.content_length() {
            if length as usize > cap {
                return Err(FederationError::FetchFailed(format!(
                    "response of {length} bytes exceeds the {cap} byte cap"
                )));
            }
        }

        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(FederationError::from)?;
            if body.len() + chunk.len() > cap {
                return Err(FederationError::FetchFailed(format!(
                    "response exceeds the {cap} byte cap"
                )));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(body)
    }

    /// Identity of the machine-to-machine service actor.
    async fn service_identity(&self) -> Result<SigningIdentity> {
        self.keys
            .signing_identity(&self.config.instance.service_actor)
            .await
    }

    /// Drop any cached response for a URL.
    pub async fn invalidate_cached(&self, url: &str) {
        self.response_cache.invalidate(url).await;
    }
}

fn status_error(status: u16) -> FederationError {
    match status {
        404 | 410 => FederationError::Tombstoned { status },
        _ => FederationError::RemoteHttp { status },
    }
}
