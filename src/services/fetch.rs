//! Cached, retried HTTP JSON client for vendor forecast APIs.
//!
//! Every vendor call goes through [`FetchClient::fetch_json`]:
//! - responses are cached under a content-addressed key (sha256 over the URL
//!   plus sorted query params and headers), so argument order never splits
//!   the cache;
//! - an entry younger than the TTL is served without a network call, a
//!   corrupted entry is logged and treated as a miss;
//! - on a miss the request is attempted up to `max_attempts` times with
//!   exponential backoff; only transient outcomes (429, 5xx, transport and
//!   timeout failures) are retried, other 4xx fail immediately unless the
//!   `retry_client_errors` policy switch is on;
//! - cache writes are best-effort and never fail the call.
//!
//! Concurrent fetches for different keys need no coordination. Two misses on
//! the same key may both hit the network and both write the cache; that is
//! accepted duplicated work (last writer wins), not a correctness problem.

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Outcome classification for a failed vendor fetch.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Retryable: 429, 5xx, transport or timeout failure, unparseable body.
    #[error("Transient fetch error: {message}")]
    Transient { message: String },

    /// Non-retryable (by default): any other 4xx.
    #[error("Client error (HTTP {status}): {message}")]
    Client { status: u16, message: String },

    /// The request itself could not be constructed (e.g. bad header name).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl FetchError {
    fn is_retryable(&self, retry_client_errors: bool) -> bool {
        match self {
            FetchError::Transient { .. } => true,
            FetchError::Client { .. } => retry_client_errors,
            FetchError::InvalidRequest(_) => false,
        }
    }
}

/// Fetch-client tuning. Passed in at construction; no process-wide state.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Cache entry time-to-live; older entries trigger a refetch.
    pub ttl: Duration,
    /// Per-request timeout (covers connect + body).
    pub timeout: Duration,
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Base of the exponential backoff; delay after failed attempt i is
    /// `backoff_base^i` backoff units.
    pub backoff_base: f64,
    /// One backoff time unit (shrunk in tests).
    pub backoff_unit: Duration,
    /// Whether non-429 4xx responses consume retry budget.
    pub retry_client_errors: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(600),
            timeout: Duration::from_secs(30),
            max_attempts: 6,
            backoff_base: 1.5,
            backoff_unit: Duration::from_secs(1),
            retry_client_errors: false,
        }
    }
}

/// Pluggable cache backend: file store, in-memory store, or an external
/// service. Implementations log and swallow their own I/O errors — a broken
/// cache degrades to a miss, never a failed fetch.
pub trait CacheStore: Send + Sync {
    /// Return the payload and its storage timestamp, or None on miss.
    fn get(&self, key: &str) -> Option<(Vec<u8>, DateTime<Utc>)>;
    /// Store a payload (best-effort).
    fn put(&self, key: &str, payload: &[u8]);
}

/// File-backed cache: one `<key>.json` file per entry, with the file's
/// mtime as the freshness timestamp.
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        if let Err(e) = std::fs::create_dir_all(&dir) {
            tracing::warn!("Failed to create cache dir {}: {}", dir.display(), e);
        }
        Self { dir }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl CacheStore for FileCache {
    fn get(&self, key: &str) -> Option<(Vec<u8>, DateTime<Utc>)> {
        let path = self.path_for(key);
        let meta = std::fs::metadata(&path).ok()?;
        let modified = meta.modified().ok()?;
        let payload = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("Unreadable cache entry {}: {}", path.display(), e);
                return None;
            }
        };
        Some((payload, DateTime::<Utc>::from(modified)))
    }

    fn put(&self, key: &str, payload: &[u8]) {
        let path = self.path_for(key);
        if let Err(e) = std::fs::write(&path, payload) {
            tracing::warn!("Failed to write cache entry {}: {}", path.display(), e);
        }
    }
}

/// In-memory cache, mainly for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (Vec<u8>, DateTime<Utc>)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, (Vec<u8>, DateTime<Utc>)>> {
        match self.entries.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, key: &str) -> Option<(Vec<u8>, DateTime<Utc>)> {
        self.lock().get(key).cloned()
    }

    fn put(&self, key: &str, payload: &[u8]) {
        self.lock()
            .insert(key.to_string(), (payload.to_vec(), Utc::now()));
    }
}

/// Deterministic cache key over (url, params, headers).
///
/// Params and headers are canonicalized into sorted maps before hashing, so
/// the caller's argument order never affects the key.
pub fn cache_key(url: &str, params: &[(String, String)], headers: &[(String, String)]) -> String {
    let params: BTreeMap<&str, &str> = params
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    let headers: BTreeMap<&str, &str> = headers
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();

    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hasher.update(b"|");
    hasher.update(serde_json::to_string(&params).unwrap_or_default().as_bytes());
    hasher.update(b"|");
    hasher.update(serde_json::to_string(&headers).unwrap_or_default().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Delay to sleep after failed attempt `attempt` (0-indexed).
fn backoff_delay(config: &FetchConfig, attempt: u32) -> Duration {
    config
        .backoff_unit
        .mul_f64(config.backoff_base.powi(attempt as i32))
}

/// HTTP JSON client with content-addressed caching and retry/backoff.
#[derive(Clone)]
pub struct FetchClient {
    client: reqwest::Client,
    cache: Arc<dyn CacheStore>,
    config: FetchConfig,
}

impl FetchClient {
    pub fn new(cache: Arc<dyn CacheStore>, config: FetchConfig) -> Self {
        let client = reqwest::Client::builder()
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            cache,
            config,
        }
    }

    /// Perform a cached GET returning the parsed JSON body.
    pub async fn fetch_json(
        &self,
        url: &str,
        params: &[(String, String)],
        headers: &[(String, String)],
    ) -> Result<serde_json::Value, FetchError> {
        let key = cache_key(url, params, headers);

        if let Some(cached) = self.cache_lookup(&key) {
            return Ok(cached);
        }

        let header_map = build_header_map(headers)?;

        let mut last_err = FetchError::Transient {
            message: "no attempt made".to_string(),
        };

        for attempt in 0..self.config.max_attempts {
            match self.attempt(url, params, header_map.clone()).await {
                Ok(value) => {
                    // Best-effort cache write; a failure must not fail the call.
                    if let Ok(bytes) = serde_json::to_vec(&value) {
                        self.cache.put(&key, &bytes);
                    }
                    return Ok(value);
                }
                Err(err) => {
                    let retryable = err.is_retryable(self.config.retry_client_errors);
                    tracing::warn!(
                        "GET {} failed (attempt {}/{}): {}",
                        url,
                        attempt + 1,
                        self.config.max_attempts,
                        err
                    );
                    last_err = err;
                    if !retryable {
                        return Err(last_err);
                    }
                    if attempt + 1 < self.config.max_attempts {
                        tokio::time::sleep(backoff_delay(&self.config, attempt)).await;
                    }
                }
            }
        }

        Err(last_err)
    }

    /// Return the cached payload if present, fresh, and parseable.
    fn cache_lookup(&self, key: &str) -> Option<serde_json::Value> {
        let (payload, stored_at) = self.cache.get(key)?;
        let age = (Utc::now() - stored_at).to_std().unwrap_or(Duration::ZERO);
        if age > self.config.ttl {
            return None;
        }
        match serde_json::from_slice(&payload) {
            Ok(value) => Some(value),
            Err(e) => {
                // Corrupted entry — treat as a miss and refetch.
                tracing::warn!("Corrupted cache entry {}: {}", key, e);
                None
            }
        }
    }

    async fn attempt(
        &self,
        url: &str,
        params: &[(String, String)],
        headers: HeaderMap,
    ) -> Result<serde_json::Value, FetchError> {
        let response = self
            .client
            .get(url)
            .query(params)
            .headers(headers)
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(|e| FetchError::Transient {
                message: format!("transport failure: {}", e),
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(FetchError::Transient {
                message: format!("HTTP {}", status),
            });
        }
        if status.is_client_error() {
            return Err(FetchError::Client {
                status: status.as_u16(),
                message: format!("HTTP {}", status),
            });
        }

        response.json().await.map_err(|e| FetchError::Transient {
            message: format!("JSON parse error: {}", e),
        })
    }
}

fn build_header_map(headers: &[(String, String)]) -> Result<HeaderMap, FetchError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| FetchError::InvalidRequest(format!("header name '{}': {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| FetchError::InvalidRequest(format!("header value: {}", e)))?;
        map.insert(name, value);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn pairs(raw: &[(&str, &str)]) -> Vec<(String, String)> {
        raw.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn test_config() -> FetchConfig {
        FetchConfig {
            ttl: Duration::from_secs(600),
            timeout: Duration::from_secs(5),
            max_attempts: 3,
            backoff_base: 1.5,
            backoff_unit: Duration::from_millis(1),
            retry_client_errors: false,
        }
    }

    /// Cache stub with a controllable storage timestamp.
    struct FixedCache {
        payload: Vec<u8>,
        stored_at: DateTime<Utc>,
    }

    impl CacheStore for FixedCache {
        fn get(&self, _key: &str) -> Option<(Vec<u8>, DateTime<Utc>)> {
            Some((self.payload.clone(), self.stored_at))
        }

        fn put(&self, _key: &str, _payload: &[u8]) {}
    }

    #[test]
    fn test_cache_key_deterministic() {
        let a = cache_key("http://x", &pairs(&[("lat", "1"), ("lon", "2")]), &[]);
        let b = cache_key("http://x", &pairs(&[("lat", "1"), ("lon", "2")]), &[]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_cache_key_order_insensitive() {
        let a = cache_key("http://x", &pairs(&[("lat", "1"), ("lon", "2")]), &[]);
        let b = cache_key("http://x", &pairs(&[("lon", "2"), ("lat", "1")]), &[]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_cache_key_sensitive_to_any_component() {
        let base = cache_key("http://x", &pairs(&[("lat", "1")]), &pairs(&[("a", "b")]));
        assert_ne!(
            base,
            cache_key("http://y", &pairs(&[("lat", "1")]), &pairs(&[("a", "b")]))
        );
        assert_ne!(
            base,
            cache_key("http://x", &pairs(&[("lat", "2")]), &pairs(&[("a", "b")]))
        );
        assert_ne!(
            base,
            cache_key("http://x", &pairs(&[("lat", "1")]), &pairs(&[("a", "c")]))
        );
    }

    #[test]
    fn test_backoff_strictly_increases() {
        let cfg = FetchConfig::default();
        let mut prev = Duration::ZERO;
        for attempt in 0..6 {
            let d = backoff_delay(&cfg, attempt);
            assert!(d > prev, "delay must strictly increase: {:?} vs {:?}", prev, d);
            prev = d;
        }
    }

    #[test]
    fn test_backoff_base_values() {
        let cfg = FetchConfig::default();
        assert_eq!(backoff_delay(&cfg, 0), Duration::from_secs(1));
        assert_eq!(backoff_delay(&cfg, 1), Duration::from_millis(1500));
        assert_eq!(backoff_delay(&cfg, 2), Duration::from_millis(2250));
    }

    #[tokio::test]
    async fn test_fresh_cache_entry_skips_network() {
        // Unroutable URL — the call only succeeds if the cache is used.
        let cache = Arc::new(FixedCache {
            payload: br#"{"cached":true}"#.to_vec(),
            stored_at: Utc::now(),
        });
        let client = FetchClient::new(cache, test_config());
        let value = client
            .fetch_json("http://127.0.0.1:1/unreachable", &[], &[])
            .await
            .unwrap();
        assert_eq!(value["cached"], true);
    }

    #[tokio::test]
    async fn test_stale_cache_entry_triggers_refetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"v": 2})))
            .expect(1)
            .mount(&server)
            .await;

        let cache = Arc::new(FixedCache {
            payload: br#"{"v":1}"#.to_vec(),
            stored_at: Utc::now() - chrono::Duration::hours(1),
        });
        let client = FetchClient::new(cache, test_config());
        let value = client
            .fetch_json(&format!("{}/data", server.uri()), &[], &[])
            .await
            .unwrap();
        assert_eq!(value["v"], 2);
    }

    #[tokio::test]
    async fn test_corrupted_cache_entry_is_a_miss() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"v": 3})))
            .expect(1)
            .mount(&server)
            .await;

        let cache = Arc::new(FixedCache {
            payload: b"{not valid json".to_vec(),
            stored_at: Utc::now(),
        });
        let client = FetchClient::new(cache, test_config());
        let value = client
            .fetch_json(&format!("{}/data", server.uri()), &[], &[])
            .await
            .unwrap();
        assert_eq!(value["v"], 3);
    }

    #[tokio::test]
    async fn test_successful_fetch_populates_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"v": 4})))
            .expect(1)
            .mount(&server)
            .await;

        let client = FetchClient::new(Arc::new(MemoryCache::new()), test_config());
        let url = format!("{}/data", server.uri());
        let first = client.fetch_json(&url, &[], &[]).await.unwrap();
        // Second call must come from cache (mock expects exactly 1 request).
        let second = client.fetch_json(&url, &[], &[]).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_transient_failures_consume_all_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let client = FetchClient::new(Arc::new(MemoryCache::new()), test_config());
        let err = client
            .fetch_json(&format!("{}/flaky", server.uri()), &[], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Transient { .. }));
    }

    #[tokio::test]
    async fn test_429_retried_until_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/throttled"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/throttled"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": 1})))
            .expect(1)
            .mount(&server)
            .await;

        let client = FetchClient::new(Arc::new(MemoryCache::new()), test_config());
        let value = client
            .fetch_json(&format!("{}/throttled", server.uri()), &[], &[])
            .await
            .unwrap();
        assert_eq!(value["ok"], 1);
    }

    #[tokio::test]
    async fn test_client_error_fails_immediately() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = FetchClient::new(Arc::new(MemoryCache::new()), test_config());
        let err = client
            .fetch_json(&format!("{}/missing", server.uri()), &[], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Client { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_client_error_retried_when_policy_allows() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(3)
            .mount(&server)
            .await;

        let mut cfg = test_config();
        cfg.retry_client_errors = true;
        let client = FetchClient::new(Arc::new(MemoryCache::new()), cfg);
        let err = client
            .fetch_json(&format!("{}/missing", server.uri()), &[], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Client { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_invalid_header_is_not_retried() {
        let client = FetchClient::new(Arc::new(MemoryCache::new()), test_config());
        let err = client
            .fetch_json(
                "http://127.0.0.1:1/x",
                &[],
                &pairs(&[("bad header\n", "v")]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::InvalidRequest(_)));
    }

    #[test]
    fn test_file_cache_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path());
        cache.put("abc123", br#"{"x":1}"#);
        let (payload, stored_at) = cache.get("abc123").unwrap();
        assert_eq!(payload, br#"{"x":1}"#);
        assert!((Utc::now() - stored_at).num_seconds().abs() < 60);
    }

    #[test]
    fn test_file_cache_missing_key() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path());
        assert!(cache.get("nope").is_none());
    }
}
