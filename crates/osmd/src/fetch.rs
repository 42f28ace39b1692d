//! Fetch capability: `fetch(url) -> bytes`, possibly served from cache.
//!
//! [`HttpFetcher`] is the production client. With the `test-utils` feature,
//! `StaticFetcher` serves canned responses instead. Sources never hold a
//! client directly; each sync pass builds a [`FetchContext`] carrying the
//! fetcher, a snapshot of credentials and the retry policy.

use crate::tokens::{Credential, TokenStore};
use async_trait::async_trait;
use osm_core::{AppstoreId, Error};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("transport error for {url}: {message}")]
    Transport { url: String, message: String },
    #[error("not found: {url}")]
    NotFound { url: String },
    #[error("rate limited: {url}")]
    RateLimited { url: String },
    #[error("unauthorized: {url}: {message}")]
    Unauthorized { url: String, message: String },
    #[error("http {status} for {url}")]
    Http { url: String, status: u16 },
}

impl FetchError {
    /// Transport failures, rate limits and server errors may clear up.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } | Self::RateLimited { .. } => true,
            Self::Http { status, .. } => *status >= 500,
            Self::NotFound { .. } | Self::Unauthorized { .. } => false,
        }
    }
}

impl From<FetchError> for Error {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::NotFound { .. } => Error::not_found(e.to_string()),
            FetchError::RateLimited { .. } => Error::rate_limited(e.to_string()),
            FetchError::Unauthorized { .. } => Error::authentication(e.to_string()),
            FetchError::Transport { .. } | FetchError::Http { .. } => {
                Error::source_unavailable(e.to_string())
            }
        }
    }
}

/// One GET request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub credential: Option<Credential>,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            credential: None,
        }
    }

    pub fn with_credential(mut self, credential: Option<Credential>) -> Self {
        self.credential = credential;
        self
    }
}

/// Map an HTTP status (plus rate-limit header and body) to a fetch error.
///
/// GitHub reports exhausted quotas as 403 with `x-ratelimit-remaining: 0`
/// and rejected tokens as 401 (or 403) with "Bad credentials".
pub fn classify_status(
    url: &str,
    status: u16,
    ratelimit_remaining: Option<&str>,
    body: &[u8],
) -> Option<FetchError> {
    if (200..300).contains(&status) {
        return None;
    }
    let text = String::from_utf8_lossy(body).to_lowercase();
    let url = url.to_string();
    Some(match status {
        404 => FetchError::NotFound { url },
        401 => FetchError::Unauthorized {
            url,
            message: "credential rejected".to_string(),
        },
        403 | 429
            if ratelimit_remaining.map(str::trim) == Some("0") || text.contains("rate limit") =>
        {
            FetchError::RateLimited { url }
        }
        403 if text.contains("bad credentials") => FetchError::Unauthorized {
            url,
            message: "bad credentials".to_string(),
        },
        429 => FetchError::RateLimited { url },
        _ => FetchError::Http { url, status },
    })
}

/// Byte source used by every appstore adapter.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<u8>, FetchError>;
}

/// `reqwest` client with a per-URL TTL cache for anonymous requests.
pub struct HttpFetcher {
    client: reqwest::Client,
    ttl: Duration,
    cache: Mutex<HashMap<String, (Instant, Arc<Vec<u8>>)>>,
}

impl std::fmt::Debug for HttpFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFetcher")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl HttpFetcher {
    pub fn new(user_agent: &str, request_timeout: Duration, ttl: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(request_timeout)
            .build()
            .map_err(|e| FetchError::Transport {
                url: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            ttl,
            cache: Mutex::new(HashMap::new()),
        })
    }

    fn cached(&self, url: &str) -> Option<Vec<u8>> {
        let cache = self.cache.lock().ok()?;
        let (stored_at, body) = cache.get(url)?;
        (stored_at.elapsed() < self.ttl).then(|| body.as_ref().clone())
    }

    fn store(&self, url: &str, body: &[u8]) {
        if self.ttl.is_zero() {
            return;
        }
        if let Ok(mut cache) = self.cache.lock() {
            cache.retain(|_, (stored_at, _)| stored_at.elapsed() < self.ttl);
            cache.insert(url.to_string(), (Instant::now(), Arc::new(body.to_vec())));
        }
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<u8>, FetchError> {
        let anonymous = request.credential.is_none();
        if anonymous {
            if let Some(body) = self.cached(&request.url) {
                debug!(url = %request.url, "cache hit");
                return Ok(body);
            }
        }

        let mut builder = self.client.get(&request.url);
        if let Some(credential) = &request.credential {
            builder = builder.bearer_auth(&credential.token);
        }
        let response = builder.send().await.map_err(|e| FetchError::Transport {
            url: request.url.clone(),
            message: e.to_string(),
        })?;

        let status = response.status().as_u16();
        let remaining = response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(|e| FetchError::Transport {
            url: request.url.clone(),
            message: e.to_string(),
        })?;

        if let Some(err) = classify_status(&request.url, status, remaining.as_deref(), &body) {
            return Err(err);
        }
        if anonymous {
            self.store(&request.url, &body);
        }
        debug!(url = %request.url, status, bytes = body.len(), "fetched");
        Ok(body.to_vec())
    }
}

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            retries: 0,
            backoff: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (0-based): backoff * 2^attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(1u32 << attempt.min(16))
    }
}

/// Fetch, retrying retryable failures per `policy`.
pub async fn fetch_with_retry(
    fetcher: &dyn Fetch,
    request: &FetchRequest,
    policy: RetryPolicy,
) -> Result<Vec<u8>, FetchError> {
    let mut attempt = 0;
    loop {
        match fetcher.fetch(request).await {
            Ok(body) => return Ok(body),
            Err(e) if e.is_retryable() && attempt < policy.retries => {
                let delay = policy.delay(attempt);
                warn!(url = %request.url, error = %e, attempt, ?delay, "fetch failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Per-pass client context: fetcher, credential snapshot, retry policy.
#[derive(Clone)]
pub struct FetchContext {
    fetcher: Arc<dyn Fetch>,
    tokens: Arc<TokenStore>,
    credentials: HashMap<AppstoreId, Credential>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for FetchContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchContext")
            .field("credentials", &self.credentials)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl FetchContext {
    /// Snapshot the current credentials of every appstore.
    pub fn new(fetcher: Arc<dyn Fetch>, tokens: Arc<TokenStore>, policy: RetryPolicy) -> Self {
        let credentials = AppstoreId::ALL
            .iter()
            .filter_map(|id| tokens.credential(*id).map(|c| (*id, c)))
            .collect();
        Self {
            fetcher,
            tokens,
            credentials,
            policy,
        }
    }

    /// GET `url` on behalf of `appstore`, authenticating with the snapshot
    /// credential if one exists.
    pub async fn get(&self, url: &str, appstore: AppstoreId) -> osm_core::Result<Vec<u8>> {
        let credential = self.credentials.get(&appstore).cloned();
        let request = FetchRequest::new(url).with_credential(credential.clone());
        match fetch_with_retry(self.fetcher.as_ref(), &request, self.policy).await {
            Ok(body) => Ok(body),
            Err(FetchError::Unauthorized { url, message }) => {
                let rotated = credential
                    .is_some_and(|c| self.tokens.is_stale(appstore, c.generation));
                if rotated {
                    Err(Error::authentication(format!(
                        "token rotated while request was in flight: {url}"
                    )))
                } else {
                    Err(Error::authentication(format!("{message}: {url}")))
                }
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use canned::StaticFetcher;

#[cfg(any(test, feature = "test-utils"))]
mod canned {
    use super::{Fetch, FetchError, FetchRequest};
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::time::Duration;

    type Canned = Result<Vec<u8>, FetchError>;

    /// In-memory fetcher with scripted responses.
    ///
    /// Each URL holds a queue of responses; the last one repeats. Unknown URLs
    /// are `NotFound`.
    #[derive(Debug, Default)]
    pub struct StaticFetcher {
        routes: Mutex<HashMap<String, VecDeque<Canned>>>,
        requests: Mutex<Vec<FetchRequest>>,
        delay: Mutex<Option<Duration>>,
        prefix_delays: Mutex<Vec<(String, Duration)>>,
    }

    impl StaticFetcher {
        pub fn new() -> Self {
            Self::default()
        }

        /// Replace all responses for `url` with `body`.
        pub fn set_body(&self, url: &str, body: impl Into<Vec<u8>>) {
            self.set(url, vec![Ok(body.into())]);
        }

        pub fn set_json(&self, url: &str, value: &serde_json::Value) {
            self.set_body(url, value.to_string());
        }

        pub fn set_error(&self, url: &str, error: FetchError) {
            self.set(url, vec![Err(error)]);
        }

        /// Script a sequence of responses; the last repeats.
        pub fn set(&self, url: &str, responses: Vec<Canned>) {
            if let Ok(mut routes) = self.routes.lock() {
                routes.insert(url.to_string(), responses.into());
            }
        }

        /// Sleep this long before answering each request.
        pub fn set_delay(&self, delay: Option<Duration>) {
            if let Ok(mut slot) = self.delay.lock() {
                *slot = delay;
            }
        }

        /// Sleep this long before answering requests whose URL starts with
        /// `prefix`. Overrides [`StaticFetcher::set_delay`] for those URLs.
        pub fn set_delay_for(&self, prefix: &str, delay: Duration) {
            if let Ok(mut delays) = self.prefix_delays.lock() {
                delays.push((prefix.to_string(), delay));
            }
        }

        /// Requests seen so far, in order.
        pub fn requests(&self) -> Vec<FetchRequest> {
            self.requests.lock().map(|r| r.clone()).unwrap_or_default()
        }

        pub fn calls(&self, url: &str) -> usize {
            self.requests().iter().filter(|r| r.url == url).count()
        }

        fn delay_for(&self, url: &str) -> Option<Duration> {
            let by_prefix = self.prefix_delays.lock().ok().and_then(|delays| {
                delays
                    .iter()
                    .rev()
                    .find(|(prefix, _)| url.starts_with(prefix.as_str()))
                    .map(|(_, d)| *d)
            });
            by_prefix.or_else(|| self.delay.lock().ok().and_then(|d| *d))
        }

        fn next_response(&self, url: &str) -> Canned {
            let not_found = || {
                Err(FetchError::NotFound {
                    url: url.to_string(),
                })
            };
            let Ok(mut routes) = self.routes.lock() else {
                return Err(FetchError::Transport {
                    url: url.to_string(),
                    message: "poisoned".to_string(),
                });
            };
            let Some(queue) = routes.get_mut(url) else {
                return not_found();
            };
            if queue.len() > 1 {
                queue.pop_front().unwrap_or_else(not_found)
            } else {
                queue.front().cloned().unwrap_or_else(not_found)
            }
        }
    }

    #[async_trait]
    impl Fetch for StaticFetcher {
        async fn fetch(&self, request: &FetchRequest) -> Result<Vec<u8>, FetchError> {
            if let Ok(mut requests) = self.requests.lock() {
                requests.push(request.clone());
            }
            if let Some(delay) = self.delay_for(&request.url) {
                tokio::time::sleep(delay).await;
            }
            self.next_response(&request.url)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use osm_core::ErrorKind;

    fn transport(url: &str) -> FetchError {
        FetchError::Transport {
            url: url.into(),
            message: "connection reset".into(),
        }
    }

    #[test]
    fn classify_distinguishes_not_found_and_rate_limit() {
        let url = "https://api.github.com/x";
        assert_eq!(classify_status(url, 200, None, b""), None);
        assert!(matches!(
            classify_status(url, 404, None, b""),
            Some(FetchError::NotFound { .. })
        ));
        assert!(matches!(
            classify_status(url, 403, Some("0"), b"{}"),
            Some(FetchError::RateLimited { .. })
        ));
        assert!(matches!(
            classify_status(url, 403, Some("12"), br#"{"message":"API rate limit exceeded"}"#),
            Some(FetchError::RateLimited { .. })
        ));
        assert!(matches!(
            classify_status(url, 403, Some("12"), br#"{"message":"Bad credentials"}"#),
            Some(FetchError::Unauthorized { .. })
        ));
        assert!(matches!(
            classify_status(url, 401, None, b""),
            Some(FetchError::Unauthorized { .. })
        ));
        assert!(matches!(
            classify_status(url, 502, None, b""),
            Some(FetchError::Http { status: 502, .. })
        ));
    }

    #[test]
    fn fetch_errors_map_to_kinds() {
        let url = "u".to_string();
        assert_eq!(Error::from(FetchError::NotFound { url: url.clone() }).kind, ErrorKind::NotFound);
        assert_eq!(
            Error::from(FetchError::RateLimited { url: url.clone() }).kind,
            ErrorKind::RateLimited
        );
        assert_eq!(Error::from(transport(&url)).kind, ErrorKind::SourceUnavailable);
        assert_eq!(
            Error::from(FetchError::Http { url, status: 500 }).kind,
            ErrorKind::SourceUnavailable
        );
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy {
            retries: 3,
            backoff: Duration::from_millis(100),
        };
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn retry_recovers_from_transient_failure() {
        let fetcher = StaticFetcher::new();
        let url = "https://example.com/list.json";
        fetcher.set(url, vec![Err(transport(url)), Ok(b"[]".to_vec())]);
        let policy = RetryPolicy {
            retries: 2,
            backoff: Duration::from_millis(1),
        };
        let body = fetch_with_retry(&fetcher, &FetchRequest::new(url), policy).await.unwrap();
        assert_eq!(body, b"[]");
        assert_eq!(fetcher.calls(url), 2);
    }

    #[tokio::test]
    async fn not_found_is_not_retried() {
        let fetcher = StaticFetcher::new();
        let url = "https://example.com/missing";
        let policy = RetryPolicy {
            retries: 5,
            backoff: Duration::from_millis(1),
        };
        let err = fetch_with_retry(&fetcher, &FetchRequest::new(url), policy).await.unwrap_err();
        assert!(matches!(err, FetchError::NotFound { .. }));
        assert_eq!(fetcher.calls(url), 1);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let fetcher = StaticFetcher::new();
        let url = "https://example.com/flaky";
        fetcher.set_error(url, FetchError::RateLimited { url: url.into() });
        let policy = RetryPolicy {
            retries: 2,
            backoff: Duration::from_millis(1),
        };
        let err = fetch_with_retry(&fetcher, &FetchRequest::new(url), policy).await.unwrap_err();
        assert!(matches!(err, FetchError::RateLimited { .. }));
        assert_eq!(fetcher.calls(url), 3);
    }

    #[tokio::test]
    async fn context_sends_snapshot_credential() {
        let fetcher = Arc::new(StaticFetcher::new());
        let tokens = Arc::new(TokenStore::new());
        tokens.rotate(AppstoreId::Neon, Some("tok".into()));
        let url = "https://api.github.com/repos/a/b/contents/x.json";
        fetcher.set_body(url, "{}");

        let ctx = FetchContext::new(
            Arc::clone(&fetcher) as Arc<dyn Fetch>,
            Arc::clone(&tokens),
            RetryPolicy::none(),
        );
        ctx.get(url, AppstoreId::Neon).await.unwrap();
        ctx.get(url, AppstoreId::Ovos).await.unwrap();

        let requests = fetcher.requests();
        assert_eq!(requests[0].credential.as_ref().unwrap().token, "tok");
        assert!(requests[1].credential.is_none());
    }

    #[tokio::test]
    async fn stale_token_fails_with_authentication() {
        let fetcher = Arc::new(StaticFetcher::new());
        let tokens = Arc::new(TokenStore::new());
        tokens.rotate(AppstoreId::Neon, Some("old".into()));
        let url = "https://api.github.com/repos/a/b/contents/x.json";
        fetcher.set_error(
            url,
            FetchError::Unauthorized {
                url: url.into(),
                message: "bad credentials".into(),
            },
        );

        let ctx = FetchContext::new(
            Arc::clone(&fetcher) as Arc<dyn Fetch>,
            Arc::clone(&tokens),
            RetryPolicy::default(),
        );
        // Rotation after the pass snapshot was taken.
        tokens.rotate(AppstoreId::Neon, Some("new".into()));

        let err = ctx.get(url, AppstoreId::Neon).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Authentication);
        assert!(err.message.contains("rotated"));
        assert_eq!(fetcher.calls(url), 1);
        assert_eq!(fetcher.requests()[0].credential.as_ref().unwrap().token, "old");
    }
}
