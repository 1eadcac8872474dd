//! Single request execution
//!
//! Order of operations for one call: cache lookup for GET, URL and security
//! checks, then the retry-wrapped transport call where each attempt has its own
//! timeout. Successful GET responses are written back to the cache.

use std::sync::Arc;
use std::time::{Duration, Instant};

use url::Url;

use super::metrics::PerformanceMonitor;
use super::security::{SecurityValidator, UrlSecurityPolicy};
use super::transport::{ReqwestTransport, Transport};
use crate::cache::{key_for, ResponseCache, DEFAULT_TTL};
use crate::errors::{PulsechainError, Result};
use crate::http::{HttpRequest, HttpResponse};
use crate::retry::{is_retryable, retry, RetryOptions};

/// Upper bound for one attempt
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    cache: Option<Arc<ResponseCache>>,
    security: Arc<dyn SecurityValidator>,
    monitor: Arc<PerformanceMonitor>,
    retry: RetryOptions<PulsechainError>,
    timeout: Duration,
    default_ttl: Duration,
}

impl RequestExecutor {
    /// Executor over `transport` with no cache and default policies
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            cache: None,
            security: Arc::new(UrlSecurityPolicy::default()),
            monitor: Arc::new(PerformanceMonitor::new()),
            retry: RetryOptions::default().retry_if(is_retryable),
            timeout: DEFAULT_TIMEOUT,
            default_ttl: DEFAULT_TTL,
        }
    }

    /// Executor over the reqwest transport
    pub fn with_reqwest() -> Result<Self> {
        Ok(Self::new(Arc::new(ReqwestTransport::new()?)))
    }

    pub fn with_cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_security(mut self, security: Arc<dyn SecurityValidator>) -> Self {
        self.security = security;
        self
    }

    pub fn with_monitor(mut self, monitor: Arc<PerformanceMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    /// Replace the retry budget. The predicate given here decides what is retried.
    pub fn with_retry(mut self, retry: RetryOptions<PulsechainError>) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// TTL used when a call does not name one
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn cache(&self) -> Option<&Arc<ResponseCache>> {
        self.cache.as_ref()
    }

    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }

    /// Execute one request.
    ///
    /// `use_cache` only matters for GET requests and when the executor has a
    /// cache. `cache_ttl` falls back to the executor default.
    pub async fn execute_request(
        &self,
        request: &HttpRequest,
        use_cache: bool,
        cache_ttl: Option<Duration>,
    ) -> Result<HttpResponse> {
        let cache = self.cache.as_ref().filter(|_| use_cache && request.is_get());
        let key = key_for(request);

        if let Some(cache) = cache {
            if let Some(response) = cache.get::<HttpResponse>(&key).await {
                tracing::debug!(url = %request.url, "Serving response from cache");
                return Ok(response);
            }
        }

        let response = match self.send_checked(request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(url = %request.url, method = %request.method, "{}", e.user_message());
                return Err(e);
            }
        };

        if let Some(cache) = cache {
            if response.is_success() {
                cache
                    .set(&key, &response, cache_ttl.unwrap_or(self.default_ttl))
                    .await;
            }
        }

        Ok(response)
    }

    async fn send_checked(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let url = Url::parse(&request.url).map_err(|e| PulsechainError::InvalidUrl {
            url: request.url.clone(),
            reason: e.to_string(),
        })?;

        let verdict = self.security.validate(&url);
        if !verdict.valid {
            return Err(PulsechainError::SecurityValidationFailed {
                url: request.url.clone(),
                reason: verdict
                    .reason
                    .unwrap_or_else(|| "rejected by security policy".to_string()),
            });
        }

        let start = Instant::now();
        let response = retry(|| self.attempt(request), &self.retry).await?;
        let elapsed = start.elapsed();

        self.monitor.track_request(&request.url, elapsed);
        tracing::debug!(
            url = %request.url,
            method = %request.method,
            status = response.status,
            elapsed_ms = elapsed.as_millis() as u64,
            "Request completed"
        );
        Ok(response)
    }

    /// One timeout-bounded attempt. Statuses the retry policy cares about are
    /// turned into errors here so the predicate can see them.
    async fn attempt(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let response = tokio::time::timeout(self.timeout, self.transport.send(request))
            .await
            .map_err(|_| PulsechainError::Timeout(self.timeout.as_secs_f64()))??;

        match PulsechainError::from_status(response.status, response.status_text.as_str()) {
            Some(err) if err.is_retryable() => Err(err),
            // Other 4xx are answers, not failures
            _ => Ok(response),
        }
    }
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("cache", &self.cache.is_some())
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheSettings;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Replays canned outcomes and counts calls
    struct ScriptedTransport {
        outcomes: Mutex<VecDeque<Result<HttpResponse>>>,
        calls: AtomicU32,
        delay: Option<Duration>,
    }

    impl ScriptedTransport {
        fn new(outcomes: Vec<Result<HttpResponse>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: AtomicU32::new(0),
                delay: None,
            })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(VecDeque::new()),
                calls: AtomicU32::new(0),
                delay: Some(delay),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, _request: &HttpRequest) -> Result<HttpResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(HttpResponse::new(200, "default")))
        }
    }

    fn fast_retry(max_retries: u32) -> RetryOptions<PulsechainError> {
        RetryOptions::new(max_retries, Duration::from_millis(1), true).retry_if(is_retryable)
    }

    fn executor(transport: Arc<ScriptedTransport>) -> RequestExecutor {
        RequestExecutor::new(transport).with_retry(fast_retry(3))
    }

    #[tokio::test]
    async fn test_cached_get_skips_network() {
        let transport = ScriptedTransport::new(vec![Ok(HttpResponse::new(200, "first"))]);
        let cache = Arc::new(ResponseCache::memory_only(CacheSettings::default()));
        let exec = executor(transport.clone()).with_cache(cache.clone());
        let req = HttpRequest::get("http://api.test/users");

        let first = exec.execute_request(&req, true, None).await.unwrap();
        let second = exec.execute_request(&req, true, None).await.unwrap();

        assert_eq!(first.body, "first");
        assert_eq!(second, first);
        assert_eq!(transport.calls(), 1);
        assert_eq!(cache.stats().await.hits, 1);
    }

    #[tokio::test]
    async fn test_post_is_never_cached() {
        let transport = ScriptedTransport::new(vec![]);
        let cache = Arc::new(ResponseCache::memory_only(CacheSettings::default()));
        let exec = executor(transport.clone()).with_cache(cache.clone());
        let req = HttpRequest::new("POST", "http://api.test/users").unwrap().with_body("{}");

        exec.execute_request(&req, true, None).await.unwrap();
        exec.execute_request(&req, true, None).await.unwrap();
        assert_eq!(transport.calls(), 2);
        assert_eq!(cache.stats().await.memory_entries, 0);
    }

    #[tokio::test]
    async fn test_invalid_url_makes_no_attempt() {
        let transport = ScriptedTransport::new(vec![]);
        let exec = executor(transport.clone());

        let err = exec
            .execute_request(&HttpRequest::get("not a url"), false, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PulsechainError::InvalidUrl { .. }));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_security_rejection_makes_no_attempt() {
        let transport = ScriptedTransport::new(vec![]);
        let exec = executor(transport.clone()).with_security(Arc::new(UrlSecurityPolicy::new(true)));

        let err = exec
            .execute_request(&HttpRequest::get("http://remote.test/"), false, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PulsechainError::SecurityValidationFailed { .. }));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let transport = ScriptedTransport::new(vec![
            Ok(HttpResponse::new(503, "")),
            Ok(HttpResponse::new(502, "")),
            Ok(HttpResponse::new(200, "ok")),
        ]);
        let exec = executor(transport.clone());

        let response = exec
            .execute_request(&HttpRequest::get("http://api.test/flaky"), false, None)
            .await
            .unwrap();
        assert_eq!(response.body, "ok");
        assert_eq!(transport.calls(), 3);
        assert_eq!(exec.monitor().metrics("request:http://api.test/flaky").len(), 1);
    }

    #[tokio::test]
    async fn test_client_error_is_returned_without_retry() {
        let transport = ScriptedTransport::new(vec![Ok(HttpResponse::new(404, "missing"))]);
        let exec = executor(transport.clone());

        let response = exec
            .execute_request(&HttpRequest::get("http://api.test/none"), false, None)
            .await
            .unwrap();
        assert_eq!(response.status, 404);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_exhausts_budget() {
        let transport = ScriptedTransport::new(
            (0..3).map(|_| Ok(HttpResponse::new(429, ""))).collect(),
        );
        let exec = RequestExecutor::new(transport.clone()).with_retry(fast_retry(2));

        let err = exec
            .execute_request(&HttpRequest::get("http://api.test/busy"), false, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PulsechainError::RateLimited));
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_timeout_bounds_each_attempt() {
        let transport = ScriptedTransport::slow(Duration::from_millis(200));
        let exec = RequestExecutor::new(transport.clone())
            .with_retry(fast_retry(1))
            .with_timeout(Duration::from_millis(20));

        let err = exec
            .execute_request(&HttpRequest::get("http://api.test/slow"), false, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PulsechainError::Timeout(_)));
        assert_eq!(transport.calls(), 2);
    }
}
