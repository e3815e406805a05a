//! Resilient dispatcher.
//!
//! # Responsibilities
//! - Serve cacheable reads from the response cache
//! - Gate each service behind its circuit breaker
//! - Retry transient failures with backoff inside the breaker
//! - Forward the request to a healthy instance and buffer the reply
//! - Store successful reads in the cache
//!
//! # Design Decisions
//! - The breaker records one outcome per dispatch, not per attempt
//! - Statuses in `retryable_statuses` are retried; other 5xx are terminal
//! - Cache hits never touch the breaker or the network
//! - Cache writes are best-effort
//! - Oversized responses fail the request without a retry or a breaker failure

use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::time::Instant;

use crate::cache::{cache_key, CachedResponse, ResponseCache};
use crate::config::GatewayConfig;
use crate::discovery::ServiceLocator;
use crate::dispatch::DispatchError;
use crate::observability::metrics;
use crate::resilience::{retry_if, BreakerSettings, CircuitBreakerRegistry, RetryPolicy};
use crate::security::{outbound_headers, strip_hop_by_hop, ForwardedFor};

pub const X_CACHE: &str = "x-cache";

/// A buffered inbound request bound for one service.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub method: Method,
    /// Path and query as sent to the backend.
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub origin: ForwardedFor,
}

impl DispatchRequest {
    pub fn get(path_and_query: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path_and_query: path_and_query.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            origin: ForwardedFor::default(),
        }
    }
}

/// A buffered backend response.
#[derive(Debug, Clone)]
pub struct DispatchResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub cache_hit: bool,
}

impl DispatchResponse {
    fn from_cached(cached: CachedResponse) -> Self {
        let mut headers = HeaderMap::new();
        if let Some(value) = cached
            .content_type
            .as_deref()
            .and_then(|ct| HeaderValue::from_str(ct).ok())
        {
            headers.insert(header::CONTENT_TYPE, value);
        }

        Self {
            status: StatusCode::from_u16(cached.status_code).unwrap_or(StatusCode::OK),
            headers,
            body: cached.body,
            cache_hit: true,
        }
    }

    fn to_cached(&self) -> CachedResponse {
        CachedResponse {
            status_code: self.status.as_u16(),
            body: self.body.clone(),
            content_type: self
                .headers
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        }
    }
}

impl IntoResponse for DispatchResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response.headers_mut().insert(
            X_CACHE,
            HeaderValue::from_static(if self.cache_hit { "HIT" } else { "MISS" }),
        );
        response
    }
}

/// Composes discovery, breaker, retries and cache for every request.
pub struct Dispatcher {
    locator: Arc<dyn ServiceLocator>,
    cache: Option<Arc<dyn ResponseCache>>,
    client: Client<HttpConnector, Body>,
    breakers: CircuitBreakerRegistry,
    retry_policy: RetryPolicy,
    retryable_statuses: Vec<u16>,
    cache_ttl: Duration,
    attempt_timeout: Duration,
    max_body_bytes: usize,
}

impl Dispatcher {
    pub fn new(locator: Arc<dyn ServiceLocator>, config: &GatewayConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_secs(config.timeouts.connect_secs)));
        let client = Client::builder(TokioExecutor::new()).build(connector);

        let breakers = CircuitBreakerRegistry::new(BreakerSettings::from_config(
            &config.circuit_breaker,
        ))
        .with_observer(Arc::new(metrics::record_breaker_transition));

        Self {
            locator,
            cache: None,
            client,
            breakers,
            retry_policy: RetryPolicy::from_config(&config.retries),
            retryable_statuses: config.retries.retryable_statuses.clone(),
            cache_ttl: config.cache.ttl(),
            attempt_timeout: Duration::from_secs(config.timeouts.attempt_secs),
            max_body_bytes: config.limits.max_body_bytes,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    /// Proxy `request` to `service`, giving up at `deadline`.
    pub async fn dispatch(
        &self,
        service: &str,
        request: DispatchRequest,
        deadline: Instant,
    ) -> Result<DispatchResponse, DispatchError> {
        let key = match (&self.cache, request.method == Method::GET) {
            (Some(_), true) => Some(cache_key(service, &request.path_and_query)),
            _ => None,
        };

        if let (Some(cache), Some(key)) = (&self.cache, &key) {
            if let Some(cached) = cache.get(key).await {
                metrics::record_cache(true);
                tracing::debug!(service = %service, key = %key, "Cache hit");
                return Ok(DispatchResponse::from_cached(cached));
            }
            metrics::record_cache(false);
        }

        let breaker = self.breakers.get_or_create(service);
        let request = &request;
        let response = breaker
            .execute_if(DispatchError::is_backend_failure, || async {
                retry_if(
                    &self.retry_policy,
                    deadline,
                    DispatchError::is_retryable,
                    |attempt| self.attempt(service, request, attempt),
                )
                .await
                .map_err(DispatchError::from)
            })
            .await?;

        if let (Some(cache), Some(key)) = (&self.cache, key) {
            if response.status.is_success() {
                if let Err(e) = cache.set(&key, response.to_cached(), self.cache_ttl).await {
                    tracing::warn!(service = %service, key = %key, error = %e, "Failed to cache response");
                }
            }
        }

        Ok(response)
    }

    async fn attempt(
        &self,
        service: &str,
        request: &DispatchRequest,
        attempt: u32,
    ) -> Result<DispatchResponse, DispatchError> {
        if attempt > 1 {
            metrics::record_retry(service);
            tracing::info!(service = %service, attempt, path = %request.path_and_query, "Retrying request");
        }

        let address = self.locator.resolve_healthy(service).await?;

        let mut headers = outbound_headers(&request.headers, &request.origin);
        // The client derives Host from the backend URI.
        headers.remove(header::HOST);

        let uri = format!("http://{address}{}", request.path_and_query);
        let mut outbound = Request::builder()
            .method(request.method.clone())
            .uri(uri)
            .body(Body::from(request.body.clone()))
            .map_err(|e| DispatchError::InvalidRequest(e.to_string()))?;
        *outbound.headers_mut() = headers;

        let exchange = async {
            let response = self
                .client
                .request(outbound)
                .await
                .map_err(|e| DispatchError::TransportFailed(e.to_string()))?;

            let (parts, body) = response.into_parts();
            let body = Limited::new(body, self.max_body_bytes)
                .collect()
                .await
                .map_err(|e| {
                    if e.is::<LengthLimitError>() {
                        DispatchError::ResponseTooLarge {
                            limit: self.max_body_bytes,
                        }
                    } else {
                        DispatchError::TransportFailed(e.to_string())
                    }
                })?
                .to_bytes();
            Ok::<_, DispatchError>((parts, body))
        };

        let (parts, body) = match tokio::time::timeout(self.attempt_timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::TransportFailed(format!(
                "attempt timed out after {:?}",
                self.attempt_timeout
            ))),
        }
        .inspect_err(|e| {
            tracing::warn!(service = %service, attempt, error = %e, "Upstream request failed");
        })?;

        let status = parts.status;
        if self.retryable_statuses.contains(&status.as_u16()) {
            tracing::warn!(service = %service, attempt, status = %status, "Backend returned transient status");
            return Err(DispatchError::RetryableStatus(status));
        }
        if status.is_server_error() {
            tracing::warn!(service = %service, attempt, status = %status, "Backend returned error status");
            return Err(DispatchError::TerminalStatus(status));
        }

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);

        Ok(DispatchResponse {
            status,
            headers,
            body,
            cache_hit: false,
        })
    }
}
