//! Token-bucket rate limiting.
//!
//! # Responsibilities
//! - Admit or deny a request per client key (`RateLimiter::allow`)
//! - Resolve per-endpoint overrides by path prefix
//! - Forget idle visitors on a periodic sweep
//! - Reject throttled requests with 429 + `Retry-After`
//!
//! # Design Decisions
//! - One lock for the visitor table, one per visitor for its bucket
//! - New visitors start with a full bucket
//! - Each endpoint limiter has its own visitor table

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::Response,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::RateLimitConfig;
use crate::http::response::rate_limited;
use crate::observability::metrics;
use crate::routing::{PathPrefixMatcher, RouteTable};
use crate::security::headers::client_key;

/// Token state for one client.
#[derive(Debug)]
struct Visitor {
    tokens: f64,
    last_refill: Instant,
}

impl Visitor {
    fn new(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
        }
    }

    fn try_acquire(&mut self, capacity: f64, per_second: f64, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * per_second).min(capacity);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Per-key token bucket limiter.
#[derive(Debug)]
pub struct RateLimiter {
    rate_per_minute: u32,
    burst: u32,
    visitors: RwLock<HashMap<String, Arc<Mutex<Visitor>>>>,
}

impl RateLimiter {
    pub fn new(rate_per_minute: u32, burst: u32) -> Self {
        Self {
            rate_per_minute,
            burst,
            visitors: RwLock::new(HashMap::new()),
        }
    }

    pub fn rate_per_minute(&self) -> u32 {
        self.rate_per_minute
    }

    pub fn burst(&self) -> u32 {
        self.burst
    }

    /// Spend one token for `key`, returning whether the request is admitted.
    pub fn allow(&self, key: &str) -> bool {
        let now = Instant::now();
        let capacity = f64::from(self.burst);
        let per_second = f64::from(self.rate_per_minute) / 60.0;

        let visitor = self.visitor(key, capacity, now);
        let mut visitor = visitor.lock().expect("visitor mutex poisoned");
        visitor.try_acquire(capacity, per_second, now)
    }

    fn visitor(&self, key: &str, capacity: f64, now: Instant) -> Arc<Mutex<Visitor>> {
        if let Some(visitor) = self
            .visitors
            .read()
            .expect("visitor table lock poisoned")
            .get(key)
        {
            return visitor.clone();
        }

        self.visitors
            .write()
            .expect("visitor table lock poisoned")
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Visitor::new(capacity, now))))
            .clone()
    }

    pub fn visitor_count(&self) -> usize {
        self.visitors.read().expect("visitor table lock poisoned").len()
    }

    /// Drop visitors that have not been seen for `idle_timeout`.
    ///
    /// Returns the number of visitors removed.
    pub fn sweep_idle(&self, idle_timeout: Duration) -> usize {
        let now = Instant::now();
        let is_idle = |visitor: &Arc<Mutex<Visitor>>| {
            let visitor = visitor.lock().expect("visitor mutex poisoned");
            now.saturating_duration_since(visitor.last_refill) >= idle_timeout
        };

        let candidates: Vec<String> = self
            .visitors
            .read()
            .expect("visitor table lock poisoned")
            .iter()
            .filter(|(_, visitor)| is_idle(visitor))
            .map(|(key, _)| key.clone())
            .collect();

        let mut removed = 0;
        for key in candidates {
            let mut visitors = self.visitors.write().expect("visitor table lock poisoned");
            // The visitor may have been active since the scan.
            if visitors.get(&key).is_some_and(|visitor| is_idle(visitor)) {
                visitors.remove(&key);
                removed += 1;
            }
        }
        removed
    }

    /// Run `sweep_idle` every `interval` until shutdown.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        idle_timeout: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            tracing::debug!(
                rate_per_minute = limiter.rate_per_minute(),
                burst = limiter.burst(),
                interval = ?interval,
                "Visitor sweeper started"
            );
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = limiter.sweep_idle(idle_timeout);
                        if removed > 0 {
                            tracing::debug!(removed, remaining = limiter.visitor_count(), "Swept idle visitors");
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
        })
    }
}

/// Default limiter plus prefix-matched overrides.
#[derive(Debug)]
pub struct EndpointRateLimiterRegistry {
    default: Arc<RateLimiter>,
    overrides: Vec<(PathPrefixMatcher, Arc<RateLimiter>)>,
}

impl EndpointRateLimiterRegistry {
    pub fn new(default: RateLimiter) -> Self {
        Self {
            default: Arc::new(default),
            overrides: Vec::new(),
        }
    }

    pub fn with_override(mut self, path_prefix: &str, limiter: RateLimiter) -> Self {
        self.overrides
            .push((PathPrefixMatcher::new(path_prefix), Arc::new(limiter)));
        // Longest prefix first; stable for equal lengths.
        self.overrides
            .sort_by(|a, b| b.0.specificity().cmp(&a.0.specificity()));
        self
    }

    /// Build from the `rate_limit` section and the routes' own limits.
    pub fn from_routes(config: &RateLimitConfig, routes: &RouteTable) -> Self {
        let mut registry = Self::new(RateLimiter::new(config.rate_per_minute, config.burst));
        for endpoint in &config.overrides {
            registry = registry.with_override(
                &endpoint.path_prefix,
                RateLimiter::new(endpoint.rate_per_minute, endpoint.burst),
            );
        }
        for route in routes.routes() {
            if let Some(limit) = route.rate_limit {
                registry = registry.with_override(
                    route.path_prefix(),
                    RateLimiter::new(limit.rate_per_minute, limit.burst),
                );
            }
        }
        registry
    }

    /// Limiter for `path` and the label it is reported under.
    pub fn limiter_for(&self, path: &str) -> (&str, &Arc<RateLimiter>) {
        self.overrides
            .iter()
            .find(|(matcher, _)| matcher.matches(path))
            .map(|(matcher, limiter)| match matcher.prefix() {
                "" => ("/", limiter),
                prefix => (prefix, limiter),
            })
            .unwrap_or(("default", &self.default))
    }

    /// Every limiter, default first.
    pub fn limiters(&self) -> impl Iterator<Item = &Arc<RateLimiter>> {
        std::iter::once(&self.default).chain(self.overrides.iter().map(|(_, limiter)| limiter))
    }

    /// Start one sweep task per limiter.
    pub fn spawn_sweepers(
        &self,
        interval: Duration,
        idle_timeout: Duration,
        shutdown: &broadcast::Sender<()>,
    ) -> Vec<JoinHandle<()>> {
        self.limiters()
            .map(|limiter| limiter.spawn_sweeper(interval, idle_timeout, shutdown.subscribe()))
            .collect()
    }
}

/// Middleware applying the endpoint limiter to each request.
pub async fn rate_limit_middleware(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(registry): State<Arc<EndpointRateLimiterRegistry>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let key = client_key(request.headers(), addr);
    let (endpoint, limiter) = registry.limiter_for(request.uri().path());

    if limiter.allow(&key) {
        next.run(request).await
    } else {
        tracing::warn!(client = %key, endpoint = %endpoint, "Rate limit exceeded");
        metrics::record_rate_limited(endpoint);
        rate_limited()
    }
}
