//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Body size limits.
    pub limits: LimitsConfig,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Circuit breaker settings, applied to every backend service.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Response cache configuration.
    pub cache: CacheConfig,

    /// Backend services known to the static service locator.
    pub services: Vec<ServiceConfig>,

    /// Route definitions mapping path prefixes to services.
    pub routes: Vec<RouteConfig>,

    /// Health check settings.
    pub health_check: HealthCheckConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Upper bound for a single network attempt in seconds.
    pub attempt_secs: u64,

    /// Overall dispatch deadline (all attempts and waits) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            attempt_secs: 10,
            request_secs: 30,
        }
    }
}

/// Body size limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum buffered request or response body in bytes.
    pub max_body_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Sustained requests per minute per client.
    pub rate_per_minute: u32,

    /// Burst capacity (bucket size).
    pub burst: u32,

    /// Visitors idle longer than this are forgotten.
    pub idle_timeout_secs: u64,

    /// How often the idle-visitor sweep runs.
    pub sweep_interval_secs: u64,

    /// Per-endpoint overrides, matched by path prefix.
    pub overrides: Vec<EndpointRateLimitConfig>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rate_per_minute: 100,
            burst: 20,
            idle_timeout_secs: 300,
            sweep_interval_secs: 60,
            overrides: Vec::new(),
        }
    }
}

/// A rate limit override bound to a path prefix.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointRateLimitConfig {
    /// Path prefix the override applies to.
    pub path_prefix: String,

    pub rate_per_minute: u32,

    pub burst: u32,
}

/// Route-level rate limit override.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct RouteRateLimit {
    pub rate_per_minute: u32,
    pub burst: u32,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Probes admitted while half-open; the same number of consecutive
    /// successes closes the circuit.
    pub max_half_open_probes: u32,

    /// Length of the closed-state counting window in seconds (0 = never reset).
    pub closed_window_secs: u64,

    /// How long the circuit stays open before probing, in seconds.
    pub open_timeout_secs: u64,

    /// Minimum requests in the window before the failure rate is evaluated.
    pub min_request_threshold: u32,

    /// Failure ratio (0.0-1.0] that trips the circuit.
    pub failure_rate_threshold: f64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_half_open_probes: 3,
            closed_window_secs: 60,
            open_timeout_secs: 30,
            min_request_threshold: 5,
            failure_rate_threshold: 0.5,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,

    /// Delay before the second attempt in milliseconds.
    pub initial_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Growth factor applied to the delay after each attempt.
    pub multiplier: f64,

    /// Add ±5% jitter to each computed delay.
    pub jitter: bool,

    /// Backend statuses treated as transient.
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 2000,
            multiplier: 2.0,
            jitter: true,
            retryable_statuses: vec![408, 429, 500, 502, 503, 504],
        }
    }
}

/// Response cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache successful GET responses.
    pub enabled: bool,

    /// Time-to-live for cached responses in seconds.
    pub ttl_secs: u64,

    /// Upper bound on cached entries for the in-memory cache.
    pub max_entries: usize,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 300,
            max_entries: 10_000,
        }
    }
}

/// A logical backend service and its instances.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// Logical service name referenced by routes.
    pub name: String,

    /// Instance addresses (e.g., "127.0.0.1:3000").
    pub addresses: Vec<String>,
}

/// Route configuration mapping a path prefix to a service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Path prefix to match.
    pub path_prefix: String,

    /// Service name to dispatch to.
    pub service: String,

    /// Remove the prefix before forwarding.
    #[serde(default)]
    pub strip_prefix: bool,

    /// Optional rate limit override for this prefix.
    #[serde(default)]
    pub rate_limit: Option<RouteRateLimit>,
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Health check interval in seconds.
    pub interval_secs: u64,

    /// Health check timeout in seconds.
    pub timeout_secs: u64,

    /// Path to probe for HTTP health checks.
    pub path: String,

    /// Number of consecutive failures before marking unhealthy.
    pub unhealthy_threshold: u32,

    /// Number of consecutive successes before marking healthy.
    pub healthy_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 10,
            timeout_secs: 5,
            path: "/health".to_string(),
            unhealthy_threshold: 3,
            healthy_threshold: 2,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log line format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
