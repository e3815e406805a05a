//! Resilient API gateway core.
//!
//! Routes inbound HTTP requests by path prefix to logical backend services
//! and protects those services with per-client rate limiting, per-service
//! circuit breakers, deadline-bounded retries and a short-lived response
//! cache.

// Core subsystems
pub mod config;
pub mod dispatch;
pub mod http;
pub mod routing;

// Backends
pub mod cache;
pub mod discovery;
pub mod health;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;

pub use config::GatewayConfig;
pub use dispatch::{DispatchError, DispatchRequest, DispatchResponse, Dispatcher};
pub use http::GatewayServer;
pub use lifecycle::Shutdown;
