//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → handed to subsystems at construction
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; the route table is fixed at startup
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    CacheConfig, CircuitBreakerConfig, EndpointRateLimitConfig, GatewayConfig,
    HealthCheckConfig, LimitsConfig, ListenerConfig, LogFormat, ObservabilityConfig, RateLimitConfig,
    RetryConfig, RouteConfig, RouteRateLimit, ServiceConfig, TimeoutConfig,
};
