//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to backend service:
//!     → circuit_breaker.rs (admit or fail fast; one outcome per request)
//!         → retries.rs (attempt, classify, back off, respect deadline)
//!             → backoff.rs (exponential delay with ±5% jitter)
//! ```
//!
//! # Design Decisions
//! - Every wait and attempt is bounded by the caller's deadline
//! - The breaker wraps the whole retry loop, not each attempt
//! - Breakers are owned by a registry instance, never process-wide

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;

pub use circuit_breaker::{
    BreakerRejection, BreakerSettings, BreakerSnapshot, CircuitBreaker, CircuitBreakerRegistry,
    CircuitState, Counts, StateObserver,
};
pub use retries::{deadline_after, retry, retry_if, RetryError, RetryPolicy, MAX_WAIT};
