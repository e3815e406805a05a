//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → rate_limit.rs (per-client token bucket, endpoint overrides)
//!     → Pass to routing
//!
//! Outgoing request to backend:
//!     → headers.rs (strip hop-by-hop, add X-Forwarded-*)
//! ```
//!
//! # Design Decisions
//! - Fail closed: a denied request never reaches the dispatcher
//! - Client identity comes from the first X-Forwarded-For hop or the peer IP

pub mod headers;
pub mod rate_limit;

pub use headers::{client_key, outbound_headers, strip_hop_by_hop, ForwardedFor};
pub use rate_limit::{rate_limit_middleware, EndpointRateLimiterRegistry, RateLimiter};
