//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware stack)
//!     → request.rs (assign/propagate x-request-id)
//!     → security::rate_limit (admission)
//!     → routing (path prefix → service)
//!     → dispatch (breaker, retries, discovery, cache)
//!     → response.rs (JSON errors) or the relayed backend response
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{UuidRequestId, X_REQUEST_ID};
pub use server::{AppState, GatewayServer};
