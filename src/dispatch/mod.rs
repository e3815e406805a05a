//! Request dispatch subsystem.
//!
//! # Data Flow
//! ```text
//! DispatchRequest for service S
//!     → ResponseCache::get (GET only) ── hit ──→ DispatchResponse (HIT)
//!     → CircuitBreaker[S].execute
//!         → retry_if (deadline-bounded)
//!             → ServiceLocator::resolve_healthy(S)
//!             → HTTP attempt (attempt timeout)
//!             → classify status
//!     → ResponseCache::set (2xx GET, best-effort)
//!     → DispatchResponse (MISS) or DispatchError
//! ```

pub mod dispatcher;
pub mod error;

pub use dispatcher::{DispatchRequest, DispatchResponse, Dispatcher, X_CACHE};
pub use error::DispatchError;
