//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → Probe each service instance
//!     → Update discovery::Backend health state
//!     → Locator skips Unhealthy instances
//! ```
//!
//! # Design Decisions
//! - State transitions require consecutive successes/failures
//! - Health state is per-instance, not per-service
//! - The monitor stops on the shutdown broadcast

pub mod active;

pub use active::HealthMonitor;
