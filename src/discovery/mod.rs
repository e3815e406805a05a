//! Service discovery subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatcher needs an address for service S
//!     → locator.rs (ServiceLocator::resolve_healthy)
//!     → round-robin over S's instances, skipping Unhealthy ones
//!     → backend.rs (per-instance health state, fed by health::active)
//!     → Return "host:port" or DiscoveryError
//! ```
//!
//! # Design Decisions
//! - The dispatcher only sees the `ServiceLocator` trait
//! - Health state is per-instance, not per-service

pub mod backend;
pub mod locator;

pub use backend::{Backend, HealthState};
pub use locator::{DiscoveryError, ServiceLocator, StaticServiceLocator};
