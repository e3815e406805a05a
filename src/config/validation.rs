//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (routes reference existing services)
//! - Validate value ranges (rates > 0, thresholds within bounds)
//! - Detect conflicting routes
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;

use thiserror::Error;

use crate::config::schema::GatewayConfig;
use crate::resilience::MAX_WAIT;
use crate::routing::PathPrefixMatcher;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("path prefix `{0}` must start with '/'")]
    InvalidPrefix(String),

    #[error("route `{prefix}` references unknown service `{service}`")]
    UnknownService { prefix: String, service: String },

    #[error("duplicate route prefix `{0}`")]
    DuplicateRoute(String),

    #[error("duplicate service `{0}`")]
    DuplicateService(String),

    #[error("service `{0}` has no addresses")]
    EmptyService(String),

    #[error("{field} must be greater than zero")]
    Zero { field: String },

    #[error("{field} is out of range: {reason}")]
    OutOfRange { field: String, reason: &'static str },
}

fn positive(errors: &mut Vec<ValidationError>, field: &str, value: u64) {
    if value == 0 {
        errors.push(ValidationError::Zero {
            field: field.to_string(),
        });
    }
}

fn at_most_max_wait(errors: &mut Vec<ValidationError>, field: &str, secs: u64) {
    if secs > MAX_WAIT.as_secs() {
        errors.push(ValidationError::OutOfRange {
            field: field.to_string(),
            reason: "must not exceed one year",
        });
    }
}

/// Check a parsed configuration for semantic errors.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let mut services = HashSet::new();
    for service in &config.services {
        if !services.insert(service.name.as_str()) {
            errors.push(ValidationError::DuplicateService(service.name.clone()));
        }
        if service.addresses.is_empty() {
            errors.push(ValidationError::EmptyService(service.name.clone()));
        }
    }

    let mut prefixes = HashSet::new();
    for route in &config.routes {
        if !route.path_prefix.starts_with('/') {
            errors.push(ValidationError::InvalidPrefix(route.path_prefix.clone()));
        }
        // `/svc`, `/svc/` and `/svc/*` are the same route.
        let normalized = PathPrefixMatcher::new(route.path_prefix.as_str());
        if !prefixes.insert(normalized.prefix().to_string()) {
            errors.push(ValidationError::DuplicateRoute(route.path_prefix.clone()));
        }
        // Only checked against a static service list.
        if !config.services.is_empty() && !services.contains(route.service.as_str()) {
            errors.push(ValidationError::UnknownService {
                prefix: route.path_prefix.clone(),
                service: route.service.clone(),
            });
        }
        if let Some(limit) = route.rate_limit {
            let field = format!("routes[{}].rate_limit", route.path_prefix);
            positive(&mut errors, &format!("{field}.rate_per_minute"), limit.rate_per_minute.into());
            positive(&mut errors, &format!("{field}.burst"), limit.burst.into());
        }
    }

    let rl = &config.rate_limit;
    positive(&mut errors, "rate_limit.rate_per_minute", rl.rate_per_minute.into());
    positive(&mut errors, "rate_limit.burst", rl.burst.into());
    positive(&mut errors, "rate_limit.sweep_interval_secs", rl.sweep_interval_secs);
    for o in &rl.overrides {
        if !o.path_prefix.starts_with('/') {
            errors.push(ValidationError::InvalidPrefix(o.path_prefix.clone()));
        }
        positive(&mut errors, "rate_limit.overrides.rate_per_minute", o.rate_per_minute.into());
        positive(&mut errors, "rate_limit.overrides.burst", o.burst.into());
    }

    let cb = &config.circuit_breaker;
    positive(&mut errors, "circuit_breaker.max_half_open_probes", cb.max_half_open_probes.into());
    positive(&mut errors, "circuit_breaker.open_timeout_secs", cb.open_timeout_secs);
    if !(cb.failure_rate_threshold > 0.0 && cb.failure_rate_threshold <= 1.0) {
        errors.push(ValidationError::OutOfRange {
            field: "circuit_breaker.failure_rate_threshold".to_string(),
            reason: "must be in (0, 1]",
        });
    }

    let retries = &config.retries;
    positive(&mut errors, "retries.max_attempts", retries.max_attempts.into());
    if retries.multiplier < 1.0 {
        errors.push(ValidationError::OutOfRange {
            field: "retries.multiplier".to_string(),
            reason: "must be at least 1.0",
        });
    }
    if retries.max_delay_ms < retries.initial_delay_ms {
        errors.push(ValidationError::OutOfRange {
            field: "retries.max_delay_ms".to_string(),
            reason: "must not be below initial_delay_ms",
        });
    }

    positive(&mut errors, "timeouts.request_secs", config.timeouts.request_secs);
    positive(&mut errors, "timeouts.attempt_secs", config.timeouts.attempt_secs);
    positive(&mut errors, "limits.max_body_bytes", config.limits.max_body_bytes as u64);

    for (field, secs) in [
        ("timeouts.connect_secs", config.timeouts.connect_secs),
        ("timeouts.attempt_secs", config.timeouts.attempt_secs),
        ("timeouts.request_secs", config.timeouts.request_secs),
        ("circuit_breaker.closed_window_secs", cb.closed_window_secs),
        ("circuit_breaker.open_timeout_secs", cb.open_timeout_secs),
        ("cache.ttl_secs", config.cache.ttl_secs),
        ("rate_limit.idle_timeout_secs", rl.idle_timeout_secs),
        ("rate_limit.sweep_interval_secs", rl.sweep_interval_secs),
        ("health_check.interval_secs", config.health_check.interval_secs),
        ("health_check.timeout_secs", config.health_check.timeout_secs),
    ] {
        at_most_max_wait(&mut errors, field, secs);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
