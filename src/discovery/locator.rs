//! Service locator.
//!
//! # Responsibilities
//! - Resolve a logical service name to a healthy `host:port`
//! - List every instance of a service
//!
//! # Design Decisions
//! - Round-robin over instances that are not Unhealthy
//! - Instances never probed count as healthy
//! - The instance set is fixed at construction; only health changes

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::ServiceConfig;
use crate::discovery::backend::Backend;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("unknown service '{0}'")]
    UnknownService(String),

    #[error("no healthy instance for service '{0}'")]
    NoHealthyInstance(String),
}

/// Maps logical service names to live network addresses.
#[async_trait]
pub trait ServiceLocator: Send + Sync {
    /// One healthy address for `service`.
    async fn resolve_healthy(&self, service: &str) -> Result<String, DiscoveryError>;

    /// Every known address for `service`, healthy or not.
    async fn resolve_all(&self, service: &str) -> Result<Vec<String>, DiscoveryError>;
}

#[derive(Debug, Default)]
struct ServicePool {
    instances: Vec<Arc<Backend>>,
    counter: AtomicUsize,
}

impl ServicePool {
    fn next_healthy(&self) -> Option<&Arc<Backend>> {
        let len = self.instances.len();
        if len == 0 {
            return None;
        }

        let start = self.counter.fetch_add(1, Ordering::Relaxed);
        (0..len)
            .map(|i| &self.instances[(start + i) % len])
            .find(|backend| backend.is_healthy())
    }
}

/// Locator over a fixed, configured set of instances.
#[derive(Debug, Default)]
pub struct StaticServiceLocator {
    services: HashMap<String, ServicePool>,
}

impl StaticServiceLocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(services: &[ServiceConfig]) -> Self {
        services.iter().fold(Self::new(), |locator, service| {
            locator.with_service(&service.name, service.addresses.iter().cloned())
        })
    }

    /// Register `service` with the given instance addresses.
    pub fn with_service<I, S>(mut self, service: &str, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let pool = self.services.entry(service.to_string()).or_default();
        pool.instances
            .extend(addresses.into_iter().map(|a| Arc::new(Backend::new(a))));
        self
    }

    /// All instances across services, for health checking.
    pub fn all_backends(&self) -> Vec<Arc<Backend>> {
        self.services
            .values()
            .flat_map(|pool| pool.instances.iter())
            .cloned()
            .collect()
    }

    fn pool(&self, service: &str) -> Result<&ServicePool, DiscoveryError> {
        self.services
            .get(service)
            .ok_or_else(|| DiscoveryError::UnknownService(service.to_string()))
    }
}

#[async_trait]
impl ServiceLocator for StaticServiceLocator {
    async fn resolve_healthy(&self, service: &str) -> Result<String, DiscoveryError> {
        let pool = self.pool(service)?;
        match pool.next_healthy() {
            Some(backend) => Ok(backend.address.clone()),
            None => {
                tracing::debug!(service = %service, instances = pool.instances.len(), "No healthy instance");
                Err(DiscoveryError::NoHealthyInstance(service.to_string()))
            }
        }
    }

    async fn resolve_all(&self, service: &str) -> Result<Vec<String>, DiscoveryError> {
        Ok(self
            .pool(service)?
            .instances
            .iter()
            .map(|backend| backend.address.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locator() -> StaticServiceLocator {
        StaticServiceLocator::new().with_service("orders", ["127.0.0.1:8080", "127.0.0.1:8081"])
    }

    #[tokio::test]
    async fn test_round_robin() {
        let locator = locator();
        assert_eq!(locator.resolve_healthy("orders").await.unwrap(), "127.0.0.1:8080");
        assert_eq!(locator.resolve_healthy("orders").await.unwrap(), "127.0.0.1:8081");
        assert_eq!(locator.resolve_healthy("orders").await.unwrap(), "127.0.0.1:8080");
    }

    #[tokio::test]
    async fn test_skips_unhealthy() {
        let locator = locator();
        for backend in locator.all_backends() {
            if backend.address.ends_with("8080") {
                backend.mark_failure(1);
            }
        }

        for _ in 0..3 {
            assert_eq!(locator.resolve_healthy("orders").await.unwrap(), "127.0.0.1:8081");
        }
        assert_eq!(locator.resolve_all("orders").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_errors() {
        let locator = locator();
        assert_eq!(
            locator.resolve_healthy("billing").await,
            Err(DiscoveryError::UnknownService("billing".into()))
        );

        for backend in locator.all_backends() {
            backend.mark_failure(1);
        }
        assert_eq!(
            locator.resolve_healthy("orders").await,
            Err(DiscoveryError::NoHealthyInstance("orders".into()))
        );
    }
}
