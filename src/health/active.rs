//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every service instance
//! - Update instance health state based on results

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::sync::broadcast;
use tokio::time;

use crate::config::HealthCheckConfig;
use crate::discovery::{Backend, StaticServiceLocator};
use crate::observability::metrics;

pub struct HealthMonitor {
    locator: Arc<StaticServiceLocator>,
    config: HealthCheckConfig,
    client: Client<HttpConnector, Body>,
}

impl HealthMonitor {
    pub fn new(locator: Arc<StaticServiceLocator>, config: HealthCheckConfig) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        Self {
            locator,
            config,
            client,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval = self.config.interval_secs,
            path = %self.config.path,
            "Health monitor starting"
        );

        let mut ticker = time::interval(Duration::from_secs(self.config.interval_secs.max(1)));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe every instance once.
    pub async fn check_all(&self) {
        for backend in self.locator.all_backends() {
            let healthy = self.probe(&backend).await;

            let changed = if healthy {
                backend.mark_success(self.config.healthy_threshold as usize)
            } else {
                backend.mark_failure(self.config.unhealthy_threshold as usize)
            };
            if changed {
                tracing::info!(address = %backend.address, state = ?backend.state(), "Backend health changed");
            }

            metrics::record_backend_health(&backend.address, backend.is_healthy());
        }
    }

    async fn probe(&self, backend: &Backend) -> bool {
        let uri = format!("http://{}{}", backend.address, self.config.path);
        let request = match Request::get(uri)
            .header(header::USER_AGENT, "resilient-gateway-health-check")
            .body(Body::empty())
        {
            Ok(request) => request,
            Err(e) => {
                tracing::error!(address = %backend.address, error = %e, "Failed to build health check request");
                return false;
            }
        };

        let timeout = Duration::from_secs(self.config.timeout_secs);
        match time::timeout(timeout, self.client.request(request)).await {
            Ok(Ok(response)) => {
                let success = response.status().is_success();
                if !success {
                    tracing::warn!(address = %backend.address, status = %response.status(), "Health check failed: non-success status");
                }
                success
            }
            Ok(Err(e)) => {
                tracing::warn!(address = %backend.address, error = %e, "Health check failed: connection error");
                false
            }
            Err(_) => {
                tracing::warn!(address = %backend.address, "Health check failed: timeout");
                false
            }
        }
    }
}
