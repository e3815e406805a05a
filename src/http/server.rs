//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the gateway and status handlers
//! - Wire up middleware (tracing, request ID, rate limiting)
//! - Start background tasks (visitor sweeps, health checks)
//! - Serve until the shutdown signal, then drain

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware,
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::time::{timeout_at, Instant};
use tower_http::trace::TraceLayer;

use crate::cache::InMemoryResponseCache;
use crate::config::GatewayConfig;
use crate::discovery::StaticServiceLocator;
use crate::dispatch::{DispatchError, DispatchRequest, Dispatcher};
use crate::health::HealthMonitor;
use crate::http::request::{propagate_request_id_layer, request_id, set_request_id_layer};
use crate::http::response::no_route;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::resilience::{deadline_after, BreakerSnapshot};
use crate::routing::RouteTable;
use crate::security::{rate_limit_middleware, EndpointRateLimiterRegistry, ForwardedFor};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub routes: Arc<RouteTable>,
    pub dispatcher: Arc<Dispatcher>,
    pub request_timeout: Duration,
    pub max_body_bytes: usize,
}

/// HTTP front end of the gateway.
pub struct GatewayServer {
    config: GatewayConfig,
    state: AppState,
    locator: Arc<StaticServiceLocator>,
    rate_limits: Arc<EndpointRateLimiterRegistry>,
}

impl GatewayServer {
    /// Build every subsystem from configuration.
    pub fn new(config: GatewayConfig) -> Self {
        let locator = Arc::new(StaticServiceLocator::from_config(&config.services));

        let mut dispatcher = Dispatcher::new(locator.clone(), &config);
        if config.cache.enabled {
            dispatcher =
                dispatcher.with_cache(Arc::new(InMemoryResponseCache::new(config.cache.max_entries)));
        }

        let routes = Arc::new(RouteTable::from_config(&config.routes));
        let rate_limits = Arc::new(EndpointRateLimiterRegistry::from_routes(
            &config.rate_limit,
            &routes,
        ));

        let state = AppState {
            routes,
            dispatcher: Arc::new(dispatcher),
            request_timeout: Duration::from_secs(config.timeouts.request_secs),
            max_body_bytes: config.limits.max_body_bytes,
        };

        Self {
            config,
            state,
            locator,
            rate_limits,
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.state.dispatcher
    }

    /// Build the Axum router with all middleware layers.
    pub fn router(&self) -> Router {
        let mut router = Router::new()
            .route("/_gateway/status", get(status_handler))
            .route("/", any(gateway_handler))
            .route("/{*path}", any(gateway_handler))
            .with_state(self.state.clone());

        if self.config.rate_limit.enabled {
            router = router.layer(middleware::from_fn_with_state(
                self.rate_limits.clone(),
                rate_limit_middleware,
            ));
        }

        router
            .layer(TraceLayer::new_for_http())
            .layer(propagate_request_id_layer())
            .layer(set_request_id_layer())
    }

    /// Run the server until `shutdown` is triggered.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            routes = self.state.routes.routes().len(),
            "HTTP server starting"
        );

        let mut tasks = Vec::new();
        if self.config.rate_limit.enabled {
            tasks.extend(self.rate_limits.spawn_sweepers(
                Duration::from_secs(self.config.rate_limit.sweep_interval_secs.max(1)),
                Duration::from_secs(self.config.rate_limit.idle_timeout_secs),
                shutdown.sender(),
            ));
        }
        if self.config.health_check.enabled {
            let monitor = HealthMonitor::new(self.locator.clone(), self.config.health_check.clone());
            tasks.push(tokio::spawn(monitor.run(shutdown.subscribe())));
        }

        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.signaled())
            .await?;

        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Background task failed");
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Resolve the route and hand the request to the dispatcher.
async fn gateway_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let start = std::time::Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = request_id(&request).to_string();

    let Some(route) = state.routes.resolve(&path) else {
        tracing::warn!(request_id = %request_id, path = %path, "No route matched");
        metrics::record_request(method.as_str(), 404, "none", start);
        return no_route();
    };
    let service = route.service.as_str();

    let upstream_path = route.upstream_path(&path);
    let path_and_query = match request.uri().query() {
        Some(query) => format!("{upstream_path}?{query}"),
        None => upstream_path.into_owned(),
    };

    tracing::debug!(
        request_id = %request_id,
        method = %method,
        path = %path,
        route = %route.path_prefix(),
        service = %service,
        "Dispatching request"
    );

    let deadline = deadline_after(Instant::now(), state.request_timeout);
    let (parts, body) = request.into_parts();
    let result = match timeout_at(deadline, axum::body::to_bytes(body, state.max_body_bytes)).await {
        Ok(Ok(body)) => {
            let dispatch_request = DispatchRequest {
                method: parts.method,
                path_and_query,
                headers: parts.headers,
                body,
                origin: ForwardedFor {
                    client_ip: Some(peer.ip()),
                    proto: "http".to_string(),
                },
            };
            state.dispatcher.dispatch(service, dispatch_request, deadline).await
        }
        Ok(Err(e)) => Err(DispatchError::InvalidRequest(e.to_string())),
        Err(_) => Err(DispatchError::RequestBodyTimeout),
    };

    let response = match result {
        Ok(response) => response.into_response(),
        Err(e) => {
            tracing::warn!(request_id = %request_id, service = %service, error = %e, "Request failed");
            e.into_response()
        }
    };

    metrics::record_request(method.as_str(), response.status().as_u16(), service, start);
    response
}

#[derive(Debug, Serialize)]
struct GatewayStatus {
    breakers: Vec<BreakerSnapshot>,
}

async fn status_handler(State(state): State<AppState>) -> Json<GatewayStatus> {
    Json(GatewayStatus {
        breakers: state.dispatcher.breakers().snapshots(),
    })
}
