//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with gateway endpoints and the proxy fallback
//! - Wire up middleware (request ID, tracing, deadline, rate limit, API key,
//!   security headers, request metrics, panic recovery)
//! - Start health monitoring alongside the listener
//! - Serve until the shutdown signal fires
//!
//! # Layer order (outermost first)
//! ```text
//! set request id → trace → propagate request id → track_requests
//!     → enforce_deadline → catch panic → endpoints / proxy
//! ```
//! `track_requests` sits outside the deadline so requests cut off by it are
//! still counted and logged.

use std::any::Any;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{any, get},
    Router,
};
use sysinfo::System;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::health::HealthChecker;
use crate::http::handlers::{health_handler, info_handler, metrics_handler};
use crate::http::proxy::proxy_handler;
use crate::http::request::{propagate_request_id_layer, request_id, set_request_id_layer, RequestDeadline};
use crate::http::response::ServedBy;
use crate::lifecycle::ShutdownSignal;
use crate::net::{ForwardError, HttpTransport, Transport};
use crate::observability::logging::raise_alert;
use crate::observability::{MetricsCollector, UNMATCHED_PATH};
use crate::resilience::{Backoff, CircuitBreaker};
use crate::routing::Router as ProxyRouter;
use crate::security::{
    api_key_middleware, rate_limit_middleware, with_security_headers, ApiKeys, RateLimiter,
};

/// Paths answered by the gateway itself.
pub const GATEWAY_ENDPOINTS: [&str; 4] = ["/health", "/metrics", "/gateway/info", "/info"];

/// Errors building the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to build upstream transport: {0}")]
    Transport(#[from] ForwardError),

    #[error("failed to register metrics: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub router: Arc<ProxyRouter>,
    pub breaker: Arc<CircuitBreaker>,
    pub health: Arc<HealthChecker>,
    pub metrics: Arc<MetricsCollector>,
    pub transport: Arc<dyn Transport>,
    pub backoff: Backoff,
    pub api_keys: Arc<ApiKeys>,
    pub system: Arc<Mutex<System>>,
}

impl AppState {
    pub fn new(config: GatewayConfig, transport: Arc<dyn Transport>) -> Result<Self, ServerError> {
        let metrics = Arc::new(MetricsCollector::new(&config.monitoring)?);
        let breaker = Arc::new(CircuitBreaker::from_services(&config.services, metrics.clone()));
        let health = Arc::new(HealthChecker::new(
            &config.services,
            &config.health_check,
            transport.clone(),
            metrics.clone(),
        ));

        Ok(Self {
            router: Arc::new(ProxyRouter::from_config(&config.services)),
            breaker,
            health,
            metrics,
            transport,
            backoff: Backoff::from(&config.retries),
            api_keys: Arc::new(ApiKeys::new(&config.security.api_keys)),
            system: Arc::new(Mutex::new(System::new())),
            config: Arc::new(config),
        })
    }
}

/// HTTP server for the gateway.
pub struct GatewayServer {
    router: Router,
    state: AppState,
}

impl GatewayServer {
    /// Create a server forwarding over the pooled HTTP transport.
    pub fn new(config: GatewayConfig) -> Result<Self, ServerError> {
        let transport = Arc::new(HttpTransport::new(&config.timeouts)?);
        Self::with_transport(config, transport)
    }

    pub fn with_transport(config: GatewayConfig, transport: Arc<dyn Transport>) -> Result<Self, ServerError> {
        let state = AppState::new(config, transport)?;
        let router = build_router(state.clone());
        Ok(Self { router, state })
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(self, listener: TcpListener, shutdown: ShutdownSignal) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            services = self.state.config.services.len(),
            "HTTP server starting"
        );

        let monitors = if self.state.config.health_check.enabled {
            self.state.health.spawn(shutdown.clone())
        } else {
            Vec::new()
        };

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        let mut signal = shutdown;
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { signal.recv().await })
            .await?;

        for monitor in monitors {
            let _ = monitor.await;
        }
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Build the Axum router with all middleware layers.
pub fn build_router(state: AppState) -> Router {
    let config = state.config.clone();

    let mut proxy = Router::new()
        .route("/", any(proxy_handler))
        .route("/{*path}", any(proxy_handler))
        .with_state(state.clone());
    if state.api_keys.is_enabled() {
        proxy = proxy.route_layer(middleware::from_fn_with_state(
            state.api_keys.clone(),
            api_key_middleware,
        ));
    }
    if config.rate_limit.enabled {
        proxy = proxy.route_layer(middleware::from_fn_with_state(
            Arc::new(RateLimiter::new(&config.rate_limit)),
            rate_limit_middleware,
        ));
    }

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/gateway/info", get(info_handler))
        .route("/info", get(info_handler))
        .with_state(state.clone())
        .merge(proxy);
    let app = with_request_layers(app, state);

    if config.security.enable_headers {
        with_security_headers(app)
    } else {
        app
    }
}

/// Wrap `app` in the per-request stack shared by every route.
pub fn with_request_layers(app: Router, state: AppState) -> Router {
    app.layer(CatchPanicLayer::custom(panic_response))
        .layer(middleware::from_fn_with_state(state.clone(), enforce_deadline))
        .layer(middleware::from_fn_with_state(state, track_requests))
        .layer(propagate_request_id_layer())
        .layer(TraceLayer::new_for_http())
        .layer(set_request_id_layer())
}

/// Bound the whole request by `timeouts.request_secs`.
///
/// The deadline is handed to handlers as a [`RequestDeadline`] extension;
/// the proxy settles its circuit permit before this cutoff fires.
async fn enforce_deadline(State(state): State<AppState>, mut request: Request<Body>, next: Next) -> Response {
    let deadline = RequestDeadline::after(Duration::from_secs(state.config.timeouts.request_secs));
    let request_id = request_id(request.headers());
    let path = request.uri().path().to_string();
    request.extensions_mut().insert(deadline);

    match tokio::time::timeout_at(deadline.0, next.run(request)).await {
        Ok(response) => response,
        Err(_) => {
            tracing::warn!(request_id = %request_id, path = %path, "Request deadline exceeded");
            GatewayError::DeadlineExceeded
                .with_request_id(request_id)
                .into_response()
        }
    }
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("non-string panic payload");
    tracing::error!(panic = %detail, "Handler panicked");
    GatewayError::Internal.into_response()
}

/// Label for the path of a finished request.
///
/// Only gateway endpoints and paths under a configured prefix keep their
/// (normalized) path; everything else shares one series.
fn metric_path<'a>(router: &ProxyRouter, path: &'a str) -> &'a str {
    if GATEWAY_ENDPOINTS.contains(&path) || router.match_path(path).is_some() {
        path
    } else {
        UNMATCHED_PATH
    }
}

/// Record every request in the metrics collector and the request log.
async fn track_requests(State(state): State<AppState>, request: Request<Body>, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = request_id(request.headers());

    let response = next.run(request).await;

    let elapsed = started.elapsed();
    let status = response.status().as_u16();
    let duration_ms = elapsed.as_millis() as u64;
    let service = response
        .extensions()
        .get::<ServedBy>()
        .map_or("gateway", |s| s.0.as_str());

    if state.config.monitoring.enabled {
        let label = metric_path(&state.router, &path);
        state.metrics.record(method.as_str(), label, status, elapsed);
    }

    if status >= 500 {
        tracing::error!(request_id = %request_id, method = %method, path = %path, service, status, duration_ms, "Request failed");
        raise_alert(service, &path, status, duration_ms);
    } else if status >= 400 {
        tracing::warn!(request_id = %request_id, method = %method, path = %path, service, status, duration_ms, "Request rejected");
    } else {
        tracing::info!(request_id = %request_id, method = %method, path = %path, service, status, duration_ms, "Request completed");
    }

    response
}
