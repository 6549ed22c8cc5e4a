//! Request forwarding.
//!
//! # Data Flow
//! ```text
//! request
//!     → routing (longest prefix match, prefix stripped)
//!     → target validity (503 SERVICE_MISCONFIGURED, no network call)
//!     → circuit breaker admission (503 SERVICE_UNAVAILABLE + Retry-After)
//!     → transport, retried for GET on connect/timeout failures, all
//!       attempts bounded by the request deadline
//!     → outcome recorded on the circuit
//!     → downstream response streamed back
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ws::WebSocketUpgrade, ConnectInfo, FromRequestParts, State},
    http::{Method, Request},
    response::{IntoResponse, Response},
};
use tokio::time::Instant;

use crate::error::GatewayError;
use crate::http::request::{forward_headers, request_id, RequestDeadline};
use crate::http::response::{sanitize, tag};
use crate::http::server::AppState;
use crate::http::websocket;
use crate::net::{ForwardError, UpstreamRequest};
use crate::resilience::{CallPermit, RetryPolicy};

pub async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let request_id = request_id(request.headers());
    let path = request.uri().path().to_string();
    let query = request.uri().query().map(str::to_string);
    let deadline = request
        .extensions()
        .get::<RequestDeadline>()
        .copied()
        .unwrap_or_else(|| RequestDeadline::after(Duration::from_secs(state.config.timeouts.request_secs)));

    let Some(route) = state.router.match_path(&path) else {
        tracing::debug!(request_id = %request_id, path = %path, "No route matched");
        return GatewayError::NotFound(format!("No service is mapped to {path}"))
            .with_request_id(request_id)
            .into_response();
    };
    let service = route.service.as_str();

    let Some(url) = route.upstream_url(&path, query.as_deref()) else {
        tracing::error!(
            request_id = %request_id,
            service = %service,
            target = %route.target.raw(),
            "Service target is not a valid URL"
        );
        let response = GatewayError::Misconfigured { service: service.to_string() }
            .with_request_id(request_id)
            .into_response();
        return tag(response, service);
    };

    let permit = match state.breaker.acquire(service) {
        Ok(permit) => permit,
        Err(retry_after) => {
            tracing::warn!(
                request_id = %request_id,
                service = %service,
                retry_after_ms = retry_after.as_millis() as u64,
                "Circuit open, rejecting request"
            );
            let response = GatewayError::CircuitOpen {
                service: service.to_string(),
                retry_after,
            }
            .with_request_id(request_id)
            .into_response();
            return tag(response, service);
        }
    };

    if websocket::is_upgrade_request(request.headers()) {
        let response = tunnel(&state, service, &url, route.timeout, permit, &request_id, request).await;
        return tag(response, service);
    }

    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let method = request.method().clone();
    let (parts, body) = request.into_parts();

    let body = match axum::body::to_bytes(body, state.config.security.max_body_size).await {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(request_id = %request_id, service = %service, error = %e, "Rejected request body");
            let response = GatewayError::Validation(format!(
                "Request body exceeds {} bytes or could not be read",
                state.config.security.max_body_size
            ))
            .with_request_id(request_id)
            .into_response();
            return tag(response, service);
        }
    };

    let upstream = UpstreamRequest {
        method: method.clone(),
        url,
        headers: forward_headers(&parts.headers, &request_id, client),
        body,
    };

    let started = Instant::now();
    let attempts = send_with_retries(&state, &method, upstream, route.timeout, route.retry_count, &request_id);
    // Must fire before the deadline middleware drops this future with the permit unsettled.
    let outcome = match tokio::time::timeout_at(deadline.0, attempts).await {
        Ok(outcome) => outcome,
        Err(_) => Err(ForwardError::Timeout),
    };
    let elapsed = started.elapsed();

    let response = match outcome {
        Ok(response) => {
            permit.record(response.status().is_server_error(), elapsed);
            sanitize(response)
        }
        Err(e) => {
            permit.record(true, elapsed);
            tracing::error!(
                request_id = %request_id,
                service = %service,
                error = %e,
                duration_ms = elapsed.as_millis() as u64,
                "Upstream request failed"
            );
            let error = match e {
                ForwardError::Timeout => GatewayError::Timeout { service: service.to_string() },
                _ => GatewayError::BadGateway { service: service.to_string() },
            };
            error.with_request_id(request_id).into_response()
        }
    };
    tag(response, service)
}

async fn send_with_retries(
    state: &AppState,
    method: &Method,
    request: UpstreamRequest,
    timeout: Duration,
    retry_count: u32,
    request_id: &str,
) -> Result<Response, ForwardError> {
    let policy = RetryPolicy::new(retry_count);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let result = match tokio::time::timeout(timeout, state.transport.send(request.clone(), timeout)).await {
            Ok(result) => result,
            Err(_) => Err(ForwardError::Timeout),
        };

        match result {
            Err(e) if policy.should_retry(method, &e, attempt) => {
                let delay = state.backoff.delay(attempt);
                tracing::info!(
                    request_id = %request_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying request"
                );
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}

async fn tunnel(
    state: &AppState,
    service: &str,
    url: &url::Url,
    timeout: Duration,
    permit: CallPermit<'_>,
    request_id: &str,
    request: Request<Body>,
) -> Response {
    let (mut parts, _body) = request.into_parts();
    let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, state).await {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };

    let started = Instant::now();
    match websocket::connect_upstream(url, &parts.headers, timeout).await {
        Ok(socket) => {
            permit.record(false, started.elapsed());
            tracing::info!(request_id = %request_id, service = %service, "WebSocket tunnel established");
            let service = service.to_string();
            upgrade.on_upgrade(move |client| websocket::pump(client, socket, service))
        }
        Err(e) => {
            permit.record(true, started.elapsed());
            tracing::error!(request_id = %request_id, service = %service, error = %e, "WebSocket handshake failed");
            GatewayError::BadGateway { service: service.to_string() }
                .with_request_id(request_id)
                .into_response()
        }
    }
}
