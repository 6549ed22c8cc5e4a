//! Outbound HTTP transport.
//!
//! # Responsibilities
//! - Send a fully buffered request and wait for the response head within a deadline
//! - Stream the downstream response body back without buffering it
//! - Classify failures into typed [`ForwardError`] variants
//!
//! # Design Decisions
//! - `Transport` is a trait so routing and health checks can run against
//!   an in-memory mock
//! - Classification uses `reqwest::Error` predicates, never message text

use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    http::{HeaderMap, Method, Response},
};
use futures_util::future::BoxFuture;
use thiserror::Error;
use url::Url;

use crate::config::TimeoutConfig;

/// A request ready to leave the gateway.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl UpstreamRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }
}

/// Why a request produced no downstream response.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ForwardError {
    #[error("upstream request timed out")]
    Timeout,
    #[error("connection to upstream failed: {0}")]
    Connect(String),
    #[error("upstream protocol error: {0}")]
    Http(String),
}

impl ForwardError {
    /// Failures where the request most likely never reached the service.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ForwardError::Timeout | ForwardError::Connect(_))
    }
}

impl From<reqwest::Error> for ForwardError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ForwardError::Timeout
        } else if e.is_connect() {
            ForwardError::Connect(e.to_string())
        } else {
            ForwardError::Http(e.to_string())
        }
    }
}

/// Sends requests to downstream services.
pub trait Transport: Send + Sync + 'static {
    fn send(
        &self,
        request: UpstreamRequest,
        timeout: Duration,
    ) -> BoxFuture<'_, Result<Response<Body>, ForwardError>>;
}

/// Pooled HTTP(S) transport backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeouts: &TimeoutConfig) -> Result<Self, ForwardError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(timeouts.connect_secs))
            .pool_idle_timeout(Duration::from_secs(timeouts.idle_secs))
            .read_timeout(Duration::from_secs(timeouts.idle_secs))
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn send(
        &self,
        request: UpstreamRequest,
        timeout: Duration,
    ) -> BoxFuture<'_, Result<Response<Body>, ForwardError>> {
        Box::pin(async move {
            // Only the wait for response headers is bounded here; a streamed
            // body may outlast `timeout` as long as it keeps producing data.
            let pending = self
                .client
                .request(request.method, request.url)
                .headers(request.headers)
                .body(request.body)
                .send();
            let upstream = tokio::time::timeout(timeout, pending)
                .await
                .map_err(|_| ForwardError::Timeout)??;

            let status = upstream.status();
            let headers = upstream.headers().clone();
            let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
            *response.status_mut() = status;
            *response.headers_mut() = headers;
            Ok(response)
        })
    }
}
