//! API key check for proxied routes.
//!
//! Disabled when no keys are configured. A missing `x-api-key` header is an
//! authentication failure (401); an unknown key is an authorization failure
//! (403).

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::GatewayError;
use crate::http::request::request_id;

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Clone)]
pub struct ApiKeys {
    keys: HashSet<String>,
}

impl ApiKeys {
    pub fn new(keys: &[String]) -> Self {
        Self {
            keys: keys.iter().filter(|k| !k.is_empty()).cloned().collect(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.keys.is_empty()
    }

    pub fn verify(&self, presented: Option<&str>) -> Result<(), GatewayError> {
        match presented {
            _ if !self.is_enabled() => Ok(()),
            None => Err(GatewayError::Authentication),
            Some(key) if self.keys.contains(key) => Ok(()),
            Some(_) => Err(GatewayError::Authorization),
        }
    }
}

pub async fn api_key_middleware(
    State(keys): State<Arc<ApiKeys>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    match keys.verify(presented) {
        Ok(()) => next.run(request).await,
        Err(e) => {
            tracing::warn!(path = %request.uri().path(), code = e.code().as_str(), "API key rejected");
            e.with_request_id(request_id(request.headers())).into_response()
        }
    }
}
