//! Gateway error taxonomy.
//!
//! Every error the gateway produces itself (as opposed to a downstream
//! response passed through verbatim) is a [`GatewayError`]. It renders as
//!
//! ```json
//! {"error": {"code": "SERVICE_UNAVAILABLE", "message": "...", "requestId": "...", "timestamp": "..."}}
//! ```
//!
//! Breaker rejections and misconfigured targets are both 503 and differ only
//! by `code`.

use std::time::Duration;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Stable machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    AuthenticationError,
    AuthorizationError,
    NotFound,
    RateLimitExceeded,
    InternalError,
    BadGateway,
    ServiceUnavailable,
    ServiceMisconfigured,
    GatewayTimeout,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::AuthenticationError => "AUTHENTICATION_ERROR",
            ErrorCode::AuthorizationError => "AUTHORIZATION_ERROR",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::BadGateway => "BAD_GATEWAY",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCode::ServiceMisconfigured => "SERVICE_MISCONFIGURED",
            ErrorCode::GatewayTimeout => "GATEWAY_TIMEOUT",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ErrorCode::ValidationError => StatusCode::BAD_REQUEST,
            ErrorCode::AuthenticationError => StatusCode::UNAUTHORIZED,
            ErrorCode::AuthorizationError => StatusCode::FORBIDDEN,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::BadGateway => StatusCode::BAD_GATEWAY,
            ErrorCode::ServiceUnavailable | ErrorCode::ServiceMisconfigured => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ErrorCode::GatewayTimeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

/// Errors produced by the gateway itself.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0}")]
    Validation(String),

    #[error("Missing API key")]
    Authentication,

    #[error("API key is not authorized for this resource")]
    Authorization,

    #[error("{0}")]
    NotFound(String),

    #[error("Too many requests, please retry later")]
    RateLimited { retry_after: Duration },

    #[error("Service '{service}' is temporarily unavailable")]
    CircuitOpen { service: String, retry_after: Duration },

    #[error("Service '{service}' is not configured correctly")]
    Misconfigured { service: String },

    #[error("Service '{service}' could not be reached")]
    BadGateway { service: String },

    #[error("Service '{service}' did not respond in time")]
    Timeout { service: String },

    #[error("Request did not complete within the gateway deadline")]
    DeadlineExceeded,

    #[error("Internal gateway error")]
    Internal,
}

impl GatewayError {
    pub fn code(&self) -> ErrorCode {
        match self {
            GatewayError::Validation(_) => ErrorCode::ValidationError,
            GatewayError::Authentication => ErrorCode::AuthenticationError,
            GatewayError::Authorization => ErrorCode::AuthorizationError,
            GatewayError::NotFound(_) => ErrorCode::NotFound,
            GatewayError::RateLimited { .. } => ErrorCode::RateLimitExceeded,
            GatewayError::CircuitOpen { .. } => ErrorCode::ServiceUnavailable,
            GatewayError::Misconfigured { .. } => ErrorCode::ServiceMisconfigured,
            GatewayError::BadGateway { .. } => ErrorCode::BadGateway,
            GatewayError::Timeout { .. } | GatewayError::DeadlineExceeded => ErrorCode::GatewayTimeout,
            GatewayError::Internal => ErrorCode::InternalError,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.code().status()
    }

    /// Seconds the client should wait before retrying, if meaningful.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            GatewayError::RateLimited { retry_after } | GatewayError::CircuitOpen { retry_after, .. } => {
                Some(retry_after.as_millis().div_ceil(1000).max(1) as u64)
            }
            _ => None,
        }
    }

    /// Attach the correlation id of the request that failed.
    pub fn with_request_id(self, request_id: impl Into<String>) -> ErrorResponse {
        ErrorResponse {
            error: self,
            request_id: Some(request_id.into()),
        }
    }
}

/// A [`GatewayError`] bound to a request id, ready to be rendered.
#[derive(Debug)]
pub struct ErrorResponse {
    error: GatewayError,
    request_id: Option<String>,
}

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    error: ErrorBody<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody<'a> {
    code: &'static str,
    message: String,
    request_id: Option<&'a str>,
    timestamp: String,
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let body = ErrorEnvelope {
            error: ErrorBody {
                code: self.error.code().as_str(),
                message: self.error.to_string(),
                request_id: self.request_id.as_deref(),
                timestamp: chrono::Utc::now().to_rfc3339(),
            },
        };

        let mut response = (self.error.status(), Json(body)).into_response();
        if let Some(secs) = self.error.retry_after_secs() {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        ErrorResponse {
            error: self,
            request_id: None,
        }
        .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_503s_are_distinguishable_by_code() {
        let open = GatewayError::CircuitOpen {
            service: "ai".into(),
            retry_after: Duration::from_secs(30),
        };
        let bad = GatewayError::Misconfigured { service: "ai".into() };
        assert_eq!(open.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(bad.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_ne!(open.code(), bad.code());
        assert_eq!(open.code().as_str(), "SERVICE_UNAVAILABLE");
        assert_eq!(bad.code().as_str(), "SERVICE_MISCONFIGURED");
    }

    #[test]
    fn retry_after_rounds_up_to_one_second() {
        let err = GatewayError::CircuitOpen {
            service: "ai".into(),
            retry_after: Duration::from_millis(200),
        };
        assert_eq!(err.retry_after_secs(), Some(1));
        assert_eq!(GatewayError::Internal.retry_after_secs(), None);
    }

    #[test]
    fn response_carries_retry_after_header() {
        let response = GatewayError::RateLimited {
            retry_after: Duration::from_secs(3),
        }
        .with_request_id("req-1")
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "3");
    }

    #[test]
    fn serde_code_matches_as_str() {
        let value = serde_json::to_value(ErrorCode::RateLimitExceeded).unwrap();
        assert_eq!(value, "RATE_LIMIT_EXCEEDED");
    }
}
