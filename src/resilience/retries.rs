//! Retry policy.
//!
//! # Design Decisions
//! - Only GET requests are retried
//! - Only connection failures and timeouts are retried; an HTTP answer,
//!   even a 5xx, is returned to the caller as is
//! - At most `retry_count` extra attempts per service

use axum::http::Method;

use crate::net::ForwardError;

/// Retry decision for one service.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_retries: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Whether attempt number `attempt` (1-based) that failed with `error`
    /// should be followed by another one.
    pub fn should_retry(&self, method: &Method, error: &ForwardError, attempt: u32) -> bool {
        *method == Method::GET && error.is_retryable() && attempt <= self.max_retries
    }
}
