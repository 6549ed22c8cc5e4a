//! Per-client rate limiting.

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;

use crate::config::RateLimitConfig;
use crate::error::GatewayError;
use crate::http::request::request_id;

/// Buckets untouched for this long are dropped during a sweep.
const IDLE_BUCKET_TTL: Duration = Duration::from_secs(300);
/// Minimum time between two sweeps of the bucket table.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// A simple token bucket.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_update: now,
        }
    }

    /// Take one token, or report how long until one is available.
    fn try_acquire(&mut self, capacity: f64, refill_rate: f64, now: Instant) -> Result<(), Duration> {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            Err(Duration::from_secs_f64((1.0 - self.tokens) / refill_rate))
        }
    }
}

/// Token buckets keyed by client IP.
#[derive(Debug)]
pub struct RateLimiter {
    buckets: DashMap<IpAddr, TokenBucket>,
    last_sweep: Mutex<Instant>,
    rps: f64,
    burst: f64,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let rps = f64::from(config.requests_per_second.max(1));
        Self {
            buckets: DashMap::new(),
            last_sweep: Mutex::new(Instant::now()),
            rps,
            burst: f64::from(config.burst_size).max(1.0),
        }
    }

    pub fn check(&self, client: IpAddr) -> Result<(), Duration> {
        self.check_at(client, Instant::now())
    }

    /// Number of clients currently holding a bucket.
    pub fn tracked_clients(&self) -> usize {
        self.buckets.len()
    }

    fn check_at(&self, client: IpAddr, now: Instant) -> Result<(), Duration> {
        self.sweep_if_due(now);
        self.buckets
            .entry(client)
            .or_insert_with(|| TokenBucket::new(self.burst, now))
            .try_acquire(self.burst, self.rps, now)
    }

    /// Drop idle buckets, at most once per [`SWEEP_INTERVAL`]. Callers that
    /// find another sweep in progress skip it.
    fn sweep_if_due(&self, now: Instant) {
        let Ok(mut last_sweep) = self.last_sweep.try_lock() else {
            return;
        };
        if now.saturating_duration_since(*last_sweep) < SWEEP_INTERVAL {
            return;
        }
        *last_sweep = now;
        drop(last_sweep);

        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.last_update) < IDLE_BUCKET_TTL);
        tracing::debug!(before, after = self.buckets.len(), "Swept idle rate limit buckets");
    }
}

/// Middleware rejecting clients that exceed their bucket.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(client) = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
    else {
        return next.run(request).await;
    };

    match limiter.check(client) {
        Ok(()) => next.run(request).await,
        Err(retry_after) => {
            tracing::warn!(client = %client, path = %request.uri().path(), "Rate limit exceeded");
            GatewayError::RateLimited { retry_after }
                .with_request_id(request_id(request.headers()))
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(rps: u32, burst: u32) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            enabled: true,
            requests_per_second: rps,
            burst_size: burst,
        })
    }

    #[test]
    fn burst_then_refill() {
        let limiter = limiter(10, 3);
        let client: IpAddr = "10.0.0.1".parse().unwrap();
        let start = Instant::now();

        for _ in 0..3 {
            assert!(limiter.check_at(client, start).is_ok());
        }
        let wait = limiter.check_at(client, start).unwrap_err();
        assert!(wait <= Duration::from_millis(100));

        assert!(limiter.check_at(client, start + Duration::from_millis(100)).is_ok());
    }

    #[test]
    fn clients_are_isolated() {
        let limiter = limiter(1, 1);
        let now = Instant::now();
        assert!(limiter.check_at("10.0.0.1".parse().unwrap(), now).is_ok());
        assert!(limiter.check_at("10.0.0.1".parse().unwrap(), now).is_err());
        assert!(limiter.check_at("10.0.0.2".parse().unwrap(), now).is_ok());
    }

    #[test]
    fn idle_clients_are_swept_once_per_interval() {
        let limiter = limiter(10, 5);
        let start = Instant::now();
        for last_octet in 1..=3 {
            let client = IpAddr::from([10, 0, 0, last_octet]);
            assert!(limiter.check_at(client, start).is_ok());
        }
        assert_eq!(limiter.tracked_clients(), 3);

        // First lookup after the interval sweeps everything idle past the TTL.
        let swept_at = start + IDLE_BUCKET_TTL + Duration::from_secs(1);
        assert!(limiter.check_at("10.0.1.1".parse().unwrap(), swept_at).is_ok());
        assert_eq!(limiter.tracked_clients(), 1);

        // A bucket that goes stale inside the interval survives until the next sweep.
        let stale: IpAddr = "10.0.2.1".parse().unwrap();
        assert!(limiter.check_at(stale, swept_at - IDLE_BUCKET_TTL).is_ok());
        for secs in 1..SWEEP_INTERVAL.as_secs() {
            let now = swept_at + Duration::from_secs(secs);
            assert!(limiter.check_at("10.0.1.1".parse().unwrap(), now).is_ok());
        }
        assert_eq!(limiter.tracked_clients(), 2);

        assert!(limiter.check_at("10.0.1.1".parse().unwrap(), swept_at + SWEEP_INTERVAL).is_ok());
        assert_eq!(limiter.tracked_clients(), 1);
    }
}
