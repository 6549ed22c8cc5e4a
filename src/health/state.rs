//! Service health records and aggregation.
//!
//! # Aggregation
//! ```text
//! all services healthy   → healthy   (200)
//! some services healthy  → degraded  (207)
//! no service healthy     → unhealthy (503)
//! no services configured → healthy
//! ```

use std::collections::VecDeque;

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Result of the latest liveness probe of one service.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHealth {
    pub service_name: String,
    pub is_healthy: bool,
    pub last_check_at: Option<DateTime<Utc>>,
    pub response_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ServiceHealth {
    /// A service that has not been probed yet.
    pub fn unknown(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            is_healthy: false,
            last_check_at: None,
            response_time_ms: 0,
            status_code: None,
            error: None,
        }
    }
}

/// Gateway-wide health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn aggregate(services: &[ServiceHealth]) -> Self {
        let healthy = services.iter().filter(|s| s.is_healthy).count();
        if healthy == services.len() {
            HealthStatus::Healthy
        } else if healthy == 0 {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Degraded
        }
    }

    pub fn http_status(&self) -> StatusCode {
        match self {
            HealthStatus::Healthy => StatusCode::OK,
            HealthStatus::Degraded => StatusCode::MULTI_STATUS,
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Bounded probe history, oldest first.
#[derive(Debug, Clone)]
pub struct HealthHistory {
    capacity: usize,
    entries: VecDeque<ServiceHealth>,
}

impl HealthHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, entry: ServiceHealth) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_vec(&self) -> Vec<ServiceHealth> {
        self.entries.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn health(name: &str, healthy: bool) -> ServiceHealth {
        ServiceHealth {
            is_healthy: healthy,
            ..ServiceHealth::unknown(name)
        }
    }

    #[test]
    fn aggregates_three_ways() {
        let all = [health("ai", true), health("rest", true)];
        let some = [health("ai", true), health("rest", false)];
        let none = [health("ai", false), health("rest", false)];

        assert_eq!(HealthStatus::aggregate(&all), HealthStatus::Healthy);
        assert_eq!(HealthStatus::aggregate(&some), HealthStatus::Degraded);
        assert_eq!(HealthStatus::aggregate(&none), HealthStatus::Unhealthy);
        assert_eq!(HealthStatus::aggregate(&[]), HealthStatus::Healthy);

        assert_eq!(HealthStatus::Degraded.http_status().as_u16(), 207);
        assert_eq!(HealthStatus::Unhealthy.http_status().as_u16(), 503);
    }

    #[test]
    fn history_evicts_oldest() {
        let mut history = HealthHistory::new(3);
        for ms in 0..5 {
            history.push(ServiceHealth {
                response_time_ms: ms,
                ..ServiceHealth::unknown("ai")
            });
        }
        let times: Vec<_> = history.to_vec().iter().map(|h| h.response_time_ms).collect();
        assert_eq!(times, vec![2, 3, 4]);
    }

    #[test]
    fn serializes_camel_case() {
        let value = serde_json::to_value(health("ai", true)).unwrap();
        assert_eq!(value["serviceName"], "ai");
        assert_eq!(value["isHealthy"], true);
        assert!(value.get("statusCode").is_none());
    }
}
