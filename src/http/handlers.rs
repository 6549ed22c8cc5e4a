//! Gateway-owned endpoints: `/health`, `/metrics`, `/gateway/info`.

use std::collections::BTreeMap;

use axum::{
    extract::State,
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sysinfo::System;

use crate::error::GatewayError;
use crate::health::{HealthStatus, ServiceHealth};
use crate::http::request::request_id;
use crate::http::server::AppState;
use crate::resilience::CircuitSnapshot;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    /// Seconds since the gateway started.
    pub uptime: u64,
    pub version: &'static str,
    pub services: Vec<ServiceHealth>,
    pub system: SystemReport,
}

#[derive(Debug, Serialize)]
pub struct SystemReport {
    pub memory: MemoryReport,
    pub cpu: CpuReport,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryReport {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub usage_percent: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuReport {
    pub cores: usize,
    pub usage_percent: f32,
    pub load_average: [f64; 3],
}

pub async fn health_handler(State(state): State<AppState>) -> Response {
    let services = state.health.check_all().await;
    let status = HealthStatus::aggregate(&services);

    if status != HealthStatus::Healthy {
        let failing: Vec<&str> = services
            .iter()
            .filter(|s| !s.is_healthy)
            .map(|s| s.service_name.as_str())
            .collect();
        tracing::warn!(status = ?status, failing = ?failing, "Gateway health degraded");
    }

    let report = HealthReport {
        status,
        timestamp: Utc::now(),
        uptime: state.metrics.uptime().as_secs(),
        version: VERSION,
        services,
        system: system_report(&state),
    };
    (status.http_status(), Json(report)).into_response()
}

fn system_report(state: &AppState) -> SystemReport {
    let mut system = state.system.lock().expect("system info mutex poisoned");
    system.refresh_memory();
    system.refresh_cpu_usage();

    let total = system.total_memory();
    let used = system.used_memory();
    let load = System::load_average();
    let cores = std::thread::available_parallelism().map_or(1, |n| n.get());

    SystemReport {
        memory: MemoryReport {
            total_bytes: total,
            used_bytes: used,
            usage_percent: if total == 0 {
                0.0
            } else {
                (used as f64 / total as f64 * 1000.0).round() / 10.0
            },
        },
        cpu: CpuReport {
            cores,
            usage_percent: system.global_cpu_usage(),
            load_average: [load.one, load.five, load.fifteen],
        },
    }
}

pub async fn metrics_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !state.config.monitoring.enabled {
        return GatewayError::NotFound("Metrics collection is disabled".to_string())
            .with_request_id(request_id(&headers))
            .into_response();
    }
    match state.metrics.export_text() {
        Ok(text) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], text).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            GatewayError::Internal
                .with_request_id(request_id(&headers))
                .into_response()
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayInfo {
    pub name: String,
    pub version: &'static str,
    pub environment: String,
    pub uptime: u64,
    pub services: Vec<ServiceInfo>,
    pub features: BTreeMap<&'static str, bool>,
    pub circuit_breakers: Vec<CircuitSnapshot>,
    pub endpoints: [&'static str; 4],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    pub name: String,
    pub path_prefix: String,
    pub target: String,
    pub target_valid: bool,
    pub timeout_ms: u64,
    pub retry_count: u32,
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
    pub health_path: String,
    pub health_interval_secs: u64,
}

pub async fn info_handler(State(state): State<AppState>) -> Json<GatewayInfo> {
    let config = &state.config;
    let services = config
        .services
        .iter()
        .map(|s| ServiceInfo {
            name: s.name.clone(),
            path_prefix: s.path_prefix.clone(),
            target: s.target.clone(),
            target_valid: state
                .router
                .routes()
                .iter()
                .any(|r| r.service == s.name && r.target.is_valid()),
            timeout_ms: s.timeout_ms,
            retry_count: s.retry_count,
            failure_threshold: s.circuit_breaker.failure_threshold,
            reset_timeout_ms: s.circuit_breaker.reset_timeout_ms,
            health_path: s.health.path.clone(),
            health_interval_secs: s.health.interval_secs,
        })
        .collect();

    let features = BTreeMap::from([
        ("monitoring", config.monitoring.enabled),
        ("healthChecks", config.health_check.enabled),
        ("rateLimiting", config.rate_limit.enabled),
        ("securityHeaders", config.security.enable_headers),
        ("apiKeyAuth", state.api_keys.is_enabled()),
        ("circuitBreaker", true),
        ("websocketProxy", true),
    ]);

    Json(GatewayInfo {
        name: config.gateway.name.clone(),
        version: VERSION,
        environment: config.gateway.environment.clone(),
        uptime: state.metrics.uptime().as_secs(),
        services,
        features,
        circuit_breakers: state.breaker.snapshot(),
        endpoints: ["/health", "/metrics", "/gateway/info", "/info"],
    })
}
