//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Count requests by method, normalized path and status
//! - Keep a bounded window of response times for percentiles
//! - Count circuit breaker transitions and rejections per service
//! - Track the last health check result per service
//! - Render everything in the Prometheus text exposition format
//!
//! # Metrics
//! - `gateway_http_requests_total` (counter): requests by method, path, status
//! - `gateway_http_request_errors_total` (counter): responses with status >= 400
//! - `gateway_http_request_duration_ms` (histogram): latency distribution by method
//! - `gateway_http_request_duration_ms_quantile` (gauge): p50/p95/p99 over the window
//! - `gateway_circuit_breaker_opened_total` / `_closed_total` / `_rejections_total` (counter)
//! - `gateway_service_health` (gauge): 1=healthy, 0=unhealthy
//! - `gateway_health_check_duration_ms` (gauge): last check duration
//! - `gateway_uptime_seconds` (gauge)
//!
//! # Design Decisions
//! - Each collector owns its `prometheus::Registry`; nothing is global
//! - Path segments that look like ids are collapsed to bound label cardinality
//! - The registry is the only store of counts; the window exists for percentiles

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use prometheus::core::Collector;
use prometheus::proto::Metric;
use prometheus::{
    Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use serde::Serialize;
use uuid::Uuid;

use crate::config::MonitoringConfig;

/// Label used for requests that matched neither a gateway endpoint nor a
/// service route.
pub const UNMATCHED_PATH: &str = "unmatched";

/// Response time summary computed from the rolling window.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResponseTimeStats {
    pub samples: usize,
    pub avg_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

/// Per-service breaker event counts.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BreakerCounts {
    pub opened: u64,
    pub closed: u64,
    pub rejections: u64,
}

/// Point-in-time view of the collector.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub total_requests: u64,
    pub total_errors: u64,
    pub requests_by_status: BTreeMap<u16, u64>,
    pub requests_by_route: BTreeMap<String, u64>,
    pub response_time: ResponseTimeStats,
    pub circuit_breakers: BTreeMap<String, BreakerCounts>,
}

/// Request, latency, breaker and health metrics for one gateway process.
pub struct MetricsCollector {
    started_at: Instant,
    window_size: usize,
    window: Mutex<VecDeque<f64>>,
    registry: Registry,
    requests: IntCounterVec,
    errors: IntCounterVec,
    durations: HistogramVec,
    quantiles: GaugeVec,
    breaker_opened: IntCounterVec,
    breaker_closed: IntCounterVec,
    breaker_rejections: IntCounterVec,
    service_health: IntGaugeVec,
    health_check_ms: IntGaugeVec,
    uptime: Gauge,
}

impl MetricsCollector {
    pub fn new(config: &MonitoringConfig) -> Result<Self, prometheus::Error> {
        let mut buckets: Vec<f64> = config
            .buckets_ms
            .iter()
            .copied()
            .filter(|b| b.is_finite() && *b > 0.0)
            .collect();
        buckets.sort_by(|a, b| a.total_cmp(b));
        buckets.dedup();

        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new("gateway_http_requests_total", "Total HTTP requests handled by the gateway."),
            &["method", "path", "status"],
        )?;
        registry.register(Box::new(requests.clone()))?;

        let errors = IntCounterVec::new(
            Opts::new(
                "gateway_http_request_errors_total",
                "HTTP requests answered with a status code of 400 or above.",
            ),
            &["method", "path", "status"],
        )?;
        registry.register(Box::new(errors.clone()))?;

        let durations = HistogramVec::new(
            HistogramOpts::new("gateway_http_request_duration_ms", "HTTP request duration in milliseconds.")
                .buckets(buckets),
            &["method"],
        )?;
        registry.register(Box::new(durations.clone()))?;

        let quantiles = GaugeVec::new(
            Opts::new(
                "gateway_http_request_duration_ms_quantile",
                "Response time percentiles over the recent request window, in milliseconds.",
            ),
            &["quantile"],
        )?;
        registry.register(Box::new(quantiles.clone()))?;

        let breaker_opened = IntCounterVec::new(
            Opts::new(
                "gateway_circuit_breaker_opened_total",
                "Times a service circuit transitioned to open.",
            ),
            &["service"],
        )?;
        registry.register(Box::new(breaker_opened.clone()))?;

        let breaker_closed = IntCounterVec::new(
            Opts::new(
                "gateway_circuit_breaker_closed_total",
                "Times a service circuit transitioned back to closed.",
            ),
            &["service"],
        )?;
        registry.register(Box::new(breaker_closed.clone()))?;

        let breaker_rejections = IntCounterVec::new(
            Opts::new(
                "gateway_circuit_breaker_rejections_total",
                "Requests rejected because the service circuit was open.",
            ),
            &["service"],
        )?;
        registry.register(Box::new(breaker_rejections.clone()))?;

        let service_health = IntGaugeVec::new(
            Opts::new(
                "gateway_service_health",
                "Result of the last health check per service (1 = healthy).",
            ),
            &["service"],
        )?;
        registry.register(Box::new(service_health.clone()))?;

        let health_check_ms = IntGaugeVec::new(
            Opts::new(
                "gateway_health_check_duration_ms",
                "Duration of the last health check per service, in milliseconds.",
            ),
            &["service"],
        )?;
        registry.register(Box::new(health_check_ms.clone()))?;

        let uptime = Gauge::with_opts(Opts::new("gateway_uptime_seconds", "Seconds since the gateway started."))?;
        registry.register(Box::new(uptime.clone()))?;

        Ok(Self {
            started_at: Instant::now(),
            window_size: config.window_size.max(1),
            window: Mutex::new(VecDeque::with_capacity(config.window_size.max(1))),
            registry,
            requests,
            errors,
            durations,
            quantiles,
            breaker_opened,
            breaker_closed,
            breaker_rejections,
            service_health,
            health_check_ms,
            uptime,
        })
    }

    /// Fold one completed request into the counters and the latency window.
    ///
    /// `raw_path` is normalized here; callers that already know the request
    /// matched nothing pass [`UNMATCHED_PATH`].
    pub fn record(&self, method: &str, raw_path: &str, status: u16, duration: Duration) {
        let method = method.to_ascii_uppercase();
        let path = if raw_path == UNMATCHED_PATH {
            UNMATCHED_PATH.to_string()
        } else {
            normalize_path(raw_path)
        };
        let status_label = status.to_string();
        let labels = [method.as_str(), path.as_str(), status_label.as_str()];
        let duration_ms = duration.as_secs_f64() * 1000.0;

        self.requests.with_label_values(&labels).inc();
        if status >= 400 {
            self.errors.with_label_values(&labels).inc();
        }
        self.durations.with_label_values(&[method.as_str()]).observe(duration_ms);

        let mut window = self.window.lock().expect("metrics mutex poisoned");
        if window.len() == self.window_size {
            window.pop_front();
        }
        window.push_back(duration_ms);
    }

    pub fn circuit_opened(&self, service: &str) {
        self.breaker_opened.with_label_values(&[service]).inc();
    }

    pub fn circuit_closed(&self, service: &str) {
        self.breaker_closed.with_label_values(&[service]).inc();
    }

    pub fn circuit_rejected(&self, service: &str) {
        self.breaker_rejections.with_label_values(&[service]).inc();
    }

    pub fn set_service_health(&self, service: &str, healthy: bool) {
        self.service_health
            .with_label_values(&[service])
            .set(i64::from(healthy));
    }

    pub fn observe_health_check(&self, service: &str, duration_ms: u64) {
        self.health_check_ms
            .with_label_values(&[service])
            .set(i64::try_from(duration_ms).unwrap_or(i64::MAX));
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut requests_by_status = BTreeMap::new();
        let mut requests_by_route = BTreeMap::new();
        let mut total_requests = 0;
        for metric in series(&self.requests) {
            let count = metric.get_counter().get_value() as u64;
            total_requests += count;
            if let Ok(status) = label(&metric, "status").parse::<u16>() {
                *requests_by_status.entry(status).or_insert(0) += count;
            }
            *requests_by_route
                .entry(format!("{} {}", label(&metric, "method"), label(&metric, "path")))
                .or_insert(0) += count;
        }
        let total_errors = series(&self.errors)
            .iter()
            .map(|m| m.get_counter().get_value() as u64)
            .sum();

        let mut circuit_breakers: BTreeMap<String, BreakerCounts> = BTreeMap::new();
        for metric in series(&self.breaker_opened) {
            circuit_breakers.entry(label(&metric, "service").to_string()).or_default().opened =
                metric.get_counter().get_value() as u64;
        }
        for metric in series(&self.breaker_closed) {
            circuit_breakers.entry(label(&metric, "service").to_string()).or_default().closed =
                metric.get_counter().get_value() as u64;
        }
        for metric in series(&self.breaker_rejections) {
            circuit_breakers.entry(label(&metric, "service").to_string()).or_default().rejections =
                metric.get_counter().get_value() as u64;
        }

        MetricsSnapshot {
            uptime_secs: self.uptime().as_secs(),
            total_requests,
            total_errors,
            requests_by_status,
            requests_by_route,
            response_time: self.response_time(),
            circuit_breakers,
        }
    }

    fn response_time(&self) -> ResponseTimeStats {
        let mut samples: Vec<f64> = {
            let window = self.window.lock().expect("metrics mutex poisoned");
            window.iter().copied().collect()
        };
        if samples.is_empty() {
            return ResponseTimeStats::default();
        }
        samples.sort_by(|a, b| a.total_cmp(b));

        let sum: f64 = samples.iter().sum();
        ResponseTimeStats {
            samples: samples.len(),
            avg_ms: sum / samples.len() as f64,
            p50_ms: percentile(&samples, 0.50),
            p95_ms: percentile(&samples, 0.95),
            p99_ms: percentile(&samples, 0.99),
            max_ms: samples[samples.len() - 1],
        }
    }

    /// Render the Prometheus text exposition format.
    ///
    /// Families with labels appear once their first series exists.
    pub fn export_text(&self) -> Result<String, prometheus::Error> {
        self.uptime.set(self.uptime().as_secs_f64());

        let stats = self.response_time();
        self.quantiles.reset();
        if stats.samples > 0 {
            for (q, value) in [("0.5", stats.p50_ms), ("0.95", stats.p95_ms), ("0.99", stats.p99_ms)] {
                self.quantiles.with_label_values(&[q]).set(value);
            }
        }

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    /// Clear every series and the latency window.
    #[cfg(test)]
    pub fn reset_for_tests(&self) {
        self.requests.reset();
        self.errors.reset();
        self.durations.reset();
        self.quantiles.reset();
        self.breaker_opened.reset();
        self.breaker_closed.reset();
        self.breaker_rejections.reset();
        self.service_health.reset();
        self.health_check_ms.reset();
        self.window.lock().expect("metrics mutex poisoned").clear();
    }
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsCollector")
            .field("window_size", &self.window_size)
            .field("uptime", &self.uptime())
            .finish_non_exhaustive()
    }
}

/// Collapse id-like path segments so label cardinality stays bounded.
///
/// Numeric segments become `:id`, UUIDs `:uuid` and 24-hex Mongo ObjectIds
/// `:objectId`. The query string is dropped.
pub fn normalize_path(path: &str) -> String {
    let path = path.split('?').next().unwrap_or_default();
    if path.is_empty() {
        return "/".to_string();
    }

    path.split('/')
        .map(|segment| {
            if segment.is_empty() {
                segment
            } else if segment.bytes().all(|b| b.is_ascii_digit()) {
                ":id"
            } else if segment.len() == 24 && segment.bytes().all(|b| b.is_ascii_hexdigit()) {
                ":objectId"
            } else if Uuid::parse_str(segment).is_ok() {
                ":uuid"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Nearest-rank percentile over an ascending slice.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = (p * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

fn series(vec: &IntCounterVec) -> Vec<Metric> {
    vec.collect()
        .into_iter()
        .flat_map(|mut family| family.take_metric().into_iter())
        .collect()
}

fn label<'a>(metric: &'a Metric, name: &str) -> &'a str {
    metric
        .get_label()
        .iter()
        .find(|pair| pair.get_name() == name)
        .map_or("", |pair| pair.get_value())
}
