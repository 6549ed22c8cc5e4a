//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Gateway identity reported by `/gateway/info`.
    pub gateway: GatewayInfoConfig,

    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Downstream services, each reachable under its own path prefix.
    pub services: Vec<ServiceConfig>,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Retry backoff configuration.
    pub retries: RetryConfig,

    /// Health check defaults.
    pub health_check: HealthCheckConfig,

    /// Metrics collection settings.
    pub monitoring: MonitoringConfig,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Security hardening settings.
    pub security: SecurityConfig,

    /// Logging settings.
    pub observability: ObservabilityConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayInfoConfig::default(),
            listener: ListenerConfig::default(),
            services: default_services(),
            timeouts: TimeoutConfig::default(),
            retries: RetryConfig::default(),
            health_check: HealthCheckConfig::default(),
            monitoring: MonitoringConfig::default(),
            rate_limit: RateLimitConfig::default(),
            security: SecurityConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// The three downstreams the gateway fronts out of the box.
fn default_services() -> Vec<ServiceConfig> {
    vec![
        ServiceConfig {
            name: "ai".to_string(),
            target: "http://localhost:3001".to_string(),
            path_prefix: "/api/ai".to_string(),
            timeout_ms: 30_000,
            retry_count: 2,
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 3,
                reset_timeout_ms: 30_000,
            },
            health: ServiceHealthConfig {
                interval_secs: 15,
                path: "/health".to_string(),
            },
        },
        ServiceConfig {
            name: "rest".to_string(),
            target: "http://localhost:3002".to_string(),
            path_prefix: "/api/v1".to_string(),
            timeout_ms: 10_000,
            retry_count: 3,
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 5,
                reset_timeout_ms: 60_000,
            },
            health: ServiceHealthConfig {
                interval_secs: 30,
                path: "/health".to_string(),
            },
        },
        ServiceConfig {
            name: "websocket".to_string(),
            target: "http://localhost:3003".to_string(),
            path_prefix: "/ws".to_string(),
            timeout_ms: 5_000,
            retry_count: 1,
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 2,
                reset_timeout_ms: 15_000,
            },
            health: ServiceHealthConfig {
                interval_secs: 30,
                path: "/health".to_string(),
            },
        },
    ]
}

/// Gateway identity.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayInfoConfig {
    pub name: String,
    pub environment: String,
}

impl Default for GatewayInfoConfig {
    fn default() -> Self {
        Self {
            name: "salambot-gateway".to_string(),
            environment: "development".to_string(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// A downstream service definition.
///
/// `target` is kept as the raw string from the file; it is parsed once when
/// the routing table is compiled so a bad URL disables only its own prefix.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// Unique service identifier, used as the breaker and metrics key.
    pub name: String,

    /// Base URL of the downstream (e.g., "http://ai-backend:3001").
    #[serde(default)]
    pub target: String,

    /// Path prefix served by this service; stripped before forwarding.
    pub path_prefix: String,

    /// Per-attempt forwarding timeout in milliseconds.
    #[serde(default = "default_service_timeout_ms")]
    pub timeout_ms: u64,

    /// Extra attempts for idempotent requests after a connection failure.
    #[serde(default)]
    pub retry_count: u32,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    #[serde(default)]
    pub health: ServiceHealthConfig,
}

fn default_service_timeout_ms() -> u64 {
    30_000
}

/// Per-service circuit breaker settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,

    /// How long the circuit stays open before a probe is allowed.
    pub reset_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 30_000,
        }
    }
}

/// Per-service health probe settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceHealthConfig {
    /// Probe interval in seconds.
    pub interval_secs: u64,

    /// Path appended to the target for liveness probes.
    pub path: String,
}

impl Default for ServiceHealthConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            path: "/health".to_string(),
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Overall inbound request timeout in seconds.
    pub request_secs: u64,

    /// Idle pooled upstream connection timeout in seconds. Also the longest
    /// silence tolerated while reading a downstream response.
    pub idle_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 60,
            idle_secs: 60,
        }
    }
}

/// Retry backoff configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 100,
            max_delay_ms: 2000,
        }
    }
}

/// Health check configuration shared by all services.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable periodic background probes.
    pub enabled: bool,

    /// Probe timeout in milliseconds.
    pub timeout_ms: u64,

    /// Number of probe results retained per service.
    pub history_size: usize,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: 5_000,
            history_size: 100,
        }
    }
}

/// Metrics collection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Serve `/metrics`.
    pub enabled: bool,

    /// Number of response-time samples kept for percentiles.
    pub window_size: usize,

    /// Histogram bucket upper bounds in milliseconds.
    pub buckets_ms: Vec<f64>,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_size: 1000,
            buckets_ms: vec![
                5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0,
            ],
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Sustained requests per second per client IP.
    pub requests_per_second: u32,

    /// Burst capacity.
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: 100,
            burst_size: 200,
        }
    }
}

/// Security hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Add hardening response headers.
    pub enable_headers: bool,

    /// Maximum buffered request body size in bytes.
    pub max_body_size: usize,

    /// Accepted `x-api-key` values for proxied routes. Empty disables the check.
    pub api_keys: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enable_headers: true,
            max_body_size: 2 * 1024 * 1024, // 2MB
            api_keys: Vec::new(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}
