//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Gateway subsystems produce:
//!     → logging.rs (structured log events, alert hook)
//!     → metrics.rs (registry of counters, histograms, health gauges)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → GET /metrics (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through all log events
//! - The metrics collector is injected, never global

pub mod logging;
pub mod metrics;

pub use metrics::{normalize_path, MetricsCollector, MetricsSnapshot, UNMATCHED_PATH};
