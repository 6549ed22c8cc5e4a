//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Per-service ticker (checker.rs)          GET /health
//!     → probe <target>/health                 → check_all()
//!     → ServiceHealth + history (state.rs)    → HealthStatus::aggregate
//!     → service_health gauge                  → 200 / 207 / 503
//! ```
//!
//! # Design Decisions
//! - Probes run independently of request handling and never block it
//! - Health is informational; it does not open or close circuits

pub mod checker;
pub mod state;

pub use checker::HealthChecker;
pub use state::{HealthHistory, HealthStatus, ServiceHealth};
