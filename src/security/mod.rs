//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Proxied request:
//!     → rate_limit.rs (per-IP token bucket, 429)
//!     → auth.rs (optional API key, 401/403)
//!     → Pass to proxy handler
//!
//! Every response:
//!     → headers.rs (hardening headers)
//! ```
//!
//! # Design Decisions
//! - Gateway endpoints (/health, /metrics, /info) are never rate limited
//! - Fail closed: reject on any security check failure

pub mod auth;
pub mod headers;
pub mod rate_limit;

pub use auth::{api_key_middleware, ApiKeys};
pub use headers::with_security_headers;
pub use rate_limit::{rate_limit_middleware, RateLimiter};
