//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to a downstream service:
//!     → circuit_breaker.rs (fail fast while the circuit is open)
//!     → forward with the service timeout
//!     → On connection failure: retries.rs + backoff.rs (GET only)
//!     → circuit_breaker.rs (record outcome, open/close circuit)
//! ```
//!
//! # Design Decisions
//! - Every downstream call has a deadline
//! - Retries only for GET
//! - Circuit breaker prevents cascading failures

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;

pub use backoff::Backoff;
pub use circuit_breaker::{Admission, CallPermit, CircuitBreaker, CircuitSnapshot, CircuitStatus};
pub use retries::RetryPolicy;
