//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Proxy handler / health checker
//!     → UpstreamRequest (method, absolute URL, headers, buffered body)
//!     → transport.rs (deadline, pooled connection, TLS)
//!     → Response<Body> (streamed) or ForwardError
//! ```

pub mod transport;

pub use transport::{ForwardError, HttpTransport, Transport, UpstreamRequest};
