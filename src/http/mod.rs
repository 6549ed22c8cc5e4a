//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware stack)
//!     → request.rs (request ID, forwarded headers)
//!     → handlers.rs (/health, /metrics, /gateway/info)
//!       or proxy.rs (breaker, transport, retries)
//!       or websocket.rs (upgrade tunnel)
//!     → response.rs (strip hop-by-hop, tag serving service)
//!     → Send to client
//! ```

pub mod handlers;
pub mod proxy;
pub mod request;
pub mod response;
pub mod server;
pub mod websocket;

pub use request::X_REQUEST_ID;
pub use server::{build_router, AppState, GatewayServer, ServerError};
