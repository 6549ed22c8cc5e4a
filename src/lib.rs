//! SalamBot API gateway resilience layer.
//!
//! Fronts the SalamBot downstream services with per-service circuit
//! breakers, active health checks, request metrics and a prefix-routing
//! reverse proxy.

// Core subsystems
pub mod config;
pub mod error;
pub mod http;
pub mod net;
pub mod routing;

// Service state
pub mod health;
pub mod resilience;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::GatewayConfig;
pub use error::{ErrorCode, GatewayError};
pub use http::GatewayServer;
pub use lifecycle::Shutdown;
