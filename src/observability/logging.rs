//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber
//! - Pick the output format (pretty for development, JSON for production)
//! - Raise alerts for critical failures
//!
//! # Design Decisions
//! - `RUST_LOG` wins over the configured level when set
//! - The alert hook only logs; delivery to a pager is out of scope

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, ObservabilityConfig};

/// Install the global tracing subscriber.
pub fn init_logging(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "salambot_gateway={level},tower_http={level}",
            level = config.log_level
        )
        .into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    let result = match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };

    if let Err(e) = result {
        eprintln!("tracing subscriber already installed: {}", e);
    }
}

/// Hook invoked for every 5xx the gateway answers with.
pub fn raise_alert(service: &str, path: &str, status: u16, duration_ms: u64) {
    tracing::error!(
        target: "salambot_gateway::alert",
        service = %service,
        path = %path,
        status,
        duration_ms,
        "Critical gateway failure"
    );
}
