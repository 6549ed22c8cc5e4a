//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds > 0, timeouts > 0)
//! - Detect conflicting services and prefixes
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Target URLs are not validated here; a bad target disables only its
//!   own prefix at routing time

use std::collections::HashSet;
use std::fmt;

use crate::config::schema::GatewayConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut names = HashSet::new();
    let mut prefixes = HashSet::new();

    for (i, service) in config.services.iter().enumerate() {
        let field = |name: &str| format!("services[{}].{}", i, name);

        if service.name.trim().is_empty() {
            errors.push(ValidationError::new(field("name"), "must not be empty"));
        } else if !names.insert(service.name.as_str()) {
            errors.push(ValidationError::new(
                field("name"),
                format!("duplicate service name '{}'", service.name),
            ));
        }

        if !service.path_prefix.starts_with('/') {
            errors.push(ValidationError::new(field("path_prefix"), "must start with '/'"));
        } else {
            let normalized = service.path_prefix.trim_end_matches('/');
            if !prefixes.insert(normalized.to_string()) {
                errors.push(ValidationError::new(
                    field("path_prefix"),
                    format!("duplicate prefix '{}'", service.path_prefix),
                ));
            }
        }

        if service.timeout_ms == 0 {
            errors.push(ValidationError::new(field("timeout_ms"), "must be greater than 0"));
        }
        if service.circuit_breaker.failure_threshold == 0 {
            errors.push(ValidationError::new(
                field("circuit_breaker.failure_threshold"),
                "must be greater than 0",
            ));
        }
        if service.circuit_breaker.reset_timeout_ms == 0 {
            errors.push(ValidationError::new(
                field("circuit_breaker.reset_timeout_ms"),
                "must be greater than 0",
            ));
        }
        if service.health.interval_secs == 0 {
            errors.push(ValidationError::new(field("health.interval_secs"), "must be greater than 0"));
        }
    }

    if config.health_check.timeout_ms == 0 {
        errors.push(ValidationError::new("health_check.timeout_ms", "must be greater than 0"));
    }
    if config.health_check.history_size == 0 {
        errors.push(ValidationError::new("health_check.history_size", "must be greater than 0"));
    }
    if config.monitoring.window_size == 0 {
        errors.push(ValidationError::new("monitoring.window_size", "must be greater than 0"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }
    if config.rate_limit.enabled && config.rate_limit.requests_per_second == 0 {
        errors.push(ValidationError::new(
            "rate_limit.requests_per_second",
            "must be greater than 0 when rate limiting is enabled",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
