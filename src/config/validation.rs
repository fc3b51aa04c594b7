//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, connection limits)
//! - Check addresses parse and domain lists are usable
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RuntimeConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::RuntimeConfig;

/// A single semantic problem, tagged with the offending field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &RuntimeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.trim().is_empty() {
        errors.push(ValidationError::new("listener.bind_address", "must not be empty"));
    } else if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("{:?} is not a socket address", config.listener.bind_address),
        ));
    }

    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be greater than 0"));
    }

    if let Some(tls) = &config.listener.tls {
        if tls.cert_path.trim().is_empty() {
            errors.push(ValidationError::new("listener.tls.cert_path", "must not be empty"));
        }
        if tls.key_path.trim().is_empty() {
            errors.push(ValidationError::new("listener.tls.key_path", "must not be empty"));
        }
    }

    if config.detection.timeout_ms == 0 {
        errors.push(ValidationError::new("detection.timeout_ms", "must be greater than 0"));
    }
    if config.detection.peek_interval_ms > config.detection.timeout_ms {
        errors.push(ValidationError::new(
            "detection.peek_interval_ms",
            "must not exceed detection.timeout_ms",
        ));
    }

    if config.transport.read_timeout_secs == 0 {
        errors.push(ValidationError::new("transport.read_timeout_secs", "must be greater than 0"));
    }
    if config.transport.keep_alive_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "transport.keep_alive_timeout_secs",
            "must be greater than 0",
        ));
    }
    if config.transport.write_timeout_secs == 0 {
        errors.push(ValidationError::new("transport.write_timeout_secs", "must be greater than 0"));
    }

    if config.registry.default_domains.is_empty() {
        errors.push(ValidationError::new("registry.default_domains", "must list at least one domain"));
    }
    if config.registry.default_domains.iter().any(|d| d.trim().is_empty()) {
        errors.push(ValidationError::new("registry.default_domains", "must not contain blank entries"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("{:?} is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
