//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, capacities > 0)
//! - Reject configurations the pipeline cannot run with
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use crate::config::schema::{ServerConfig, TierConfig};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
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

pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<std::net::SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    if config.pool.max_connections == 0 {
        errors.push(ValidationError::new("pool.max_connections", "must be greater than 0"));
    }
    if config.pool.acquire_timeout_ms == 0 {
        errors.push(ValidationError::new("pool.acquire_timeout_ms", "must be greater than 0"));
    }

    check_tier(&mut errors, "rate_limit.global", &config.rate_limit.global);
    check_tier(&mut errors, "rate_limit.login", &config.rate_limit.login);
    if config.rate_limit.sweep_interval_secs == 0 {
        errors.push(ValidationError::new(
            "rate_limit.sweep_interval_secs",
            "must be greater than 0",
        ));
    }

    if config.auth.jwt_secret.trim().is_empty() {
        errors.push(ValidationError::new("auth.jwt_secret", "must not be empty"));
    }
    if config.auth.token_ttl_secs == 0 {
        errors.push(ValidationError::new("auth.token_ttl_secs", "must be greater than 0"));
    }
    if !(4..=31).contains(&config.auth.bcrypt_cost) {
        errors.push(ValidationError::new("auth.bcrypt_cost", "must be between 4 and 31"));
    }

    if config.audit.channel_capacity == 0 {
        errors.push(ValidationError::new("audit.channel_capacity", "must be greater than 0"));
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }

    if !config.database.url.starts_with("sqlite:") {
        errors.push(ValidationError::new(
            "database.url",
            format!("'{}' is not a sqlite: URL", config.database.url),
        ));
    }

    if !matches!(config.observability.log_format.as_str(), "pretty" | "json") {
        errors.push(ValidationError::new(
            "observability.log_format",
            format!("unknown format '{}'", config.observability.log_format),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_tier(errors: &mut Vec<ValidationError>, field: &'static str, tier: &TierConfig) {
    if tier.window_secs == 0 {
        errors.push(ValidationError::new(field, "window_secs must be greater than 0"));
    }
    if tier.max_requests == 0 {
        errors.push(ValidationError::new(field, "max_requests must be greater than 0"));
    }
}
