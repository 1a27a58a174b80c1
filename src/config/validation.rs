//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Reject rate limits that could never refill
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use std::str::FromStr;

use axum::http::uri::Authority;

use crate::config::schema::{ProxyConfig, WebSocketRateLimitConfig};

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field}: invalid socket address '{value}'")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{field}: expected host:port, got '{value}'")]
    InvalidUpstream { field: &'static str, value: String },

    #[error("observability.log_level: unknown level '{0}'")]
    UnknownLogLevel(String),

    #[error("{0} must be greater than zero")]
    ZeroTimeout(&'static str),

    #[error("websocket_rate_limit.{direction}_byte_rate must be positive when {direction}_burst_limit is set")]
    ZeroRateWithBurst { direction: &'static str },

    #[error("websocket_rate_limit.{direction}_burst_limit {value} is too large")]
    BurstTooLarge { direction: &'static str, value: u64 },
}

/// Validate a parsed configuration, collecting every problem found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    check_upstream(&mut errors, "upstream.address", &config.upstream.address);
    if config.observability.metrics_enabled {
        check_address(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    let level = config.observability.log_level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ValidationError::UnknownLogLevel(
            config.observability.log_level.clone(),
        ));
    }

    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("timeouts.connect_secs"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("timeouts.request_secs"));
    }

    check_rate_limits(&mut errors, &config.websocket_rate_limit);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}

/// Upstreams may be host names, but must name a port.
fn check_upstream(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    let valid = Authority::from_str(value).is_ok_and(|authority| authority.port_u16().is_some());
    if !valid {
        errors.push(ValidationError::InvalidUpstream {
            field,
            value: value.to_string(),
        });
    }
}

fn check_rate_limits(errors: &mut Vec<ValidationError>, limits: &WebSocketRateLimitConfig) {
    let directions = [
        ("up", limits.up_byte_rate, limits.up_burst_limit),
        ("down", limits.down_byte_rate, limits.down_burst_limit),
    ];

    for (direction, rate, burst) in directions {
        if burst == 0 {
            continue;
        }
        if rate == 0 {
            errors.push(ValidationError::ZeroRateWithBurst { direction });
        }
        if usize::try_from(burst).is_err() {
            errors.push(ValidationError::BurstTooLarge {
                direction,
                value: burst,
            });
        }
    }
}
