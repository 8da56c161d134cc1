//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Detect conflicting listeners
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::ProxyConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: invalid socket address '{value}'")]
    InvalidAddress { field: &'static str, value: String },

    #[error("gateway and control listeners both bind {0}")]
    ListenerConflict(String),

    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),

    #[error("control.subprotocol must not be empty")]
    EmptySubprotocol,

    #[error("control.sysadmin_agent_id must not be empty")]
    EmptySysadminId,

    #[error("tls.{0} must not be empty")]
    EmptyTlsPath(&'static str),
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let gateway = check_address("gateway.bind_address", &config.gateway.bind_address, &mut errors);
    let control = check_address("control.bind_address", &config.control.bind_address, &mut errors);
    if let (Some(g), Some(c)) = (gateway, control) {
        if g == c && g.port() != 0 {
            errors.push(ValidationError::ListenerConflict(g.to_string()));
        }
    }

    if config.observability.metrics_enabled {
        check_address(
            "observability.metrics_address",
            &config.observability.metrics_address,
            &mut errors,
        );
    }

    if config.control.subprotocol.trim().is_empty() {
        errors.push(ValidationError::EmptySubprotocol);
    }
    if config.control.sysadmin_agent_id.trim().is_empty() {
        errors.push(ValidationError::EmptySysadminId);
    }
    if config.control.keepalive_interval_secs == 0 {
        errors.push(ValidationError::ZeroValue("control.keepalive_interval_secs"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::ZeroValue("timeouts.request_secs"));
    }
    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::ZeroValue("timeouts.connect_secs"));
    }

    if let Some(tls) = &config.tls {
        if tls.cert_path.as_os_str().is_empty() {
            errors.push(ValidationError::EmptyTlsPath("cert_path"));
        }
        if tls.key_path.as_os_str().is_empty() {
            errors.push(ValidationError::EmptyTlsPath("key_path"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(
    field: &'static str,
    value: &str,
    errors: &mut Vec<ValidationError>,
) -> Option<SocketAddr> {
    match value.parse::<SocketAddr>() {
        Ok(addr) => Some(addr),
        Err(_) => {
            errors.push(ValidationError::InvalidAddress {
                field,
                value: value.to_string(),
            });
            None
        }
    }
}
