//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Keep the crash exit code away from codes the runtime already uses
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: HostConfig → Result<(), Vec<ValidationError>>

use std::net::SocketAddr;

use crate::config::schema::HostConfig;

/// Exit code Rust uses when the main thread panics.
pub const RUST_PANIC_EXIT_CODE: i32 = 101;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid {field} `{value}`")]
    InvalidAddress { field: &'static str, value: String },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("crash exit code {0} collides with a reserved exit code")]
    ReservedExitCode(i32),
    #[error("log level must not be empty")]
    EmptyLogLevel,
}

/// Whether `code` is unsafe to use as the crash exit code.
pub fn is_reserved_exit_code(code: i32) -> bool {
    !(2..=127).contains(&code) || code == RUST_PANIC_EXIT_CODE
}

/// Validate a parsed configuration, collecting every error.
pub fn validate_config(config: &HostConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::Zero("timeouts.request_secs"));
    }

    if config.shutdown.drain_timeout_secs == 0 {
        errors.push(ValidationError::Zero("shutdown.drain_timeout_secs"));
    }

    if is_reserved_exit_code(config.crash.exit_code) {
        errors.push(ValidationError::ReservedExitCode(config.crash.exit_code));
    }

    if config.crash.handler_timeout_ms == Some(0) {
        errors.push(ValidationError::Zero("crash.handler_timeout_ms"));
    }

    if config.observability.log_level.trim().is_empty() {
        errors.push(ValidationError::EmptyLogLevel);
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
