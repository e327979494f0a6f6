//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (capacities, timeouts > 0)
//! - Check names that select behaviour (log format, handler)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: WasConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::app::BuiltinHandler;
use crate::config::schema::WasConfig;
use crate::protocol::HEADER_SIZE;

/// Smallest control buffer that still fits a sensible packet.
pub const MIN_CONTROL_CAPACITY: usize = 64;

/// A header plus the largest payload a u16 length can describe.
pub const MAX_CONTROL_CAPACITY: usize = HEADER_SIZE + u16::MAX as usize;

/// One rejected setting.
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

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &WasConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let capacity = config.buffers.control_capacity;
    if !(MIN_CONTROL_CAPACITY..=MAX_CONTROL_CAPACITY).contains(&capacity) {
        errors.push(ValidationError::new(
            "buffers.control_capacity",
            format!("must be within {MIN_CONTROL_CAPACITY}..={MAX_CONTROL_CAPACITY}, got {capacity}"),
        ));
    }
    if config.buffers.data_chunk_size == 0 {
        errors.push(ValidationError::new("buffers.data_chunk_size", "must be greater than 0"));
    }
    if config.buffers.body_queue_depth == 0 {
        errors.push(ValidationError::new("buffers.body_queue_depth", "must be greater than 0"));
    }

    for (field, secs) in [
        ("timeouts.control_secs", config.timeouts.control_secs),
        ("timeouts.input_secs", config.timeouts.input_secs),
        ("timeouts.output_secs", config.timeouts.output_secs),
    ] {
        if secs == 0 {
            errors.push(ValidationError::new(field, "must be greater than 0"));
        }
    }

    let observability = &config.observability;
    if !matches!(observability.log_format.as_str(), "pretty" | "json") {
        errors.push(ValidationError::new(
            "observability.log_format",
            format!("unknown format {:?}, expected \"pretty\" or \"json\"", observability.log_format),
        ));
    }
    if observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("not a socket address: {:?}", observability.metrics_address),
        ));
    }

    if BuiltinHandler::from_name(&config.application.handler).is_none() {
        errors.push(ValidationError::new(
            "application.handler",
            format!("unknown handler {:?}", config.application.handler),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(validate_config(&WasConfig::default()), Ok(()));
    }

    #[test]
    fn collects_every_error() {
        let mut config = WasConfig::default();
        config.buffers.control_capacity = 16;
        config.buffers.body_queue_depth = 0;
        config.timeouts.input_secs = 0;
        config.observability.log_format = "xml".into();
        config.application.handler = "php".into();

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                "buffers.control_capacity",
                "buffers.body_queue_depth",
                "timeouts.input_secs",
                "observability.log_format",
                "application.handler",
            ]
        );
    }

    #[test]
    fn control_capacity_bounds() {
        let mut config = WasConfig::default();
        config.buffers.control_capacity = MAX_CONTROL_CAPACITY;
        assert!(validate_config(&config).is_ok());
        config.buffers.control_capacity = MAX_CONTROL_CAPACITY + 1;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn metrics_address_must_parse() {
        let mut config = WasConfig::default();
        config.observability.metrics_address = "localhost".into();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].to_string(), "observability.metrics_address: not a socket address: \"localhost\"");
    }
}
