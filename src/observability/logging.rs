//! Structured logging.
//!
//! # Responsibilities
//! - Initialize logging subsystem
//! - Configure log level from config, overridable by `RUST_LOG`
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - JSON format for production, pretty format for development
//! - Always writes to stderr: a WAS application's stdout is its response
//!   body

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::ObservabilityConfig;

/// Filter from `RUST_LOG` if set, else from the configured level.
pub fn env_filter(config: &ObservabilityConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init(config: &ObservabilityConfig) -> Result<(), tracing_subscriber::util::TryInitError> {
    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = if config.log_format == "json" {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter(config))
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_level_is_used() {
        let config = ObservabilityConfig {
            log_level: "was_proxy=trace".into(),
            ..Default::default()
        };
        if std::env::var_os("RUST_LOG").is_none() {
            assert_eq!(env_filter(&config).to_string(), "was_proxy=trace");
        }
    }
}
