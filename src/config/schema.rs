//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the WAS
//! engine and its application host binary. All types derive Serde traits
//! for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct WasConfig {
    /// Buffer and queue sizes.
    pub buffers: BufferConfig,

    /// Idle timeouts per channel.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Built-in application served by the binary.
    pub application: ApplicationConfig,
}

/// Buffer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Fixed size of each control buffer. The largest packet payload is
    /// four bytes less.
    pub control_capacity: usize,

    /// Largest single read from a data descriptor.
    pub data_chunk_size: usize,

    /// Chunks queued between the engine and a body consumer.
    pub body_queue_depth: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            control_capacity: 8192,
            data_chunk_size: 16384,
            body_queue_depth: 8,
        }
    }
}

/// Timeout configuration. Each timer only runs while its channel is
/// waiting for the peer.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Control channel idle timeout in seconds.
    pub control_secs: u64,

    /// Data receive timeout in seconds.
    pub input_secs: u64,

    /// Data send timeout in seconds.
    pub output_secs: u64,
}

impl TimeoutConfig {
    pub fn control(&self) -> Duration {
        Duration::from_secs(self.control_secs)
    }

    pub fn input(&self) -> Duration {
        Duration::from_secs(self.input_secs)
    }

    pub fn output(&self) -> Duration {
        Duration::from_secs(self.output_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            control_secs: 120,
            input_secs: 120,
            output_secs: 120,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// "pretty" or "json".
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// "mirror", "hello", or "null".
    pub handler: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            handler: "mirror".to_string(),
        }
    }
}
