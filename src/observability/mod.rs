//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! WAS client and server drivers produce:
//!     → logging.rs (structured log events, spans with connection and
//!       request IDs)
//!     → metrics.rs (counters)
//!
//! Consumers:
//!     → Log aggregation (stderr)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Connection ID and request ID are span fields, not message text
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
