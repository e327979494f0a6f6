//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Descriptor operation
//!     → timeouts.rs (data reads/writes bounded; control idle timer)
//!     → On expiry: WasError::Timeout, connection destroyed
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every wait on the peer has a deadline
//! - Waiting on the local application is never timed out here
//! - A timed-out connection is never reused

pub mod timeouts;
