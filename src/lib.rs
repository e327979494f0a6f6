//! Web Application Socket (WAS) protocol engine.
//!
//! A WAS connection is three descriptors: a control socket carrying framed
//! command packets, and one raw data stream per body direction. This crate
//! implements both ends of the protocol on tokio, plus the lease/stock
//! plumbing that decides whether a connection may be reused.

pub mod app;
pub mod config;
pub mod error;
pub mod lease;
pub mod net;
pub mod observability;
pub mod protocol;
pub mod resilience;
pub mod was;

pub use config::WasConfig;
pub use error::WasError;
pub use lease::{Lease, LeaseGuard, Release, WasStock};
pub use net::{PipeSocket, WasSocket};
pub use was::{IncomingBody, OutgoingBody, Request, RequestHandler, Response, WasClient, WasServer};
