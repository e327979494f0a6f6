//! Descriptor layer.
//!
//! # Data Flow
//! ```text
//! Pool / parent process
//!     → socket.rs (three descriptors: control, input, output)
//!     → connection.rs (identity for tracing)
//!     → Hand off to the WAS client or server driver
//! ```
//!
//! # Design Decisions
//! - Generic over tokio's `AsyncRead`/`AsyncWrite` so Unix sockets, pipes,
//!   and in-memory streams all work
//! - One connection owns its descriptors exclusively; they move back to
//!   the lease when the cycle ends

pub mod connection;
pub mod socket;

pub use connection::ConnectionId;
pub use socket::{PipeSocket, WasSocket};
