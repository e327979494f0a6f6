//! The WAS protocol engine.
//!
//! # Data Flow
//! ```text
//! control.rs  (packet codec, bulk mode, fixed buffers)
//! output.rs   (local BodySource → peer data descriptor, LENGTH/PREMATURE)
//! input.rs    (peer data descriptor → IncomingBody, length reconciliation)
//!     ↓
//! channels.rs (one select loop over all three descriptors)
//!     ↓
//! client.rs / server.rs (request/response state machines, lease release)
//! ```
//!
//! # Design Decisions
//! - Cooperative and task-local: the server runs inside the caller's
//!   task, the client spawns one driver task per request
//! - Body lengths are carried by `LENGTH`/`PREMATURE` byte counts, never
//!   by closing a descriptor
//! - A `STOP`/`PREMATURE` exchange resynchronises a connection without
//!   tearing it down

pub mod body;
pub(crate) mod channels;
pub mod client;
pub mod control;
pub mod input;
pub mod message;
pub mod output;
pub mod server;

pub use body::{BodySource, Full, IncomingBody, OutgoingBody, StreamBody};
pub use client::WasClient;
pub use message::{Request, RequestHandler, Response};
pub use server::WasServer;
