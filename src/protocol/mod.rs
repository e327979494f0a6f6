//! WAS wire format.
//!
//! # Data Flow
//! ```text
//! control descriptor bytes
//!     → packet.rs (4-byte header + payload framing)
//!     → command.rs (command code → tagged enum)
//!     → payload helpers (u64 lengths, status, key=value pairs)
//!     → was::client / was::server state machines
//! ```
//!
//! # Wire Layout
//! ```text
//! +----------------+----------------+---------------------+
//! | length: u16 LE | command: u16 LE| payload (length B)  |
//! +----------------+----------------+---------------------+
//! ```
//! No padding. Integers inside payloads are little-endian as well.

pub mod command;
pub mod method;
pub mod packet;

pub use command::Command;
pub use packet::{Packet, PacketHeader, HEADER_SIZE};
