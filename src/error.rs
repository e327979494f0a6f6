//! Error taxonomy for the WAS engine.
//!
//! # Categories
//! - Transport: a descriptor was closed, or recv/send failed. Always fatal.
//! - Protocol: malformed packet, out-of-sequence command, length mismatch.
//!   Always fatal.
//! - Premature: the peer ended a body early with `PREMATURE`. Recoverable,
//!   the connection may be reused once the byte counts line up.
//! - Timeout: an armed idle timer expired. Treated like a transport error.
//!
//! Fatal errors force `reuse = false` on the lease.

use std::borrow::Cow;
use std::io;

use thiserror::Error;

/// Everything that can go wrong on a WAS connection.
#[derive(Debug, Error)]
pub enum WasError {
    /// The peer violated the protocol.
    #[error("WAS protocol error: {0}")]
    Protocol(Cow<'static, str>),

    /// A read or write on one of the three descriptors failed.
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    /// The peer closed a descriptor while it was still needed.
    #[error("peer closed the {0}")]
    Closed(&'static str),

    /// An idle timer expired.
    #[error("{0} timeout")]
    Timeout(&'static str),

    /// The body ended with a `PREMATURE` packet before its implied length.
    #[error("premature end of WAS body")]
    Premature,

    /// The local body source failed while it was being sent.
    #[error("body source failed: {0}")]
    Source(#[source] io::Error),

    /// The caller gave up on the request before the response arrived.
    #[error("WAS request cancelled")]
    Cancelled,
}

impl WasError {
    pub fn protocol(msg: impl Into<Cow<'static, str>>) -> Self {
        WasError::Protocol(msg.into())
    }

    pub fn io(context: &'static str, source: io::Error) -> Self {
        WasError::Io { context, source }
    }

    /// Descriptor-level failures, including timeouts.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            WasError::Io { .. } | WasError::Closed(_) | WasError::Timeout(_)
        )
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, WasError::Protocol(_))
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            WasError::Protocol(_) => "protocol",
            WasError::Io { .. } => "io",
            WasError::Closed(_) => "closed",
            WasError::Timeout(_) => "timeout",
            WasError::Premature => "premature",
            WasError::Source(_) => "source",
            WasError::Cancelled => "cancelled",
        }
    }
}

impl From<WasError> for io::Error {
    fn from(err: WasError) -> Self {
        match err {
            WasError::Io { source, .. } | WasError::Source(source) => source,
            WasError::Timeout(_) => io::Error::new(io::ErrorKind::TimedOut, err),
            WasError::Closed(_) => io::Error::new(io::ErrorKind::UnexpectedEof, err),
            other => io::Error::other(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(WasError::Timeout("control").is_transport());
        assert!(WasError::Closed("data connection").is_transport());
        assert!(WasError::protocol("x").is_protocol());
        assert!(!WasError::Premature.is_transport());
        assert_eq!(WasError::Premature.kind(), "premature");
    }

    #[test]
    fn display_messages() {
        let err = WasError::protocol("premature length too large");
        assert_eq!(err.to_string(), "WAS protocol error: premature length too large");
        assert_eq!(
            WasError::Timeout("data receive").to_string(),
            "data receive timeout"
        );
    }
}
