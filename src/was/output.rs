//! Body sender: streams a [`BodySource`] into the peer's data descriptor.
//!
//! The length is announced as early as the source can tell it. A source of
//! unknown length gets exactly one deferred `LENGTH` once it ends.

use std::future::poll_fn;
use std::io;
use std::time::Duration;

use bytes::{Buf, Bytes};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::WasError;
use crate::resilience::timeouts::with_timeout;
use crate::was::body::BodySource;

/// What one transfer step achieved.
#[derive(Debug)]
pub enum OutputEvent {
    /// Bytes written to the descriptor.
    Progress(usize),
    /// The source ended and everything was written.
    Eof,
    /// The source failed; `sent` bytes made it to the peer.
    SourceError(WasError),
}

pub struct OutputChannel {
    source: Box<dyn BodySource>,
    pending: Bytes,
    sent: u64,
    length: Option<u64>,
    announced: bool,
    source_done: bool,
}

impl OutputChannel {
    pub fn new(source: Box<dyn BodySource>) -> Self {
        Self {
            source,
            pending: Bytes::new(),
            sent: 0,
            length: None,
            announced: false,
            source_done: false,
        }
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Total length, if it has become known and was not announced yet.
    /// The caller sends it as `LENGTH`.
    pub fn check_length(&mut self) -> Option<u64> {
        if self.announced {
            return None;
        }
        let remaining = self.source.remaining()?;
        let total = self.sent + self.pending.len() as u64 + remaining;
        self.length = Some(total);
        self.announced = true;
        Some(total)
    }

    /// Everything the peer was promised has been written.
    pub fn is_complete(&self) -> bool {
        if !self.pending.is_empty() {
            return false;
        }
        match self.length {
            Some(length) => self.sent == length,
            None => self.source_done,
        }
    }

    /// The deferred final length for a source whose size was never known.
    pub fn final_length(&mut self) -> Option<u64> {
        if self.announced {
            return None;
        }
        self.announced = true;
        self.length = Some(self.sent);
        Some(self.sent)
    }

    /// Pull from the source if needed, then write once.
    ///
    /// Only the write is subject to `timeout`; waiting on the source is
    /// the application's business.
    pub async fn transfer<W>(
        &mut self,
        fd: &mut W,
        timeout: Duration,
    ) -> Result<OutputEvent, WasError>
    where
        W: AsyncWrite + Unpin,
    {
        while self.pending.is_empty() {
            if self.is_complete() {
                return Ok(OutputEvent::Eof);
            }

            match poll_fn(|cx| self.source.poll_chunk(cx)).await {
                None => {
                    self.source_done = true;
                    if let Some(length) = self.length {
                        if self.sent != length {
                            return Ok(OutputEvent::SourceError(short_source(
                                "body source ended before the announced length",
                            )));
                        }
                    }
                    return Ok(OutputEvent::Eof);
                }
                Some(Err(err)) => return Ok(OutputEvent::SourceError(WasError::Source(err))),
                Some(Ok(chunk)) => {
                    if let Some(length) = self.length {
                        if self.sent + chunk.len() as u64 > length {
                            return Ok(OutputEvent::SourceError(short_source(
                                "body source exceeded the announced length",
                            )));
                        }
                    }
                    self.pending = chunk;
                }
            }
        }

        let n = with_timeout(timeout, "data send", fd.write(&self.pending))
            .await?
            .map_err(|e| WasError::io("write to WAS peer failed", e))?;
        if n == 0 {
            return Err(WasError::Closed("data connection"));
        }
        self.pending.advance(n);
        self.sent += n as u64;
        Ok(OutputEvent::Progress(n))
    }
}

fn short_source(msg: &'static str) -> WasError {
    WasError::Source(io::Error::new(io::ErrorKind::InvalidData, msg))
}
