//! Body receiver: reads the peer's data descriptor into an [`IncomingBody`].
//!
//! The byte stream carries no framing, so its end is only known through
//! `LENGTH` or `PREMATURE` packets on the control channel. Those may arrive
//! before, during, or after the bytes themselves.
//!
//! [`IncomingBody`]: crate::was::body::IncomingBody

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::WasError;
use crate::resilience::timeouts::with_timeout;
use crate::was::body::BodySender;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    /// Bytes read from the descriptor.
    Data(usize),
    /// The consumer dropped its body; switch to discarding.
    SinkClosed,
}

#[derive(Debug)]
pub struct InputChannel {
    received: u64,
    guaranteed: u64,
    length: u64,
    known_length: bool,
    premature: bool,
    /// `None` while discarding.
    sink: Option<BodySender>,
    buffer: BytesMut,
    chunk_size: usize,
}

impl InputChannel {
    pub fn new(sink: BodySender, chunk_size: usize) -> Self {
        Self {
            received: 0,
            guaranteed: 0,
            length: 0,
            known_length: false,
            premature: false,
            sink: Some(sink),
            buffer: BytesMut::new(),
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn known_length(&self) -> Option<u64> {
        self.known_length.then_some(self.length)
    }

    pub fn is_premature(&self) -> bool {
        self.premature
    }

    pub fn is_discarding(&self) -> bool {
        self.sink.is_none()
    }

    /// The consumer dropped its [`IncomingBody`](crate::was::IncomingBody).
    pub fn is_unwanted(&self) -> bool {
        self.sink.as_ref().is_some_and(BodySender::is_closed)
    }

    /// Apply a `LENGTH` packet.
    pub fn set_length(&mut self, length: u64) -> Result<(), WasError> {
        if self.known_length {
            if length != self.length {
                return Err(WasError::protocol("wrong input length announced"));
            }
            return Ok(());
        }

        if length < self.received {
            return Err(WasError::protocol("announced length is too small"));
        }

        self.length = length;
        self.known_length = true;
        self.premature = false;
        if let Some(sink) = &self.sink {
            sink.set_length(length);
        }
        Ok(())
    }

    /// Apply a `PREMATURE` packet: the body ends after `length` bytes.
    pub fn set_premature(&mut self, length: u64) -> Result<(), WasError> {
        if length < self.guaranteed || length < self.received {
            return Err(WasError::protocol("premature length too small"));
        }
        if self.known_length && length > self.length {
            return Err(WasError::protocol("premature length too large"));
        }

        self.guaranteed = length;
        self.length = length;
        self.known_length = true;
        self.premature = true;
        Ok(())
    }

    /// All announced bytes have been read.
    pub fn is_eof(&self) -> bool {
        self.known_length && self.received == self.length
    }

    /// Stop delivering to the consumer; keep reading to resynchronise.
    pub fn discard(&mut self) {
        self.sink = None;
    }

    /// Read once. Waits for queue room first, so a slow consumer throttles
    /// the peer instead of growing a buffer. Only the read itself is
    /// subject to `timeout`.
    pub async fn receive<R>(&mut self, fd: &mut R, timeout: Duration) -> Result<InputEvent, WasError>
    where
        R: AsyncRead + Unpin,
    {
        let mut max = self.chunk_size;
        if self.known_length {
            let remaining = self.length.saturating_sub(self.received);
            max = max.min(usize::try_from(remaining).unwrap_or(usize::MAX));
        }
        if max == 0 {
            return Ok(InputEvent::Data(0));
        }

        let Some(sink) = &self.sink else {
            let n = read_limited(&mut self.buffer, fd, max, timeout).await?;
            self.buffer.clear();
            self.received += n as u64;
            return Ok(InputEvent::Data(n));
        };

        let Some(permit) = sink.reserve().await else {
            return Ok(InputEvent::SinkClosed);
        };

        let n = tokio::select! {
            _ = sink.closed() => return Ok(InputEvent::SinkClosed),
            n = read_limited(&mut self.buffer, fd, max, timeout) => n?,
        };

        self.received += n as u64;
        permit.send(self.buffer.split().freeze());
        Ok(InputEvent::Data(n))
    }

    /// Hand the outcome to the consumer once [`is_eof`](Self::is_eof).
    /// Returns true if the body ended prematurely.
    pub fn finish(self) -> bool {
        let premature = self.premature;
        if let Some(sink) = self.sink {
            if premature {
                sink.fail(WasError::Premature);
            } else {
                sink.finish();
            }
        }
        premature
    }

    /// Fail the consumer now but keep reading in discard mode, so the
    /// connection can still resynchronise.
    pub fn fail_consumer(&mut self, err: WasError) {
        if let Some(sink) = self.sink.take() {
            sink.fail(err);
        }
    }

    /// Tear down with an error visible to the consumer.
    pub fn abort(self, err: WasError) {
        if let Some(sink) = self.sink {
            sink.fail(err);
        }
    }
}

async fn read_limited<R>(
    buffer: &mut BytesMut,
    fd: &mut R,
    max: usize,
    timeout: Duration,
) -> Result<usize, WasError>
where
    R: AsyncRead + Unpin,
{
    buffer.reserve(max);
    let mut limited = bytes::BufMut::limit(&mut *buffer, max);
    let n = with_timeout(timeout, "data receive", fd.read_buf(&mut limited))
        .await?
        .map_err(|e| WasError::io("read error on WAS data connection", e))?;
    if n == 0 {
        return Err(WasError::Closed("data connection"));
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::was::body::{channel, IncomingBody};
    use tokio::io::AsyncWriteExt;

    const T: Duration = Duration::from_secs(5);

    fn input() -> (InputChannel, IncomingBody) {
        let (tx, body) = channel(8);
        (InputChannel::new(tx, 1024), body)
    }

    #[test]
    fn set_length_twice() {
        let (mut input, _body) = input();
        input.set_length(10).unwrap();
        input.set_length(10).unwrap();
        let err = input.set_length(11).unwrap_err();
        assert_eq!(err.to_string(), "WAS protocol error: wrong input length announced");
    }

    #[test]
    fn premature_larger_than_length_is_rejected() {
        let (mut input, _body) = input();
        input.set_length(1024).unwrap();
        let err = input.set_premature(4096).unwrap_err();
        assert_eq!(err.to_string(), "WAS protocol error: premature length too large");
    }

    #[test]
    fn premature_after_length_may_shrink() {
        let (mut input, _body) = input();
        input.set_length(1024).unwrap();
        input.set_premature(100).unwrap();
        assert_eq!(input.known_length(), Some(100));
        assert!(input.is_premature());
    }

    #[tokio::test]
    async fn premature_below_received_is_rejected() {
        let (mut input, _body) = input();
        let (mut peer, mut fd) = tokio::io::duplex(64);
        peer.write_all(b"12345").await.unwrap();
        assert_eq!(input.receive(&mut fd, T).await.unwrap(), InputEvent::Data(5));

        let err = input.set_premature(3).unwrap_err();
        assert_eq!(err.to_string(), "WAS protocol error: premature length too small");
        input.set_premature(5).unwrap();
        assert!(input.is_eof());
    }

    #[tokio::test]
    async fn length_after_data() {
        let (mut input, body) = input();
        let (mut peer, mut fd) = tokio::io::duplex(64);
        peer.write_all(b"foobar").await.unwrap();
        input.receive(&mut fd, T).await.unwrap();
        assert!(!input.is_eof());

        input.set_length(6).unwrap();
        assert!(input.is_eof());
        assert!(!input.finish());
        assert_eq!(body.collect().await.unwrap(), "foobar");
    }

    #[tokio::test]
    async fn reads_are_capped_at_the_known_length() {
        let (mut input, _body) = input();
        let (mut peer, mut fd) = tokio::io::duplex(64);
        input.set_length(3).unwrap();
        peer.write_all(b"abcdef").await.unwrap();
        assert_eq!(input.receive(&mut fd, T).await.unwrap(), InputEvent::Data(3));
        assert!(input.is_eof());
    }

    #[tokio::test]
    async fn premature_end_is_a_body_error() {
        let (mut input, body) = input();
        let (mut peer, mut fd) = tokio::io::duplex(64);
        input.set_length(100).unwrap();
        peer.write_all(b"abcd").await.unwrap();
        input.receive(&mut fd, T).await.unwrap();
        input.set_premature(4).unwrap();
        assert!(input.is_eof());
        assert!(input.finish());
        assert!(matches!(body.collect().await, Err(WasError::Premature)));
    }

    #[tokio::test]
    async fn early_close_is_fatal() {
        let (mut input, _body) = input();
        let (peer, mut fd) = tokio::io::duplex(64);
        drop(peer);
        let err = input.receive(&mut fd, T).await.unwrap_err();
        assert_eq!(err.to_string(), "peer closed the data connection");
    }

    #[tokio::test]
    async fn dropped_consumer_is_noticed() {
        let (mut input, body) = input();
        let (_peer, mut fd) = tokio::io::duplex(64);
        drop(body);
        assert_eq!(input.receive(&mut fd, T).await.unwrap(), InputEvent::SinkClosed);

        input.discard();
        assert!(input.is_discarding());
    }

    #[tokio::test]
    async fn discard_mode_still_counts() {
        let (mut input, body) = input();
        let (mut peer, mut fd) = tokio::io::duplex(64);
        drop(body);
        input.discard();
        input.set_length(4).unwrap();
        peer.write_all(b"wxyz").await.unwrap();
        assert_eq!(input.receive(&mut fd, T).await.unwrap(), InputEvent::Data(4));
        assert!(input.is_eof());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_peer_times_out() {
        let (mut input, _body) = input();
        let (_peer, mut fd) = tokio::io::duplex(64);
        let err = input.receive(&mut fd, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, WasError::Timeout("data receive")));
    }
}
