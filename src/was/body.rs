//! Body streams on both sides of the engine.
//!
//! Outgoing bodies are anything implementing [`BodySource`]. Incoming bodies
//! are delivered through [`IncomingBody`], the receiving end of a bounded
//! queue fed by the input channel. The queue depth is the backpressure
//! window: when it is full the engine stops reading the data descriptor.

use std::fmt;
use std::future::poll_fn;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_util::Stream;
use tokio::sync::mpsc;

use crate::error::WasError;

/// A non-blocking byte source for an outgoing body.
///
/// Backpressure is implicit: the engine only polls for the next chunk when
/// the previous one has been written.
pub trait BodySource: Send + 'static {
    /// Bytes left to produce, if known.
    fn remaining(&self) -> Option<u64>;

    /// Next chunk, `None` at the end. Empty chunks are allowed and skipped.
    fn poll_chunk(&mut self, cx: &mut Context<'_>) -> Poll<Option<io::Result<Bytes>>>;
}

/// An in-memory body of known length.
#[derive(Debug, Clone, Default)]
pub struct Full {
    data: Option<Bytes>,
}

impl Full {
    pub fn new(data: impl Into<Bytes>) -> Self {
        let data: Bytes = data.into();
        Self {
            data: (!data.is_empty()).then_some(data),
        }
    }
}

impl BodySource for Full {
    fn remaining(&self) -> Option<u64> {
        Some(self.data.as_ref().map_or(0, |d| d.len() as u64))
    }

    fn poll_chunk(&mut self, _cx: &mut Context<'_>) -> Poll<Option<io::Result<Bytes>>> {
        Poll::Ready(self.data.take().map(Ok))
    }
}

/// A body produced by a stream. Its length is only known at the end.
pub struct StreamBody<S> {
    stream: S,
}

impl<S> StreamBody<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }
}

impl<S> BodySource for StreamBody<S>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin + Send + 'static,
{
    fn remaining(&self) -> Option<u64> {
        None
    }

    fn poll_chunk(&mut self, cx: &mut Context<'_>) -> Poll<Option<io::Result<Bytes>>> {
        Pin::new(&mut self.stream).poll_next(cx)
    }
}

/// Type-erased outgoing body.
pub struct OutgoingBody(Box<dyn BodySource>);

impl OutgoingBody {
    pub fn new(source: impl BodySource) -> Self {
        Self(Box::new(source))
    }

    pub fn full(data: impl Into<Bytes>) -> Self {
        Self::new(Full::new(data))
    }

    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Unpin + Send + 'static,
    {
        Self::new(StreamBody::new(stream))
    }

    pub fn remaining(&self) -> Option<u64> {
        self.0.remaining()
    }

    pub(crate) fn into_source(self) -> Box<dyn BodySource> {
        self.0
    }

    pub async fn next_chunk(&mut self) -> Option<io::Result<Bytes>> {
        poll_fn(|cx| self.0.poll_chunk(cx)).await
    }
}

impl fmt::Debug for OutgoingBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutgoingBody")
            .field("remaining", &self.remaining())
            .finish()
    }
}

impl From<Bytes> for OutgoingBody {
    fn from(data: Bytes) -> Self {
        Self::full(data)
    }
}

impl From<Vec<u8>> for OutgoingBody {
    fn from(data: Vec<u8>) -> Self {
        Self::full(data)
    }
}

impl From<String> for OutgoingBody {
    fn from(data: String) -> Self {
        Self::full(data)
    }
}

impl From<&'static str> for OutgoingBody {
    fn from(data: &'static str) -> Self {
        Self::full(data)
    }
}

impl From<IncomingBody> for OutgoingBody {
    fn from(body: IncomingBody) -> Self {
        Self::new(body)
    }
}

#[derive(Debug, Default)]
struct BodyState {
    length: Option<u64>,
    outcome: Option<Result<(), WasError>>,
}

type Shared = Arc<Mutex<BodyState>>;

fn lock(state: &Shared) -> MutexGuard<'_, BodyState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Engine end of an incoming body.
///
/// Dropping it without calling [`finish`](Self::finish) or
/// [`fail`](Self::fail) ends the body with an error, so a consumer never
/// mistakes a torn-down connection for a complete body.
#[derive(Debug)]
pub struct BodySender {
    tx: mpsc::Sender<Bytes>,
    state: Shared,
}

/// Create a connected sender/body pair with room for `depth` chunks.
pub fn channel(depth: usize) -> (BodySender, IncomingBody) {
    let (tx, rx) = mpsc::channel(depth.max(1));
    let state = Shared::default();
    (
        BodySender {
            tx,
            state: Arc::clone(&state),
        },
        IncomingBody {
            rx,
            state,
            consumed: 0,
            finished: false,
        },
    )
}

impl BodySender {
    pub fn set_length(&self, length: u64) {
        lock(&self.state).length = Some(length);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the consumer dropped its end.
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    /// Wait for queue room. `None` means the consumer went away.
    pub async fn reserve(&self) -> Option<mpsc::Permit<'_, Bytes>> {
        self.tx.reserve().await.ok()
    }

    /// Clean end of body.
    pub fn finish(self) {
        self.complete(Ok(()));
    }

    pub fn fail(self, err: WasError) {
        self.complete(Err(err));
    }

    fn complete(&self, outcome: Result<(), WasError>) {
        let mut state = lock(&self.state);
        if state.outcome.is_none() {
            state.outcome = Some(outcome);
        }
    }
}

impl Drop for BodySender {
    fn drop(&mut self) {
        self.complete(Err(WasError::Closed("data connection")));
    }
}

/// A body received from the peer.
///
/// Yields chunks in order, then either a clean end or exactly one error.
/// Dropping it before the end tells the engine the rest is unwanted.
#[derive(Debug)]
pub struct IncomingBody {
    rx: mpsc::Receiver<Bytes>,
    state: Shared,
    consumed: u64,
    finished: bool,
}

impl IncomingBody {
    /// Bytes still to come, once the peer announced the length.
    pub fn remaining(&self) -> Option<u64> {
        lock(&self.state)
            .length
            .map(|length| length.saturating_sub(self.consumed))
    }

    pub fn is_end(&self) -> bool {
        self.finished
    }

    pub fn poll_next_chunk(
        &mut self,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Bytes, WasError>>> {
        if self.finished {
            return Poll::Ready(None);
        }

        match self.rx.poll_recv(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(chunk)) => {
                self.consumed += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(None) => {
                self.finished = true;
                match lock(&self.state).outcome.take() {
                    Some(Ok(())) => Poll::Ready(None),
                    Some(Err(err)) => Poll::Ready(Some(Err(err))),
                    None => Poll::Ready(Some(Err(WasError::Closed("data connection")))),
                }
            }
        }
    }

    /// Next chunk; `None` after a clean end.
    pub async fn chunk(&mut self) -> Option<Result<Bytes, WasError>> {
        poll_fn(|cx| self.poll_next_chunk(cx)).await
    }

    /// Read the whole body into memory.
    pub async fn collect(mut self) -> Result<Bytes, WasError> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.chunk().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

impl Stream for IncomingBody {
    type Item = Result<Bytes, WasError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().poll_next_chunk(cx)
    }
}

impl BodySource for IncomingBody {
    fn remaining(&self) -> Option<u64> {
        IncomingBody::remaining(self)
    }

    fn poll_chunk(&mut self, cx: &mut Context<'_>) -> Poll<Option<io::Result<Bytes>>> {
        self.poll_next_chunk(cx)
            .map(|item| item.map(|result| result.map_err(io::Error::from)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{stream, StreamExt};

    #[tokio::test]
    async fn full_body_yields_once() {
        let mut body = OutgoingBody::from("foobar");
        assert_eq!(body.remaining(), Some(6));
        assert_eq!(body.next_chunk().await.unwrap().unwrap(), "foobar");
        assert!(body.next_chunk().await.is_none());
    }

    #[tokio::test]
    async fn empty_full_body_has_zero_length() {
        let mut body = OutgoingBody::full(Bytes::new());
        assert_eq!(body.remaining(), Some(0));
        assert!(body.next_chunk().await.is_none());
    }

    #[tokio::test]
    async fn stream_body_has_unknown_length() {
        let chunks = stream::iter(vec![Ok(Bytes::from("a")), Ok(Bytes::from("b"))]);
        let mut body = OutgoingBody::stream(chunks);
        assert_eq!(body.remaining(), None);
        assert_eq!(body.next_chunk().await.unwrap().unwrap(), "a");
        assert_eq!(body.next_chunk().await.unwrap().unwrap(), "b");
        assert!(body.next_chunk().await.is_none());
    }

    #[tokio::test]
    async fn incoming_body_clean_end() {
        let (tx, body) = channel(4);
        tx.set_length(6);
        assert_eq!(body.remaining(), Some(6));

        tx.reserve().await.unwrap().send(Bytes::from("foo"));
        tx.reserve().await.unwrap().send(Bytes::from("bar"));
        tx.finish();

        assert_eq!(body.collect().await.unwrap(), "foobar");
    }

    #[tokio::test]
    async fn incoming_body_reports_exactly_one_error() {
        let (tx, mut body) = channel(4);
        tx.reserve().await.unwrap().send(Bytes::from("foo"));
        tx.fail(WasError::Premature);

        assert_eq!(body.chunk().await.unwrap().unwrap(), "foo");
        assert!(matches!(body.chunk().await, Some(Err(WasError::Premature))));
        assert!(body.chunk().await.is_none());
        assert!(body.is_end());
    }

    #[tokio::test]
    async fn dropped_sender_is_not_a_clean_end() {
        let (tx, body) = channel(4);
        drop(tx);
        let err = body.collect().await.unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn remaining_tracks_consumption() {
        let (tx, mut body) = channel(4);
        tx.set_length(10);
        tx.reserve().await.unwrap().send(Bytes::from("1234"));
        body.next().await.unwrap().unwrap();
        assert_eq!(body.remaining(), Some(6));
    }

    #[tokio::test]
    async fn dropping_the_body_closes_the_sender() {
        let (tx, body) = channel(1);
        assert!(!tx.is_closed());
        drop(body);
        tx.closed().await;
        assert!(tx.reserve().await.is_none());
    }
}
