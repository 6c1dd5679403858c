use std::{
    fmt, mem,
    pin::Pin,
    task::{ready, Context, Poll},
};

use bytes::Bytes;
use futures_core::Stream;
use futures_util::stream::BoxStream;
use tokio::sync::mpsc;

use crate::error::BoxError;
use crate::pool::inner::{BodyEvent, Event};

/// A request body, or the body of a response produced by a [`Remote`].
///
/// A `Body` is either a strict chunk of bytes, which can be resent if the
/// request has to be retried, or a byte stream, which cannot.
///
/// [`Remote`]: crate::Remote
pub struct Body {
    inner: Inner,
}

enum Inner {
    Reusable(Bytes),
    Streaming(BoxStream<'static, Result<Bytes, BoxError>>),
}

/// Raw pieces of a `Body`, for crate-internal conversions.
pub(crate) enum RawBody {
    Bytes(Bytes),
    Stream(BoxStream<'static, Result<Bytes, BoxError>>),
}

/// Compressed description of a body, used in log lines and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BodySummary {
    Empty,
    Strict(usize),
    Streamed,
}

// ===== impl Body =====

impl Body {
    /// Create an empty body.
    pub fn empty() -> Body {
        Body::reusable(Bytes::new())
    }

    /// Returns a reference to the internal data of the `Body`.
    ///
    /// `None` is returned if the underlying data is a stream.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.inner {
            Inner::Reusable(bytes) => Some(bytes.as_ref()),
            Inner::Streaming(..) => None,
        }
    }

    /// Wrap a futures `Stream` in a box inside `Body`.
    ///
    /// # Example
    ///
    /// ```
    /// # use hostpool::Body;
    /// let chunks: Vec<Result<_, ::std::io::Error>> = vec![Ok("hello"), Ok(" "), Ok("world")];
    ///
    /// let stream = futures_util::stream::iter(chunks);
    ///
    /// let body = Body::wrap_stream(stream);
    /// ```
    pub fn wrap_stream<S>(stream: S) -> Body
    where
        S: futures_core::TryStream + Send + 'static,
        S::Error: Into<BoxError>,
        Bytes: From<S::Ok>,
    {
        use futures_util::TryStreamExt;

        let stream = stream.map_ok(Bytes::from).map_err(Into::into);
        Body {
            inner: Inner::Streaming(Box::pin(stream)),
        }
    }

    pub(crate) fn reusable(chunk: Bytes) -> Body {
        Body {
            inner: Inner::Reusable(chunk),
        }
    }

    pub(crate) fn from_raw_stream(stream: BoxStream<'static, Result<Bytes, BoxError>>) -> Body {
        Body {
            inner: Inner::Streaming(stream),
        }
    }

    /// Clone the body if it is strict; streamed bodies are not restartable.
    pub(crate) fn try_clone(&self) -> Option<Body> {
        match self.inner {
            Inner::Reusable(ref chunk) => Some(Body::reusable(chunk.clone())),
            Inner::Streaming(..) => None,
        }
    }

    pub(crate) fn summary(&self) -> BodySummary {
        match &self.inner {
            Inner::Reusable(bytes) if bytes.is_empty() => BodySummary::Empty,
            Inner::Reusable(bytes) => BodySummary::Strict(bytes.len()),
            Inner::Streaming(..) => BodySummary::Streamed,
        }
    }

    pub(crate) fn into_raw(self) -> RawBody {
        match self.inner {
            Inner::Reusable(bytes) => RawBody::Bytes(bytes),
            Inner::Streaming(stream) => RawBody::Stream(stream),
        }
    }

    /// Turn this body into its on-the-wire form for one dispatch.
    ///
    /// Returns the wire body and whether the upload is already complete at
    /// dispatch time (true for strict bodies, which are buffered whole).
    pub(crate) fn into_outgoing(
        self,
        events: &mpsc::UnboundedSender<Event>,
        slot: usize,
        seq: u64,
    ) -> (OutgoingBody, bool) {
        match self.inner {
            Inner::Reusable(bytes) => (
                OutgoingBody {
                    inner: OutgoingInner::Strict(Some(bytes)),
                    watch: None,
                },
                true,
            ),
            Inner::Streaming(stream) => (
                OutgoingBody {
                    inner: OutgoingInner::Streaming(stream),
                    watch: Some(Watch {
                        events: events.clone(),
                        slot,
                        seq,
                        observed: false,
                        finished: false,
                    }),
                },
                false,
            ),
        }
    }
}

impl Default for Body {
    fn default() -> Body {
        Body::empty()
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Body {
        Body::reusable(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(vec: Vec<u8>) -> Body {
        Body::reusable(vec.into())
    }
}

impl From<&'static [u8]> for Body {
    fn from(slice: &'static [u8]) -> Body {
        Body::reusable(Bytes::from_static(slice))
    }
}

impl From<String> for Body {
    fn from(s: String) -> Body {
        Body::reusable(s.into())
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Body {
        Body::reusable(Bytes::from_static(s.as_bytes()))
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Body").finish()
    }
}

// ===== impl BodySummary =====

impl fmt::Display for BodySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BodySummary::Empty => f.write_str("Empty"),
            BodySummary::Strict(len) => write!(f, "Strict({len} bytes)"),
            BodySummary::Streamed => f.write_str("Streamed"),
        }
    }
}

// ===== impl OutgoingBody =====

/// The body of a dispatched request as seen by the connection.
///
/// Yields the request's byte chunks. For streamed bodies the pool is
/// notified when the first chunk is pulled onto the wire (the request is no
/// longer retryable from that point) and when the upload completes or fails.
pub struct OutgoingBody {
    inner: OutgoingInner,
    watch: Option<Watch>,
}

enum OutgoingInner {
    Strict(Option<Bytes>),
    Streaming(BoxStream<'static, Result<Bytes, BoxError>>),
}

struct Watch {
    events: mpsc::UnboundedSender<Event>,
    slot: usize,
    seq: u64,
    observed: bool,
    finished: bool,
}

impl Watch {
    fn notify(&self, event: BodyEvent) {
        let _ = self.events.send(Event::RequestBody {
            slot: self.slot,
            seq: self.seq,
            event,
        });
    }
}

impl OutgoingBody {
    /// Recover the original body of a request that was never written to a
    /// connection, so the request can be dispatched again.
    pub(crate) fn into_body(mut self) -> Body {
        if let Some(watch) = self.watch.as_mut() {
            watch.finished = true;
        }
        match mem::replace(&mut self.inner, OutgoingInner::Strict(None)) {
            OutgoingInner::Strict(bytes) => Body::reusable(bytes.unwrap_or_default()),
            OutgoingInner::Streaming(stream) => Body::from_raw_stream(stream),
        }
    }
}

impl Stream for OutgoingBody {
    type Item = Result<Bytes, BoxError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match &mut this.inner {
            OutgoingInner::Strict(chunk) => {
                Poll::Ready(chunk.take().filter(|bytes| !bytes.is_empty()).map(Ok))
            }
            OutgoingInner::Streaming(stream) => {
                match ready!(stream.as_mut().poll_next(cx)) {
                    Some(Ok(chunk)) => {
                        if let Some(watch) = this.watch.as_mut() {
                            if !watch.observed {
                                watch.observed = true;
                                watch.notify(BodyEvent::Observed);
                            }
                        }
                        Poll::Ready(Some(Ok(chunk)))
                    }
                    Some(Err(cause)) => {
                        if let Some(watch) = this.watch.as_mut() {
                            if !watch.finished {
                                watch.finished = true;
                                watch.notify(BodyEvent::Failed(cause));
                            }
                        }
                        // The real cause went to the pool; the connection
                        // only needs to know the upload is broken.
                        Poll::Ready(Some(Err("request body stream failed".into())))
                    }
                    None => {
                        if let Some(watch) = this.watch.as_mut() {
                            if !watch.finished {
                                watch.finished = true;
                                watch.notify(BodyEvent::Completed);
                            }
                        }
                        Poll::Ready(None)
                    }
                }
            }
        }
    }
}

impl Drop for OutgoingBody {
    fn drop(&mut self) {
        // Dropped by the connection before the upload finished: the peer is
        // no longer interested in the rest of the request.
        if let Some(watch) = self.watch.as_mut() {
            if !watch.finished {
                watch.finished = true;
                watch.notify(BodyEvent::Aborted);
            }
        }
    }
}

impl fmt::Debug for OutgoingBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutgoingBody").finish()
    }
}
