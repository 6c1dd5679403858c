use std::{
    fmt,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use bytes::{Bytes, BytesMut};
use futures_core::Stream;
use futures_util::stream::BoxStream;
use tokio::sync::{mpsc, oneshot};

use crate::body::{Body, BodySummary, RawBody};
use crate::error::{BoxError, Error, Result};
use crate::pool::inner::{EntityEvent, Event};

/// The entity (body) of a pooled response.
///
/// An `Entity` is a stream of byte chunks. The pool does not reuse the
/// connection a response arrived on until its entity has been read to the
/// end or discarded, so either poll the stream until it is exhausted or call
/// [`discard_bytes`](Entity::discard_bytes). Dropping an `Entity` midway
/// aborts the underlying connection.
pub struct Entity {
    inner: EntityInner,
}

enum EntityInner {
    /// No body, or a body the pool already considers drained (HEAD).
    Empty,
    /// A buffered body; the connection is not gated on reading it.
    Strict(Option<Bytes>),
    /// A live body streaming from the connection.
    Streaming(Streaming),
    /// End of stream or failure was already yielded.
    Terminated,
}

struct Streaming {
    stream: BoxStream<'static, std::result::Result<Bytes, BoxError>>,
    /// Failure injected by the pool (connection died, subscription timeout).
    abort: Option<oneshot::Receiver<Error>>,
    gate: Gate,
}

/// Reports entity progress back to the owning slot, each event at most once.
struct Gate {
    events: mpsc::UnboundedSender<Event>,
    slot: usize,
    seq: u64,
    subscribed: bool,
    terminated: bool,
}

impl Gate {
    fn notify(&self, event: EntityEvent) {
        let _ = self.events.send(Event::Entity {
            slot: self.slot,
            seq: self.seq,
            event,
        });
    }
}

/// A wire response body converted for handing downstream.
pub(crate) struct WireEntity {
    pub(crate) entity: Entity,
    /// True when the slot does not need to wait for the consumer.
    pub(crate) drained: bool,
    pub(crate) summary: BodySummary,
    /// Lets the slot fail the stream after it has been handed downstream.
    pub(crate) abort: Option<oneshot::Sender<Error>>,
}

pub(crate) fn wire_entity(
    body: Body,
    is_head: bool,
    events: &mpsc::UnboundedSender<Event>,
    slot: usize,
    seq: u64,
) -> WireEntity {
    let summary = body.summary();
    match body.into_raw() {
        // HEAD carries no body regardless of what the framing declares.
        RawBody::Stream(_) | RawBody::Bytes(_) if is_head => WireEntity {
            entity: Entity::empty(),
            drained: true,
            summary,
            abort: None,
        },
        RawBody::Bytes(bytes) if bytes.is_empty() => WireEntity {
            entity: Entity::empty(),
            drained: true,
            summary,
            abort: None,
        },
        RawBody::Bytes(bytes) => WireEntity {
            entity: Entity {
                inner: EntityInner::Strict(Some(bytes)),
            },
            drained: true,
            summary,
            abort: None,
        },
        RawBody::Stream(stream) => {
            let (abort_tx, abort_rx) = oneshot::channel();
            WireEntity {
                entity: Entity {
                    inner: EntityInner::Streaming(Streaming {
                        stream,
                        abort: Some(abort_rx),
                        gate: Gate {
                            events: events.clone(),
                            slot,
                            seq,
                            subscribed: false,
                            terminated: false,
                        },
                    }),
                },
                drained: false,
                summary,
                abort: Some(abort_tx),
            }
        }
    }
}

// ===== impl Entity =====

impl Entity {
    pub(crate) fn empty() -> Entity {
        Entity {
            inner: EntityInner::Empty,
        }
    }

    /// Collect the full entity into a single `Bytes` buffer.
    pub async fn bytes(mut self) -> Result<Bytes> {
        use futures_util::StreamExt;

        let mut chunks: Vec<Bytes> = Vec::new();
        while let Some(chunk) = self.next().await {
            chunks.push(chunk?);
        }
        match chunks.len() {
            0 => Ok(Bytes::new()),
            1 => Ok(chunks.remove(0)),
            _ => {
                let mut buf = BytesMut::with_capacity(chunks.iter().map(Bytes::len).sum());
                for chunk in chunks {
                    buf.extend_from_slice(&chunk);
                }
                Ok(buf.freeze())
            }
        }
    }

    /// Read the entity to the end, discarding the bytes.
    ///
    /// This counts as consuming the entity: the connection becomes reusable
    /// as soon as the stream is exhausted.
    pub async fn discard_bytes(mut self) -> Result<()> {
        use futures_util::StreamExt;

        while let Some(chunk) = self.next().await {
            chunk?;
        }
        Ok(())
    }
}

enum Step {
    Pending,
    Chunk(Bytes),
    Fail(Error),
    End,
}

impl Stream for Entity {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let step = match &mut this.inner {
            EntityInner::Empty | EntityInner::Terminated => return Poll::Ready(None),
            EntityInner::Strict(chunk) => match chunk.take() {
                Some(bytes) => Step::Chunk(bytes),
                None => Step::End,
            },
            EntityInner::Streaming(s) => {
                if !s.gate.subscribed {
                    s.gate.subscribed = true;
                    s.gate.notify(EntityEvent::Subscribed);
                }
                let abort = match s.abort.as_mut() {
                    Some(rx) => Pin::new(rx).poll(cx),
                    None => Poll::Pending,
                };
                if matches!(abort, Poll::Ready(Err(_))) {
                    // Pool went away without aborting; keep reading.
                    s.abort = None;
                }
                if let Poll::Ready(Ok(err)) = abort {
                    s.gate.terminated = true;
                    Step::Fail(err)
                } else {
                    match s.stream.as_mut().poll_next(cx) {
                        Poll::Pending => Step::Pending,
                        Poll::Ready(Some(Ok(bytes))) => Step::Chunk(bytes),
                        Poll::Ready(Some(Err(cause))) => {
                            s.gate.terminated = true;
                            s.gate.notify(EntityEvent::Failed);
                            Step::Fail(Error::entity(cause))
                        }
                        Poll::Ready(None) => {
                            s.gate.terminated = true;
                            s.gate.notify(EntityEvent::Drained);
                            Step::End
                        }
                    }
                }
            }
        };
        match step {
            Step::Pending => Poll::Pending,
            Step::Chunk(bytes) => Poll::Ready(Some(Ok(bytes))),
            Step::Fail(err) => {
                this.inner = EntityInner::Terminated;
                Poll::Ready(Some(Err(err)))
            }
            Step::End => {
                this.inner = EntityInner::Terminated;
                Poll::Ready(None)
            }
        }
    }
}

impl Drop for Entity {
    fn drop(&mut self) {
        if let EntityInner::Streaming(s) = &self.inner {
            if !s.gate.terminated {
                s.gate.notify(EntityEvent::Dropped);
            }
        }
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.inner {
            EntityInner::Empty => "Empty",
            EntityInner::Strict(_) => "Strict",
            EntityInner::Streaming(_) => "Streaming",
            EntityInner::Terminated => "Terminated",
        };
        f.debug_struct("Entity").field("kind", &kind).finish()
    }
}
