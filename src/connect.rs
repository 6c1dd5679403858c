use std::{fmt, future::Future, time::Instant};

use futures_util::future::BoxFuture;
use tokio::sync::mpsc;

use crate::body::{Body, OutgoingBody};
use crate::error::BoxError;

/// Produces new connections to the host on demand.
///
/// Implemented for closures returning a connection future, so a factory can
/// be as simple as:
///
/// ```
/// use hostpool::{BoxError, Connection};
///
/// let connector = || async {
///     let (conn, remote) = Connection::pair();
///     // hand `remote` to a transport task here
///     # drop(remote);
///     Ok::<_, BoxError>(conn)
/// };
/// # drop(connector);
/// ```
pub trait Connect: Send + Sync + 'static {
    /// Begin a new connection attempt.
    ///
    /// The returned future resolves once the connection is established and
    /// fails when the attempt fails. The established connection may still
    /// fail later, independently of this future.
    fn connect(&self) -> BoxFuture<'static, Result<Connection, BoxError>>;
}

impl<F, R> Connect for F
where
    F: Fn() -> R + Send + Sync + 'static,
    R: Future<Output = Result<Connection, BoxError>> + Send + 'static,
{
    fn connect(&self) -> BoxFuture<'static, Result<Connection, BoxError>> {
        Box::pin((self)())
    }
}

/// The pool-side handle of one established connection.
///
/// A connection is an abstract bidirectional flow: the pool writes at most
/// one request at a time into it and reads responses, an orderly close, or a
/// failure back out. Obtain one half of a pair with [`Connection::pair`] and
/// drive the other half ([`Remote`]) from a transport or protocol engine.
pub struct Connection {
    pub(crate) requests: mpsc::Sender<http::Request<OutgoingBody>>,
    pub(crate) events: mpsc::UnboundedReceiver<FlowEvent>,
}

/// What the remote side of a connection reported.
pub(crate) enum FlowEvent {
    /// A response to the request most recently written.
    Response(http::Response<Body>),
    /// The remote closed the connection in an orderly fashion.
    Closed,
    /// The connection terminated abnormally.
    Failed(BoxError),
}

// ===== impl Connection =====

impl Connection {
    /// Create a connected `Connection`/`Remote` pair.
    pub fn pair() -> (Connection, Remote) {
        // One request in flight per connection; the pool never queues a
        // second before the first completed.
        let (req_tx, req_rx) = mpsc::channel(1);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Connection {
                requests: req_tx,
                events: event_rx,
            },
            Remote {
                requests: req_rx,
                events: event_tx,
            },
        )
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").finish()
    }
}

// ===== impl Remote =====

/// The far side of a [`Connection`]: where a transport or test harness
/// receives dispatched requests and produces responses.
///
/// Dropping a `Remote` without calling [`close`](Remote::close) or
/// [`fail`](Remote::fail) counts as an orderly close.
pub struct Remote {
    requests: mpsc::Receiver<http::Request<OutgoingBody>>,
    events: mpsc::UnboundedSender<FlowEvent>,
}

impl Remote {
    /// Receive the next request dispatched onto this connection.
    ///
    /// Returns `None` once the pool has released the connection.
    pub async fn next_request(&mut self) -> Option<http::Request<OutgoingBody>> {
        self.requests.recv().await
    }

    /// Send the response for the request most recently received.
    pub fn respond(&self, response: http::Response<Body>) {
        let _ = self.events.send(FlowEvent::Response(response));
    }

    /// Close the connection in an orderly fashion.
    pub fn close(self) {
        let _ = self.events.send(FlowEvent::Closed);
    }

    /// Terminate the connection abnormally.
    pub fn fail<E: Into<BoxError>>(self, error: E) {
        let _ = self.events.send(FlowEvent::Failed(error.into()));
    }
}

impl fmt::Debug for Remote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Remote").finish()
    }
}

// ===== impl ConnectionInfo =====

/// Metadata about the connection a response arrived on.
///
/// Attached to every pooled response as an [extension], mostly useful for
/// diagnostics.
///
/// [extension]: http::Extensions
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    slot: usize,
    generation: u64,
    opened_at: Instant,
}

impl ConnectionInfo {
    pub(crate) fn new(slot: usize, generation: u64, opened_at: Instant) -> ConnectionInfo {
        ConnectionInfo {
            slot,
            generation,
            opened_at,
        }
    }

    /// The index of the pool slot that served the request.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// How many connections this slot had opened, this one included.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// When the connection was established.
    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }
}
