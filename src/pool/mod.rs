mod backoff;
pub(crate) mod inner;
mod sequence;
mod slot;
mod timer;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{self, Poll};

use tokio::sync::{mpsc, oneshot};

use crate::body::Body;
use crate::config::{Builder, Config};
use crate::connect::Connect;
use crate::entity::Entity;
use crate::error::{Error, Result};

use self::sequence::Completion;

/// A connection pool for one host.
///
/// The pool multiplexes requests onto up to `max_connections` persistent
/// connections produced by a [`Connect`] factory, running at most one
/// request per connection at a time. Responses are delivered in the order
/// their requests were accepted, independent of which connection served
/// them.
///
/// `Pool` is cheap to clone; clones share the same connections. All pool
/// state lives in a single task spawned at build time, so dropping every
/// handle lets in-flight work drain and then stops that task.
pub struct Pool {
    incoming: mpsc::Sender<Incoming>,
    events: mpsc::UnboundedSender<inner::Event>,
    default_retries: u32,
}

/// A request as accepted from a pool handle, before admission.
pub(crate) struct Incoming {
    pub(crate) request: http::Request<Body>,
    pub(crate) retries: u32,
    pub(crate) completion: Completion,
}

// ===== impl Pool =====

impl Pool {
    /// Create a builder to configure a new `Pool`.
    pub fn builder() -> Builder {
        Builder::new()
    }

    pub(crate) fn new<C: Connect>(config: Config, connector: C) -> Pool {
        let (incoming_tx, incoming_rx) = mpsc::channel(config.max_open_requests);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let default_retries = config.max_retries;
        let pool_loop =
            inner::PoolLoop::new(config, connector, incoming_rx, events_tx.clone(), events_rx);
        tokio::spawn(pool_loop.run());
        Pool {
            incoming: incoming_tx,
            events: events_tx,
            default_retries,
        }
    }

    /// Send a request through the pool with the default retry budget.
    ///
    /// Suspends while the pool's admission buffer is full. The returned
    /// response carries an [`Entity`] body; read or discard it promptly, as
    /// the connection that produced it is not reused until the entity is
    /// consumed.
    pub async fn send(&self, request: http::Request<Body>) -> Result<http::Response<Entity>> {
        self.send_with_retries(request, self.default_retries).await
    }

    /// Send a request with an explicit retry budget.
    ///
    /// The budget is spent on failures that are safe to retry: failed
    /// connect attempts and connections lost before anything of the request
    /// reached the wire. Pass 0 to fail on the first error.
    pub async fn send_with_retries(
        &self,
        request: http::Request<Body>,
        retries: u32,
    ) -> Result<http::Response<Entity>> {
        let (completion, response) = oneshot::channel();
        self.incoming
            .send(Incoming {
                request,
                retries,
                completion,
            })
            .await
            .map_err(|_| Error::shutdown())?;
        match response.await {
            Ok(result) => result,
            Err(_) => Err(Error::shutdown()),
        }
    }

    /// Like [`send`](Pool::send), but returns a named future.
    pub fn request(&self, request: http::Request<Body>) -> ResponseFuture {
        let pool = self.clone();
        ResponseFuture {
            inner: Box::pin(async move { pool.send(request).await }),
        }
    }

    /// Shut the pool down.
    ///
    /// Aborts every connection and fails all in-flight and queued requests
    /// with a shutdown error. Returns once the pool task acknowledged.
    pub async fn shutdown(self) {
        let (done, acked) = oneshot::channel();
        if self.events.send(inner::Event::Shutdown { done }).is_ok() {
            let _ = acked.await;
        }
    }
}

impl Clone for Pool {
    fn clone(&self) -> Pool {
        Pool {
            incoming: self.incoming.clone(),
            events: self.events.clone(),
            default_retries: self.default_retries,
        }
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool").finish()
    }
}

impl tower_service::Service<http::Request<Body>> for Pool {
    type Response = http::Response<Entity>;
    type Error = Error;
    type Future = ResponseFuture;

    fn poll_ready(&mut self, _: &mut task::Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: http::Request<Body>) -> Self::Future {
        self.request(request)
    }
}

// ===== impl ResponseFuture =====

/// A `Future` that will resolve to a pooled HTTP response.
///
/// This is returned by [`Pool::request`].
#[must_use = "futures do nothing unless polled"]
pub struct ResponseFuture {
    inner: Pin<Box<dyn Future<Output = Result<http::Response<Entity>>> + Send>>,
}

impl Future for ResponseFuture {
    type Output = Result<http::Response<Entity>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}

impl fmt::Debug for ResponseFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("Future<Response>")
    }
}
