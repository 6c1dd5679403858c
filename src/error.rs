use std::{error::Error as StdError, fmt};

/// A `Result` alias where the `Err` case is `hostpool::Error`.
pub type Result<T> = std::result::Result<T, Error>;

/// A boxed error type that can be used for dynamic error handling.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// The errors that may occur while a request is pooled.
///
/// An `Error` is delivered either as the outcome of [`Pool::send`] or as an
/// item of a response [`Entity`] stream, depending on whether the response
/// had already been handed downstream when the fault happened.
///
/// [`Pool::send`]: crate::Pool::send
/// [`Entity`]: crate::Entity
pub struct Error {
    inner: Box<Inner>,
}

struct Inner {
    kind: Kind,
    source: Option<BoxError>,
}

#[derive(Debug)]
pub(crate) enum Kind {
    Builder,
    /// The connection factory rejected the attempt.
    Connect,
    /// An established connection terminated abnormally.
    Connection,
    /// The user-supplied request body stream failed.
    RequestEntity,
    /// The response entity stream failed.
    Entity,
    /// The response entity was never subscribed within the window.
    SubscriptionTimeout,
    /// The pool shut down while the request was in flight.
    Shutdown,
}

impl Error {
    pub(crate) fn new<E>(kind: Kind, source: Option<E>) -> Error
    where
        E: Into<BoxError>,
    {
        Error {
            inner: Box::new(Inner {
                kind,
                source: source.map(Into::into),
            }),
        }
    }

    pub(crate) fn builder<E: Into<BoxError>>(e: E) -> Error {
        Error::new(Kind::Builder, Some(e))
    }

    pub(crate) fn connect<E: Into<BoxError>>(e: E) -> Error {
        Error::new(Kind::Connect, Some(e))
    }

    pub(crate) fn connection<E: Into<BoxError>>(e: E) -> Error {
        Error::new(Kind::Connection, Some(e))
    }

    pub(crate) fn request_entity<E: Into<BoxError>>(e: E) -> Error {
        Error::new(Kind::RequestEntity, Some(e))
    }

    pub(crate) fn entity<E: Into<BoxError>>(e: E) -> Error {
        Error::new(Kind::Entity, Some(e))
    }

    pub(crate) fn subscription_timeout(message: String) -> Error {
        Error::new(Kind::SubscriptionTimeout, Some(message))
    }

    pub(crate) fn shutdown() -> Error {
        Error::new(Kind::Shutdown, None::<Error>)
    }
}

impl Error {
    /// Returns true if the error came from building an invalid pool.
    pub fn is_builder(&self) -> bool {
        matches!(self.inner.kind, Kind::Builder)
    }

    /// Returns true if the connection factory rejected the attempt.
    pub fn is_connect(&self) -> bool {
        matches!(self.inner.kind, Kind::Connect)
    }

    /// Returns true if an established connection terminated abnormally.
    pub fn is_connection(&self) -> bool {
        matches!(self.inner.kind, Kind::Connection)
    }

    /// Returns true if the request body stream failed.
    pub fn is_request_entity(&self) -> bool {
        matches!(self.inner.kind, Kind::RequestEntity)
    }

    /// Returns true if the response entity stream failed.
    pub fn is_entity(&self) -> bool {
        matches!(self.inner.kind, Kind::Entity)
    }

    /// Returns true if the response entity was not subscribed in time.
    pub fn is_subscription_timeout(&self) -> bool {
        matches!(self.inner.kind, Kind::SubscriptionTimeout)
    }

    /// Returns true if the pool shut down while the request was in flight.
    pub fn is_shutdown(&self) -> bool {
        matches!(self.inner.kind, Kind::Shutdown)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = f.debug_struct("hostpool::Error");
        builder.field("kind", &self.inner.kind);
        if let Some(ref source) = self.inner.source {
            builder.field("source", source);
        }
        builder.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let desc = match self.inner.kind {
            Kind::Builder => "builder error",
            Kind::Connect => "error connecting to host",
            Kind::Connection => "connection failed",
            Kind::RequestEntity => "request body error",
            Kind::Entity => "response entity error",
            Kind::SubscriptionTimeout => "response entity subscription timed out",
            Kind::Shutdown => "pool was shut down",
        };
        f.write_str(desc)?;
        if let Some(ref source) = self.inner.source {
            write!(f, ": {source}")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner.source.as_ref().map(|e| &**e as _)
    }
}
