use std::{fmt, time::Duration};

use crate::connect::Connect;
use crate::error::{Error, Result};
use crate::pool::Pool;

#[derive(Debug, Clone)]
pub(crate) struct Config {
    pub(crate) max_connections: usize,
    pub(crate) min_connections: usize,
    pub(crate) max_retries: u32,
    pub(crate) base_connection_backoff: Duration,
    pub(crate) max_connection_backoff: Duration,
    pub(crate) keep_alive_timeout: Option<Duration>,
    pub(crate) response_entity_subscription_timeout: Option<Duration>,
    pub(crate) max_open_requests: usize,
    pub(crate) max_connection_lifetime: Option<Duration>,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            max_connections: 4,
            min_connections: 0,
            max_retries: 5,
            base_connection_backoff: Duration::from_millis(100),
            max_connection_backoff: Duration::from_secs(2),
            keep_alive_timeout: None,
            response_entity_subscription_timeout: Some(Duration::from_secs(1)),
            max_open_requests: 32,
            max_connection_lifetime: None,
        }
    }
}

/// A builder to configure a new [`Pool`].
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use hostpool::{BoxError, Connection, Pool};
///
/// # fn run() -> Result<(), hostpool::Error> {
/// let pool = Pool::builder()
///     .max_connections(8)
///     .min_connections(2)
///     .keep_alive_timeout(Duration::from_secs(30))
///     .build(|| async {
///         let (conn, remote) = Connection::pair();
///         # drop(remote);
///         Ok::<_, BoxError>(conn)
///     })?;
/// # drop(pool);
/// # Ok(())
/// # }
/// ```
pub struct Builder {
    config: Config,
}

impl Builder {
    pub(crate) fn new() -> Builder {
        Builder {
            config: Config::default(),
        }
    }

    /// Hard cap on simultaneously open connections.
    ///
    /// Must be at least 1. Default is 4.
    pub fn max_connections(mut self, max: usize) -> Builder {
        self.config.max_connections = max;
        self
    }

    /// Floor of warm connections kept open even without demand.
    ///
    /// Must not exceed `max_connections`. Default is 0.
    pub fn min_connections(mut self, min: usize) -> Builder {
        self.config.min_connections = min;
        self
    }

    /// Default retry budget for requests sent with [`Pool::send`].
    ///
    /// Default is 5.
    pub fn max_retries(mut self, retries: u32) -> Builder {
        self.config.max_retries = retries;
        self
    }

    /// Initial delay before reattempting a connect after a failure.
    ///
    /// The delay doubles with each consecutive failure, up to
    /// [`max_connection_backoff`](Builder::max_connection_backoff).
    /// Default is 100 milliseconds.
    pub fn base_connection_backoff(mut self, backoff: Duration) -> Builder {
        self.config.base_connection_backoff = backoff;
        self
    }

    /// Cap on the connect backoff delay.
    ///
    /// Default is 2 seconds.
    pub fn max_connection_backoff(mut self, backoff: Duration) -> Builder {
        self.config.max_connection_backoff = backoff;
        self
    }

    /// How long an idle connection is kept open before it is closed.
    ///
    /// Pass `None` to keep idle connections open indefinitely, which is the
    /// default.
    pub fn keep_alive_timeout<D>(mut self, timeout: D) -> Builder
    where
        D: Into<Option<Duration>>,
    {
        self.config.keep_alive_timeout = timeout.into();
        self
    }

    /// How long the consumer of a response has to start reading its entity
    /// before the entity stream is failed and the connection aborted.
    ///
    /// Pass `None` to wait indefinitely. Default is 1 second.
    pub fn response_entity_subscription_timeout<D>(mut self, timeout: D) -> Builder
    where
        D: Into<Option<Duration>>,
    {
        self.config.response_entity_subscription_timeout = timeout.into();
        self
    }

    /// Bound on requests accepted but not yet dispatched to a slot.
    ///
    /// When the buffer is full, [`Pool::send`] suspends until room frees up.
    /// Must be at least 1. Default is 32.
    pub fn max_open_requests(mut self, max: usize) -> Builder {
        self.config.max_open_requests = max;
        self
    }

    /// Cap on the age of a connection; older connections are not reused
    /// once they next become idle.
    ///
    /// Pass `None` for no cap, which is the default.
    pub fn max_connection_lifetime<D>(mut self, lifetime: D) -> Builder
    where
        D: Into<Option<Duration>>,
    {
        self.config.max_connection_lifetime = lifetime.into();
        self
    }

    /// Combine this configuration with a connection factory to create a
    /// [`Pool`].
    ///
    /// Must be called within a tokio runtime.
    pub fn build<C>(self, connector: C) -> Result<Pool>
    where
        C: Connect,
    {
        let config = self.config;
        if config.max_connections == 0 {
            return Err(Error::builder("max_connections must be at least 1"));
        }
        if config.min_connections > config.max_connections {
            return Err(Error::builder(
                "min_connections must not exceed max_connections",
            ));
        }
        if config.max_open_requests == 0 {
            return Err(Error::builder("max_open_requests must be at least 1"));
        }
        if config.base_connection_backoff > config.max_connection_backoff {
            return Err(Error::builder(
                "base_connection_backoff must not exceed max_connection_backoff",
            ));
        }
        Ok(Pool::new(config, connector))
    }
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("config", &self.config)
            .finish()
    }
}
