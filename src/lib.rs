#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(test, deny(warnings))]

//! # hostpool
//!
//! A host connection pool for HTTP clients.
//!
//! `hostpool` multiplexes a stream of outgoing requests onto a bounded set
//! of persistent connections to a single host:
//!
//! - At most one in-flight request per connection, with connections reused
//!   only after the previous response entity was fully consumed
//! - Responses delivered in the order their requests were accepted, across
//!   all connections
//! - Transparent retries for failures that are safe to replay, with
//!   exponential backoff when the host cannot be reached
//! - Warm connections kept open below a configurable floor, idle
//!   connections closed after a keep-alive timeout
//!
//! The pool is transport-agnostic: a [`Connect`] factory produces abstract
//! bidirectional flows ([`Connection`]), so the same pool drives an
//! in-memory harness, a protocol engine, or a socket-backed transport.
//!
//! ## Example
//!
//! ```no_run
//! use hostpool::{Body, BoxError, Connection, Pool};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), hostpool::Error> {
//!     let pool = Pool::builder()
//!         .max_connections(2)
//!         .build(|| async {
//!             let (conn, remote) = Connection::pair();
//!             // Hand `remote` to your transport or engine task.
//!             # drop(remote);
//!             Ok::<_, BoxError>(conn)
//!         })?;
//!
//!     let req = http::Request::get("/hello").body(Body::empty()).unwrap();
//!     let res = pool.send(req).await?;
//!     let body = res.into_body().bytes().await?;
//!     println!("{}", String::from_utf8_lossy(&body));
//!     Ok(())
//! }
//! ```

mod body;
mod config;
mod connect;
mod entity;
mod error;
mod pool;

pub use self::body::{Body, OutgoingBody};
pub use self::config::Builder;
pub use self::connect::{Connect, Connection, ConnectionInfo, Remote};
pub use self::entity::Entity;
pub use self::error::{BoxError, Error, Result};
pub use self::pool::{Pool, ResponseFuture};
