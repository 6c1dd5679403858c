#![allow(unused)]

pub mod tcp;

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};

use bytes::Bytes;
use hostpool::{Body, BoxError, Connect, Connection, OutgoingBody, Remote};
use log::{Level, LevelFilter, Log, Metadata, Record};
use tokio::sync::mpsc;

static ERRORS: Mutex<Vec<String>> = Mutex::new(Vec::new());
static LOGGER: CaptureLogger = CaptureLogger;

struct CaptureLogger;

impl Log for CaptureLogger {
    fn enabled(&self, _: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if record.level() == Level::Error {
            ERRORS
                .lock()
                .unwrap()
                .push(format!("{}: {}", record.target(), record.args()));
        }
    }

    fn flush(&self) {}
}

/// Install a process-wide logger that records every error-level record, so
/// tests can assert the pool never logs at that level.
pub fn init_logs() {
    let _ = log::set_logger(&LOGGER).map(|()| log::set_max_level(LevelFilter::Trace));
}

/// Every error-level record captured so far in this test process.
pub fn logged_errors() -> Vec<String> {
    ERRORS.lock().unwrap().clone()
}

/// A scripted in-memory host.
///
/// Each successful connect hands the server end of the new connection to
/// the test through [`Host::accept`]; the test then plays the server by
/// reading requests and sending responses on it.
pub struct Host {
    attempts: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
    accepts: mpsc::UnboundedReceiver<Remote>,
}

impl Host {
    /// How many times the pool invoked the connection factory.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Make every subsequent connect attempt fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Wait for the pool to establish the next connection.
    pub async fn accept(&mut self) -> Remote {
        self.accepts.recv().await.expect("connector was dropped")
    }
}

/// Build a connector wired to a scripted [`Host`].
pub fn host() -> (impl Connect, Host) {
    let attempts = Arc::new(AtomicUsize::new(0));
    let failing = Arc::new(AtomicBool::new(false));
    let (accept_tx, accepts) = mpsc::unbounded_channel();
    let connector = {
        let attempts = attempts.clone();
        let failing = failing.clone();
        move || {
            let attempts = attempts.clone();
            let failing = failing.clone();
            let accept_tx = accept_tx.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                if failing.load(Ordering::SeqCst) {
                    return Err::<Connection, BoxError>("connection refused".into());
                }
                let (conn, remote) = Connection::pair();
                accept_tx
                    .send(remote)
                    .map_err(|_| BoxError::from("test dropped the host"))?;
                Ok(conn)
            }
        }
    };
    (
        connector,
        Host {
            attempts,
            failing,
            accepts,
        },
    )
}

/// A 200 response whose body echoes the request path.
pub fn echo(req: &http::Request<OutgoingBody>) -> http::Response<Body> {
    http::Response::builder()
        .status(200)
        .body(Body::from(req.uri().path().to_string()))
        .unwrap()
}

/// A streamed body fed chunk by chunk from the test.
pub fn channel_body() -> (mpsc::UnboundedSender<Result<Bytes, BoxError>>, Body) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let stream = futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx));
    (tx, Body::wrap_stream(stream))
}

/// A GET request with an empty body.
pub fn get(path: &str) -> http::Request<Body> {
    http::Request::get(path).body(Body::empty()).unwrap()
}
