#![allow(unused)]

//! A TCP substrate for the pool: the same abstract request/response flow,
//! carried over a socket with a trivial length-prefixed framing. This keeps
//! the HTTP engine out of the picture while exercising the pool against a
//! real transport.
//!
//! Wire format, both directions: a text header line, a decimal body length
//! line, then the body bytes. Requests send `METHOD path`, responses send
//! the status code.

use std::net::SocketAddr;

use futures_util::StreamExt;
use hostpool::{Body, BoxError, Connect, Connection, OutgoingBody, Remote};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

/// A connector that dials `addr` and bridges the connection flow over TCP.
pub fn connector(addr: SocketAddr) -> impl Connect {
    move || async move {
        let stream = TcpStream::connect(addr).await.map_err(BoxError::from)?;
        let (conn, remote) = Connection::pair();
        tokio::spawn(drive(remote, stream));
        Ok::<_, BoxError>(conn)
    }
}

async fn drive(mut remote: Remote, stream: TcpStream) {
    let (read, mut write) = stream.into_split();
    let mut read = BufReader::new(read);
    loop {
        let req = match remote.next_request().await {
            Some(req) => req,
            // Pool released the connection.
            None => return,
        };
        if let Err(err) = exchange(req, &mut read, &mut write, &remote).await {
            remote.fail(err);
            return;
        }
    }
}

async fn exchange(
    req: http::Request<OutgoingBody>,
    read: &mut BufReader<OwnedReadHalf>,
    write: &mut OwnedWriteHalf,
    remote: &Remote,
) -> Result<(), BoxError> {
    let (parts, mut body) = req.into_parts();
    let mut payload = Vec::new();
    while let Some(chunk) = body.next().await {
        payload.extend_from_slice(&chunk?);
    }
    let header = format!("{} {}\n{}\n", parts.method, parts.uri.path(), payload.len());
    write.write_all(header.as_bytes()).await?;
    write.write_all(&payload).await?;

    let mut status_line = String::new();
    if read.read_line(&mut status_line).await? == 0 {
        return Err("server closed the connection".into());
    }
    let status: u16 = status_line.trim().parse()?;
    let mut len_line = String::new();
    read.read_line(&mut len_line).await?;
    let len: usize = len_line.trim().parse()?;
    let mut body = vec![0u8; len];
    read.read_exact(&mut body).await?;
    remote.respond(
        http::Response::builder()
            .status(status)
            .body(Body::from(body))
            .unwrap(),
    );
    Ok(())
}

/// Spawn a server that answers every request with its own path.
pub async fn echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(_) => return,
            };
            tokio::spawn(serve(stream));
        }
    });
    addr
}

async fn serve(stream: TcpStream) {
    let (read, mut write) = stream.into_split();
    let mut read = BufReader::new(read);
    loop {
        let mut request_line = String::new();
        match read.read_line(&mut request_line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        let path = request_line
            .trim()
            .split(' ')
            .nth(1)
            .unwrap_or("/")
            .to_string();
        let mut len_line = String::new();
        if read.read_line(&mut len_line).await.is_err() {
            return;
        }
        let len: usize = len_line.trim().parse().unwrap_or(0);
        let mut body = vec![0u8; len];
        if read.read_exact(&mut body).await.is_err() {
            return;
        }
        let payload = path.into_bytes();
        let header = format!("200\n{}\n", payload.len());
        if write.write_all(header.as_bytes()).await.is_err() {
            return;
        }
        if write.write_all(&payload).await.is_err() {
            return;
        }
    }
}
