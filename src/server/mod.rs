//! Async TCP transport using Tokio.
//!
//! Accepts TCP connections and feeds HTTP/1.1 requests to a [`Dispatcher`].
//! Persistent connections (keep-alive) are supported; requests on one
//! connection are handled in order.
//!
//! The request body is not read up front. While the dispatcher works on a
//! request, the connection task pushes body bytes into the request's
//! [`BodyStream`] as they arrive, so a route can buffer the body or stream it
//! without the transport knowing which.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use chrono::Local;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::access_log::AccessEntry;
use crate::dispatch::{Dispatcher, Incoming};
use crate::http::{
    BodyError, BodyStream, Method, StatusCode,
    body::BodySender,
    request::{Request, RequestError},
    response::Response,
};

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Largest request head we buffer before answering 431.
const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// Body chunks in flight between the socket and the handler.
const BODY_CHANNEL_CAPACITY: usize = 8;

/// The HTTP server.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use httprib::{Dispatcher, Response, RouteTable, Server, ServerConfig, StatusCode};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut routes = RouteTable::new();
///     routes.get("/hello", |_ctx| async { Response::new(StatusCode::Ok).body("Hello!") });
///
///     let dispatcher = Dispatcher::new(Arc::new(routes), ServerConfig::default())?;
///     Server::bind("127.0.0.1:8080").await?.serve(dispatcher).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds the server to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections and dispatches their requests until the process
    /// exits or the future is dropped.
    ///
    /// Failures are contained per connection; accept errors are logged and
    /// the loop keeps going.
    pub async fn serve(self, dispatcher: Dispatcher) -> Result<(), ServerError> {
        let dispatcher = Arc::new(dispatcher);
        info!(address = %self.local_addr, "httprib listening");

        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let dispatcher = Arc::clone(&dispatcher);

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, dispatcher).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

/// How far the body of one request was read off the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyProgress {
    /// Every body byte was consumed; the next request starts at `buf[0]`.
    Complete,
    /// Body bytes are still on the wire; the connection cannot be reused.
    Unread,
}

/// Handles a single TCP connection over its lifetime.
async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    dispatcher: Arc<Dispatcher>,
) -> Result<(), std::io::Error> {
    let (mut reader, mut writer) = stream.into_split();
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        let (request, body_offset) = loop {
            match Request::parse(&buf) {
                Ok(pair) => break pair,
                Err(RequestError::Incomplete) => {
                    if buf.len() > MAX_HEAD_SIZE {
                        warn!(peer = %peer_addr, "request head too large, sending 431");
                        let response = Response::new(StatusCode::RequestHeaderFieldsTooLarge);
                        return reject(&dispatcher, &mut writer, peer_addr, response, None).await;
                    }
                    if reader.read_buf(&mut buf).await? == 0 {
                        debug!(peer = %peer_addr, "connection closed by peer");
                        return Ok(());
                    }
                }
                Err(e) => {
                    warn!(peer = %peer_addr, error = %e, "bad request, sending 400");
                    let response =
                        Response::new(StatusCode::BadRequest).body(format!("Bad Request: {e}"));
                    return reject(&dispatcher, &mut writer, peer_addr, response, None).await;
                }
            }
        };
        buf.advance(body_offset);

        if request.has_transfer_encoding() {
            warn!(peer = %peer_addr, "transfer-encoded body, sending 501");
            let response = Response::new(StatusCode::NotImplemented);
            return reject(&dispatcher, &mut writer, peer_addr, response, Some(&request)).await;
        }

        let keep_alive = request.is_keep_alive();
        let method = request.method().clone();
        let target = request.target().to_owned();
        let content_length = request.content_length();

        debug!(
            peer = %peer_addr,
            method = %method,
            path = %request.path(),
            content_length,
            "dispatching request"
        );

        let (sender, body) = BodyStream::channel(content_length, BODY_CHANNEL_CAPACITY);
        let incoming = Incoming {
            request,
            body,
            remote_addr: peer_addr,
        };

        let (response, progress) = tokio::join!(
            dispatcher.dispatch(incoming),
            feed_body(
                &mut reader,
                &mut buf,
                content_length,
                sender,
                dispatcher.body_timeout()
            ),
        );

        let reuse = keep_alive && response.is_keep_alive() && progress == BodyProgress::Complete;
        let status = response.status();

        if let Err(e) = response.keep_alive(reuse).write_to(&mut writer).await {
            warn!(peer = %peer_addr, status = status.as_u16(), error = %e, "failed to write response");
            return Ok(());
        }

        record_access(&dispatcher, peer_addr, status, &method, &target).await;

        if !reuse {
            debug!(peer = %peer_addr, "closing connection");
            break;
        }
    }

    Ok(())
}

/// Pushes `content_length` body bytes from `buf` and the socket into `sender`.
///
/// Once the consumer is gone, bytes already buffered are discarded; if the
/// rest of the body is still on the wire the connection is marked unusable
/// instead of draining it. A consumer dropped while a read is pending ends
/// the wait immediately, so the response is never held back by a client that
/// has not sent its body.
async fn feed_body(
    reader: &mut OwnedReadHalf,
    buf: &mut BytesMut,
    content_length: usize,
    sender: BodySender,
    timeout: Duration,
) -> BodyProgress {
    let mut remaining = content_length;

    while remaining > 0 {
        if sender.is_closed() {
            let discard = remaining.min(buf.len());
            buf.advance(discard);
            remaining -= discard;
            return if remaining == 0 {
                BodyProgress::Complete
            } else {
                BodyProgress::Unread
            };
        }

        if buf.is_empty() {
            let read = tokio::select! {
                read = tokio::time::timeout(timeout, reader.read_buf(buf)) => read,
                // Nobody will read the rest; stop waiting for the client.
                () = sender.closed() => return BodyProgress::Unread,
            };
            match read {
                Err(_) => {
                    sender.fail(BodyError::Timeout).await;
                    return BodyProgress::Unread;
                }
                Ok(Err(e)) => {
                    sender.fail(BodyError::Io(e)).await;
                    return BodyProgress::Unread;
                }
                // Peer closed mid-body; dropping the sender reports truncation.
                Ok(Ok(0)) => return BodyProgress::Unread,
                Ok(Ok(_)) => {}
            }
        }

        let take = remaining.min(buf.len());
        let chunk = buf.split_to(take).freeze();
        remaining -= take;
        if !sender.send(chunk).await {
            // Consumer dropped while we were waiting; this chunk is discarded.
            continue;
        }
    }

    BodyProgress::Complete
}

/// Writes a response the transport produced itself, then closes the
/// connection. `request` is `None` when the head never parsed; the access log
/// then shows `-` for method and target.
async fn reject(
    dispatcher: &Dispatcher,
    writer: &mut OwnedWriteHalf,
    peer_addr: SocketAddr,
    response: Response,
    request: Option<&Request>,
) -> Result<(), std::io::Error> {
    let response = dispatcher.finish(response).keep_alive(false);
    let status = response.status();
    response.write_to(writer).await?;

    let unparsed = Method::Custom("-".to_owned());
    let (method, target) = match request {
        Some(request) => (request.method(), request.target()),
        None => (&unparsed, "-"),
    };
    record_access(dispatcher, peer_addr, status, method, target).await;
    Ok(())
}

async fn record_access(
    dispatcher: &Dispatcher,
    peer_addr: SocketAddr,
    status: StatusCode,
    method: &Method,
    target: &str,
) {
    dispatcher
        .access_log()
        .record(&AccessEntry {
            at: Local::now(),
            remote: peer_addr.ip(),
            status,
            method,
            target,
        })
        .await;
}
