//! Request bodies as an asynchronous chunk stream.
//!
//! The connection task reads the body off the socket and pushes it through a
//! bounded channel while the dispatcher runs. A route either lets the
//! dispatcher [`collect`](BodyStream::collect) the whole body before the
//! handler is called, or hands the unconsumed [`BodyStream`] to the handler.

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors surfaced while reading a request body.
#[derive(Debug, Error)]
pub enum BodyError {
    #[error("I/O error while reading body: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out waiting for request body")]
    Timeout,

    #[error("request body exceeds maximum allowed size of {max_bytes} bytes")]
    TooLarge { max_bytes: usize },

    #[error("connection closed after {received} of {expected} body bytes")]
    Truncated { received: usize, expected: usize },
}

enum Source {
    Full(Option<Bytes>),
    Channel(mpsc::Receiver<Result<Bytes, BodyError>>),
}

/// The unconsumed body of one request.
///
/// # Examples
///
/// ```
/// use httprib::http::BodyStream;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let body = BodyStream::from_bytes("hello");
/// assert_eq!(body.content_length(), 5);
/// let bytes = body.collect(1024).await.unwrap();
/// assert_eq!(&bytes[..], b"hello");
/// # }
/// ```
pub struct BodyStream {
    source: Source,
    content_length: usize,
    received: usize,
}

impl BodyStream {
    /// A body with no bytes.
    pub fn empty() -> Self {
        Self::from_bytes(Bytes::new())
    }

    /// A body already held in memory.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        Self {
            content_length: bytes.len(),
            source: Source::Full(Some(bytes).filter(|b| !b.is_empty())),
            received: 0,
        }
    }

    /// Creates a channel-backed body of `content_length` bytes. The returned
    /// [`BodySender`] is driven by the connection that owns the socket.
    pub fn channel(content_length: usize, capacity: usize) -> (BodySender, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            BodySender { tx },
            Self {
                source: Source::Channel(rx),
                content_length,
                received: 0,
            },
        )
    }

    /// Declared body length from `Content-Length`.
    pub fn content_length(&self) -> usize {
        self.content_length
    }

    /// Waits for the next chunk. `None` marks the end of the body.
    pub async fn chunk(&mut self) -> Option<Result<Bytes, BodyError>> {
        let next = match &mut self.source {
            Source::Full(bytes) => bytes.take().map(Ok),
            Source::Channel(rx) => rx.recv().await,
        };
        match next {
            Some(Ok(chunk)) => {
                self.received += chunk.len();
                Some(Ok(chunk))
            }
            Some(Err(e)) => Some(Err(e)),
            None if self.received < self.content_length => {
                let err = BodyError::Truncated {
                    received: self.received,
                    expected: self.content_length,
                };
                // Report truncation once, then end.
                self.content_length = self.received;
                Some(Err(err))
            }
            None => None,
        }
    }

    /// Accumulates the whole body into one contiguous buffer.
    ///
    /// Fails fast with [`BodyError::TooLarge`] when the declared length already
    /// exceeds `max_bytes`.
    pub async fn collect(mut self, max_bytes: usize) -> Result<Bytes, BodyError> {
        if self.content_length > max_bytes {
            return Err(BodyError::TooLarge { max_bytes });
        }
        if let Source::Full(bytes) = &mut self.source {
            return Ok(bytes.take().unwrap_or_default());
        }

        let mut buf = BytesMut::with_capacity(self.content_length);
        while let Some(chunk) = self.chunk().await {
            let chunk = chunk?;
            if buf.len() + chunk.len() > max_bytes {
                return Err(BodyError::TooLarge { max_bytes });
            }
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }
}

impl std::fmt::Debug for BodyStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BodyStream")
            .field("content_length", &self.content_length)
            .field("received", &self.received)
            .finish()
    }
}

/// Producer half of a channel-backed [`BodyStream`].
#[derive(Debug, Clone)]
pub struct BodySender {
    tx: mpsc::Sender<Result<Bytes, BodyError>>,
}

impl BodySender {
    /// Pushes a chunk. Returns `false` once the consumer has gone away.
    pub async fn send(&self, chunk: Bytes) -> bool {
        self.tx.send(Ok(chunk)).await.is_ok()
    }

    /// Delivers a terminal error to the consumer.
    pub async fn fail(&self, err: BodyError) {
        let _ = self.tx.send(Err(err)).await;
    }

    /// Returns `true` once the [`BodyStream`] has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the [`BodyStream`] has been dropped.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_body_ends_immediately() {
        let mut body = BodyStream::empty();
        assert!(body.chunk().await.is_none());
        assert!(BodyStream::empty().collect(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn channel_chunks_are_concatenated() {
        let (tx, body) = BodyStream::channel(11, 2);
        let feeder = tokio::spawn(async move {
            assert!(tx.send(Bytes::from_static(b"hello ")).await);
            assert!(tx.send(Bytes::from_static(b"world")).await);
        });
        let bytes = body.collect(64).await.unwrap();
        feeder.await.unwrap();
        assert_eq!(&bytes[..], b"hello world");
    }

    #[tokio::test]
    async fn declared_length_over_limit_fails_fast() {
        let (_tx, body) = BodyStream::channel(100, 1);
        let err = body.collect(10).await.unwrap_err();
        assert!(matches!(err, BodyError::TooLarge { max_bytes: 10 }));
    }

    #[tokio::test]
    async fn early_close_reports_truncation() {
        let (tx, mut body) = BodyStream::channel(8, 2);
        assert!(tx.send(Bytes::from_static(b"abc")).await);
        drop(tx);
        assert_eq!(&body.chunk().await.unwrap().unwrap()[..], b"abc");
        assert!(matches!(
            body.chunk().await,
            Some(Err(BodyError::Truncated { received: 3, expected: 8 }))
        ));
        assert!(body.chunk().await.is_none());
    }

    #[tokio::test]
    async fn sender_sees_dropped_consumer() {
        let (tx, body) = BodyStream::channel(4, 1);
        drop(body);
        assert!(tx.is_closed());
        assert!(!tx.send(Bytes::from_static(b"data")).await);
    }
}
