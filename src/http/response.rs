//! HTTP/1.1 response builder and writer.
//!
//! A response carries either an in-memory body or an open file that is
//! streamed to the socket after the head.

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::{Headers, StatusCode};

#[derive(Debug)]
enum Payload {
    Buffered(Vec<u8>),
    File { file: tokio::fs::File, len: u64 },
}

/// An HTTP/1.1 response, ready to be written.
///
/// # Examples
///
/// ```
/// use httprib::http::{Response, StatusCode};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> std::io::Result<()> {
/// let response = Response::new(StatusCode::Ok)
///     .header("Content-Type", "application/json")
///     .body(r#"{"status":"ok"}"#);
///
/// let mut wire = Vec::new();
/// response.write_to(&mut wire).await?;
/// let text = String::from_utf8(wire).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.contains("Content-Length: 15\r\n"));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    payload: Payload,
    keep_alive: bool,
}

impl Response {
    /// Creates a new response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            payload: Payload::Buffered(Vec::new()),
            keep_alive: true,
        }
    }

    /// Sets a response header, replacing any earlier value of the same name.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Sets a header in place.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.set(name, value);
    }

    /// Appends a header in place without touching existing values of the same name.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name, value);
    }

    /// Sets a header only if the response does not carry one of that name yet.
    pub fn default_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.set_default(name, value);
    }

    /// Returns the response headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Sets the response body from a string.
    ///
    /// `Content-Length` is written automatically by [`write_to`](Self::write_to).
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.payload = Payload::Buffered(body.into().into_bytes());
        self
    }

    /// Sets the response body from raw bytes.
    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.payload = Payload::Buffered(body.into());
        self
    }

    /// Streams `len` bytes of `file` as the body.
    #[must_use]
    pub fn file(mut self, file: tokio::fs::File, len: u64) -> Self {
        self.payload = Payload::File { file, len };
        self
    }

    /// Serializes a JSON body and sets `Content-Type: application/json`.
    pub fn json<T: serde::Serialize>(self, value: &T) -> Result<Self, serde_json::Error> {
        let body = serde_json::to_vec(value)?;
        Ok(self
            .header("Content-Type", "application/json")
            .body_bytes(body))
    }

    /// Controls whether `Connection: keep-alive` or `Connection: close` is written.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Returns `true` if the connection may be reused after this response.
    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Returns the status code of this response.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the body length that will be announced in `Content-Length`.
    pub fn content_length(&self) -> u64 {
        match &self.payload {
            Payload::Buffered(bytes) => bytes.len() as u64,
            Payload::File { len, .. } => *len,
        }
    }

    /// Returns the in-memory body, or `None` for file-backed responses.
    pub fn buffered_body(&self) -> Option<&[u8]> {
        match &self.payload {
            Payload::Buffered(bytes) => Some(bytes),
            Payload::File { .. } => None,
        }
    }

    /// Serializes the status line and headers.
    ///
    /// Adds `Content-Type: text/plain; charset=utf-8` for a non-empty body when
    /// no type was set, the `Connection` header, and `Content-Length` last.
    fn head_bytes(&mut self) -> BytesMut {
        let content_length = self.content_length();

        if content_length > 0 {
            self.headers
                .set_default("Content-Type", "text/plain; charset=utf-8");
        }
        self.headers.remove("content-length");
        let connection = if self.keep_alive {
            "keep-alive"
        } else {
            "close"
        };
        self.headers.set("Connection", connection);

        let mut buf = BytesMut::with_capacity(128 + self.headers.len() * 64);
        buf.put(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                self.status.canonical_reason()
            )
            .as_bytes(),
        );
        buf.put(self.headers.to_string().as_bytes());
        buf.put(format!("Content-Length: {content_length}\r\n\r\n").as_bytes());
        buf
    }

    /// Writes the full response to `writer` and returns the body bytes written.
    pub async fn write_to<W>(mut self, writer: &mut W) -> std::io::Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let head = self.head_bytes();
        writer.write_all(&head).await?;

        let written = match self.payload {
            Payload::Buffered(bytes) => {
                writer.write_all(&bytes).await?;
                bytes.len() as u64
            }
            Payload::File { file, len } => {
                let mut limited = tokio::io::AsyncReadExt::take(file, len);
                let copied = tokio::io::copy(&mut limited, writer).await?;
                if copied < len {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!("file shrank while streaming: {copied} of {len} bytes"),
                    ));
                }
                copied
            }
        };
        writer.flush().await?;
        Ok(written)
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}
