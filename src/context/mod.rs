//! Per-request context handed to route handlers.
//!
//! A [`Context`] carries the parsed request head, the decoded query and path
//! parameters, the matched route pattern, and the body in whichever form the
//! route asked for.

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;

use crate::http::{BodyStream, Headers, Method, Request};

/// Path parameters extracted from the matched route, keyed by declared name.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Parameters {
    map: HashMap<String, String>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pairs declared names with captured values, left to right. A repeated
    /// name keeps its last value.
    pub fn from_pairs<N, V>(pairs: impl IntoIterator<Item = (N, V)>) -> Self
    where
        N: Into<String>,
        V: Into<String>,
    {
        Self {
            map: pairs
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        }
    }

    pub fn insert(&mut self, key: String, value: String) {
        self.map.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Decoded query-string parameters. Repeated keys keep every value in order.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    /// Decodes `application/x-www-form-urlencoded` pairs (`+` is a space,
    /// `%XX` escapes are expanded).
    pub fn parse(query: &str) -> Self {
        Self {
            pairs: url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect(),
        }
    }

    /// Returns the first value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.pairs
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// The request body as delivered to a handler.
#[derive(Debug)]
pub enum Body {
    /// The whole body, read before the handler ran.
    Buffered(Bytes),
    /// The body still on the wire; the handler reads it.
    Streaming(BodyStream),
}

/// Per-request state handed to a route handler.
#[derive(Debug)]
pub struct Context {
    request: Request,
    remote_addr: SocketAddr,
    query: QueryParams,
    params: Parameters,
    route: Option<String>,
    body: Option<Body>,
}

impl Context {
    /// Creates a context for `request` with no route or body attached yet.
    pub fn new(request: Request, remote_addr: SocketAddr) -> Self {
        let query = request
            .query_string()
            .map(QueryParams::parse)
            .unwrap_or_default();
        Self {
            request,
            remote_addr,
            query,
            params: Parameters::new(),
            route: None,
            body: None,
        }
    }

    pub(crate) fn bind_route(&mut self, pattern: &str, params: Parameters) {
        self.route = Some(pattern.to_owned());
        self.params = params;
    }

    pub(crate) fn attach_body(&mut self, body: Body) {
        self.body = Some(body);
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn method(&self) -> &Method {
        self.request.method()
    }

    /// The request target as received, including any query string.
    pub fn target(&self) -> &str {
        self.request.target()
    }

    /// The decoded request path.
    pub fn path(&self) -> &str {
        self.request.path()
    }

    pub fn headers(&self) -> &Headers {
        self.request.headers()
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn query(&self) -> &QueryParams {
        &self.query
    }

    pub fn params(&self) -> &Parameters {
        &self.params
    }

    /// The registered pattern that matched, e.g. `/api/{action}`.
    pub fn route(&self) -> Option<&str> {
        self.route.as_deref()
    }

    /// The buffered body, or `None` when the route streams its body.
    pub fn body(&self) -> Option<&Bytes> {
        match &self.body {
            Some(Body::Buffered(bytes)) => Some(bytes),
            _ => None,
        }
    }

    /// Takes the unconsumed body stream. Returns `None` for buffered routes
    /// and on every call after the first.
    pub fn take_body_stream(&mut self) -> Option<BodyStream> {
        match self.body.take() {
            Some(Body::Streaming(stream)) => Some(stream),
            other => {
                self.body = other;
                None
            }
        }
    }

    /// Deserializes the buffered body as JSON.
    pub fn json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: serde::de::DeserializeOwned,
    {
        let body = self.body().map(|b| &b[..]).unwrap_or_default();
        serde_json::from_slice(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(raw: &str) -> Context {
        let (req, _) = Request::parse(raw.as_bytes()).unwrap();
        Context::new(req, "127.0.0.1:9000".parse().unwrap())
    }

    #[test]
    fn query_is_form_decoded() {
        let ctx = context("GET /s?q=rust+lang&tag=a%26b&tag=c HTTP/1.1\r\n\r\n");
        assert_eq!(ctx.query().get("q"), Some("rust lang"));
        assert_eq!(ctx.query().get_all("tag").collect::<Vec<_>>(), vec!["a&b", "c"]);
        assert_eq!(ctx.query().get("missing"), None);
    }

    #[test]
    fn no_query_string_is_empty() {
        let ctx = context("GET / HTTP/1.1\r\n\r\n");
        assert!(ctx.query().is_empty());
        assert!(ctx.params().is_empty());
        assert_eq!(ctx.route(), None);
    }

    #[test]
    fn bound_route_exposes_params() {
        let mut ctx = context("GET /alice/profile HTTP/1.1\r\n\r\n");
        ctx.bind_route("/{user}/profile", Parameters::from_pairs([("user", "alice")]));
        assert_eq!(ctx.route(), Some("/{user}/profile"));
        assert_eq!(ctx.params().get("user"), Some("alice"));
        assert_eq!(ctx.params().len(), 1);
    }

    #[test]
    fn json_reads_buffered_body() {
        #[derive(serde::Deserialize)]
        struct Login {
            user: String,
        }
        let mut ctx = context("POST /login HTTP/1.1\r\n\r\n");
        ctx.attach_body(Body::Buffered(Bytes::from_static(br#"{"user":"bob"}"#)));
        let login: Login = ctx.json().unwrap();
        assert_eq!(login.user, "bob");
    }

    #[test]
    fn stream_taken_once() {
        let mut ctx = context("POST /upload HTTP/1.1\r\n\r\n");
        ctx.attach_body(Body::Streaming(BodyStream::from_bytes("abc")));
        assert!(ctx.body().is_none());
        assert!(ctx.take_body_stream().is_some());
        assert!(ctx.take_body_stream().is_none());
    }

    #[test]
    fn buffered_body_not_taken_as_stream() {
        let mut ctx = context("POST /upload HTTP/1.1\r\n\r\n");
        ctx.attach_body(Body::Buffered(Bytes::from_static(b"abc")));
        assert!(ctx.take_body_stream().is_none());
        assert_eq!(ctx.body().map(|b| &b[..]), Some(&b"abc"[..]));
    }
}
