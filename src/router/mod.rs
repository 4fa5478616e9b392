//! Routing information base: a segment trie mapping path patterns to handlers.
//!
//! Every registered pattern becomes a path through the trie:
//!
//! | Pattern            | Example match      | Captured params      |
//! |--------------------|--------------------|----------------------|
//! | `/api/upload`      | `/api/upload`      | *(none)*             |
//! | `/api/{action}`    | `/api/query`       | `action → "query"`   |
//! | `/{user}/profile`  | `/alice/profile`   | `user → "alice"`     |
//!
//! Literal children are keyed by segment text; each node has at most one
//! wildcard child shared by every `{name}` segment registered at that depth.
//! Matching prefers a literal child at every level, so the most specific route
//! wins without priority weights.
//!
//! The table is built with `&mut self` during start-up and then shared as an
//! `Arc<RouteTable>`; nothing mutates it while requests are served.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;
use crate::http::{Method, Response};

pub mod matcher;
pub mod pattern;

pub use matcher::RouteMatch;
pub use pattern::{RoutePattern, Segment};

/// Error type a handler may fail with. The dispatcher turns it into a `500`.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Boxed future returned by a type-erased [`Handler`].
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Response, HandlerError>> + Send>>;

/// Type-erased async handler stored in the trie.
///
/// In practice you never construct this type directly; pass a closure or an
/// `async fn` to [`RouteTable::route`] and friends.
pub type Handler = Arc<dyn Fn(Context) -> HandlerFuture + Send + Sync + 'static>;

/// Values a handler future may resolve to.
///
/// Implemented for [`Response`] and for `Result<Response, E>` with any error
/// convertible into [`HandlerError`], so handlers can use `?`.
pub trait IntoOutcome {
    fn into_outcome(self) -> Result<Response, HandlerError>;
}

impl IntoOutcome for Response {
    fn into_outcome(self) -> Result<Response, HandlerError> {
        Ok(self)
    }
}

impl<E> IntoOutcome for Result<Response, E>
where
    E: Into<HandlerError>,
{
    fn into_outcome(self) -> Result<Response, HandlerError> {
        self.map_err(Into::into)
    }
}

/// The set of methods a route accepts.
///
/// Converts from the usual spellings: an empty string or empty list accepts
/// everything, a name or list of names restricts to those (uppercased).
///
/// # Examples
///
/// ```
/// use httprib::router::MethodFilter;
/// use httprib::http::Method;
///
/// assert_eq!(MethodFilter::from(""), MethodFilter::Any);
/// let only = MethodFilter::from(["get", "POST", "post"]);
/// assert!(only.allows(&Method::Get));
/// assert!(!only.allows(&Method::Delete));
/// assert_eq!(only.allow_header().as_deref(), Some("GET,POST"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MethodFilter {
    /// Accept every method.
    #[default]
    Any,
    /// Accept only these, kept in registration order without duplicates.
    Only(Vec<Method>),
}

impl MethodFilter {
    fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        Self::from_methods(
            names
                .into_iter()
                .filter(|name| !name.trim().is_empty())
                .map(Method::normalized),
        )
    }

    fn from_methods(methods: impl IntoIterator<Item = Method>) -> Self {
        let mut unique: Vec<Method> = Vec::new();
        for method in methods {
            if !unique.contains(&method) {
                unique.push(method);
            }
        }
        if unique.is_empty() {
            MethodFilter::Any
        } else {
            MethodFilter::Only(unique)
        }
    }

    pub fn allows(&self, method: &Method) -> bool {
        match self {
            MethodFilter::Any => true,
            MethodFilter::Only(methods) => methods.contains(method),
        }
    }

    /// Value for the `Allow` header, or `None` when every method is accepted.
    pub fn allow_header(&self) -> Option<String> {
        match self {
            MethodFilter::Any => None,
            MethodFilter::Only(methods) => Some(
                methods
                    .iter()
                    .map(Method::as_str)
                    .collect::<Vec<_>>()
                    .join(","),
            ),
        }
    }
}

impl From<&str> for MethodFilter {
    fn from(name: &str) -> Self {
        Self::from_names([name])
    }
}

impl From<&[&str]> for MethodFilter {
    fn from(names: &[&str]) -> Self {
        Self::from_names(names.iter().copied())
    }
}

impl<const N: usize> From<[&str; N]> for MethodFilter {
    fn from(names: [&str; N]) -> Self {
        Self::from_names(names)
    }
}

impl From<Vec<&str>> for MethodFilter {
    fn from(names: Vec<&str>) -> Self {
        Self::from_names(names)
    }
}

impl From<Method> for MethodFilter {
    fn from(method: Method) -> Self {
        Self::from_methods([method])
    }
}

impl From<Vec<Method>> for MethodFilter {
    fn from(methods: Vec<Method>) -> Self {
        Self::from_methods(methods)
    }
}

/// Per-route dispatch options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteOptions {
    /// Read the whole body before calling the handler (default), or hand the
    /// handler an unconsumed [`BodyStream`](crate::http::BodyStream).
    pub buffer_body: bool,
}

impl Default for RouteOptions {
    fn default() -> Self {
        Self { buffer_body: true }
    }
}

impl RouteOptions {
    /// Options for a handler that reads the body itself.
    pub fn streaming() -> Self {
        Self { buffer_body: false }
    }
}

/// Everything stored at a terminal trie node.
pub struct RouteDescriptor {
    pattern: RoutePattern,
    methods: MethodFilter,
    handler: Handler,
    options: RouteOptions,
}

impl RouteDescriptor {
    pub fn pattern(&self) -> &RoutePattern {
        &self.pattern
    }

    pub fn methods(&self) -> &MethodFilter {
        &self.methods
    }

    pub fn options(&self) -> RouteOptions {
        self.options
    }

    pub(crate) fn handler(&self) -> &Handler {
        &self.handler
    }
}

impl fmt::Debug for RouteDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteDescriptor")
            .field("pattern", &self.pattern.as_str())
            .field("methods", &self.methods)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub(crate) struct TrieNode {
    pub(crate) literal: HashMap<String, TrieNode>,
    pub(crate) wildcard: Option<Box<TrieNode>>,
    pub(crate) terminal: Option<Arc<RouteDescriptor>>,
}

impl TrieNode {
    fn count_terminals(&self) -> usize {
        usize::from(self.terminal.is_some())
            + self
                .literal
                .values()
                .map(TrieNode::count_terminals)
                .sum::<usize>()
            + self
                .wildcard
                .as_deref()
                .map_or(0, TrieNode::count_terminals)
    }
}

/// The routing information base.
///
/// # Examples
///
/// ```
/// use httprib::router::{RouteOptions, RouteTable};
/// use httprib::http::{Response, StatusCode};
///
/// let mut table = RouteTable::new();
/// table.route("/api/{action}", "", |_ctx| async { Response::new(StatusCode::Ok) }, RouteOptions::default());
/// table.route("/api/upload", ["POST"], |_ctx| async { Response::new(StatusCode::Created) }, RouteOptions::streaming());
///
/// assert_eq!(table.len(), 2);
/// let hit = table.find("/api/query", false).unwrap();
/// assert_eq!(hit.params().get("action"), Some("query"));
/// ```
#[derive(Debug, Default)]
pub struct RouteTable {
    root: TrieNode,
}

impl RouteTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `pattern`.
    ///
    /// `methods` limits the accepted request methods; an empty value accepts
    /// all of them. Registering the same pattern again replaces the earlier
    /// route, including its methods and options.
    ///
    /// A parameter name should appear once per pattern. If it repeats
    /// (`/{id}/x/{id}`), a warning is logged and the rightmost capture is the
    /// value seen through [`Parameters`](crate::context::Parameters).
    pub fn route<H, F>(
        &mut self,
        pattern: &str,
        methods: impl Into<MethodFilter>,
        handler: H,
        options: RouteOptions,
    ) -> &mut Self
    where
        H: Fn(Context) -> F + Send + Sync + 'static,
        F: Future + Send + 'static,
        F::Output: IntoOutcome,
    {
        let pattern = RoutePattern::parse(pattern);
        if let Some(name) = pattern.duplicate_param() {
            tracing::warn!(
                pattern = %pattern,
                name,
                "parameter name repeats; the last capture wins"
            );
        }
        let handler: Handler = Arc::new(move |ctx: Context| -> HandlerFuture {
            let fut = handler(ctx);
            Box::pin(async move { fut.await.into_outcome() })
        });

        let mut node = &mut self.root;
        for segment in pattern.segments() {
            node = match segment {
                Segment::Literal(text) => node.literal.entry(text.clone()).or_default(),
                Segment::Parameter(_) => node.wildcard.get_or_insert_with(Box::default).as_mut(),
            };
        }

        let methods = methods.into();
        if node.terminal.is_some() {
            tracing::debug!(pattern = %pattern, "route re-registered, replacing previous handler");
        }
        node.terminal = Some(Arc::new(RouteDescriptor {
            pattern,
            methods,
            handler,
            options,
        }));
        self
    }

    /// Registers a `GET`-only route with default options.
    pub fn get<H, F>(&mut self, pattern: &str, handler: H) -> &mut Self
    where
        H: Fn(Context) -> F + Send + Sync + 'static,
        F: Future + Send + 'static,
        F::Output: IntoOutcome,
    {
        self.route(pattern, Method::Get, handler, RouteOptions::default())
    }

    /// Registers a `POST`-only route with default options.
    pub fn post<H, F>(&mut self, pattern: &str, handler: H) -> &mut Self
    where
        H: Fn(Context) -> F + Send + Sync + 'static,
        F: Future + Send + 'static,
        F::Output: IntoOutcome,
    {
        self.route(pattern, Method::Post, handler, RouteOptions::default())
    }

    /// Registers a route accepting every method with default options.
    pub fn any<H, F>(&mut self, pattern: &str, handler: H) -> &mut Self
    where
        H: Fn(Context) -> F + Send + Sync + 'static,
        F: Future + Send + 'static,
        F::Output: IntoOutcome,
    {
        self.route(pattern, MethodFilter::Any, handler, RouteOptions::default())
    }

    /// Looks up a decoded request path.
    ///
    /// `file_exists` reports whether a static file exists for the path; it
    /// decides ties between a file and a route whose last segment is a
    /// parameter (see [`matcher`]).
    pub fn find<'t, 'p>(&'t self, path: &'p str, file_exists: bool) -> Option<RouteMatch<'t, 'p>> {
        let segments: Vec<&str> = pattern::split_segments(path).collect();
        matcher::find(&self.root, &segments, file_exists)
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.root.count_terminals()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
