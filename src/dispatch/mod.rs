//! Per-request dispatch: route lookup, method check, body handling, handler
//! invocation and static-file fallback.
//!
//! For every request the [`Dispatcher`]:
//!
//! 1. resolves the decoded path against the document root and checks whether
//!    something exists there;
//! 2. looks the path up in the [`RouteTable`], passing that existence result so
//!    a file can win over a trailing `{param}` route;
//! 3. on a match, answers `405` with an `Allow` header if the method is not
//!    accepted, otherwise buffers or forwards the body and runs the handler;
//! 4. without a match, streams the file if there is one, else answers `404`.
//!
//! Every response gets `Content-Type: text/plain` and the configured `Server`
//! header unless the branch that produced it set its own.
//!
//! # Failure boundary
//!
//! The handler runs in its own Tokio task. An `Err` result or a panic inside
//! that task becomes a `500` for this request only; the handler never produced
//! a response in either case, so there is nothing half-written to clean up.
//! Work the handler spawns separately and that fails after the handler
//! returned is outside the boundary and does not affect the response.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::access_log::AccessLog;
use crate::config::{ConfigError, ServerConfig};
use crate::context::{Body, Context, Parameters};
use crate::http::{BodyError, BodyStream, Request, Response, StatusCode};
use crate::router::{RouteDescriptor, RouteTable};
use crate::static_files::StaticFiles;

/// One request as handed over by the transport.
#[derive(Debug)]
pub struct Incoming {
    pub request: Request,
    pub body: BodyStream,
    pub remote_addr: SocketAddr,
}

/// The request handler built from a frozen route table and a configuration.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use httprib::{Dispatcher, Response, RouteTable, ServerConfig, StatusCode};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut routes = RouteTable::new();
/// routes.get("/ping", |_ctx| async { Response::new(StatusCode::Ok).body("pong") });
///
/// let config = ServerConfig::default().with_document_root("/srv/www");
/// let dispatcher = Dispatcher::new(Arc::new(routes), config)?;
/// # let _ = dispatcher;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Dispatcher {
    routes: Arc<RouteTable>,
    files: StaticFiles,
    server_name: String,
    max_body_bytes: usize,
    body_timeout: Duration,
    access_log: AccessLog,
}

impl Dispatcher {
    /// Builds a dispatcher. Fails only if the access-log file cannot be opened.
    pub fn new(routes: Arc<RouteTable>, config: ServerConfig) -> Result<Self, ConfigError> {
        let access_log = AccessLog::open(&config.access_log)?;
        let body_timeout = config.body_timeout();
        Ok(Self {
            routes,
            files: StaticFiles::new(
                config.document_root,
                config.default_document,
                config.mime_types,
            ),
            server_name: config.server_name,
            max_body_bytes: config.max_body_bytes,
            body_timeout,
            access_log,
        })
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn access_log(&self) -> &AccessLog {
        &self.access_log
    }

    /// How long the transport waits for each read of a request body.
    pub fn body_timeout(&self) -> Duration {
        self.body_timeout
    }

    /// Produces the response for one request.
    pub async fn dispatch(&self, incoming: Incoming) -> Response {
        let response = self.respond(incoming).await;
        self.finish(response)
    }

    /// Applies the default `Content-Type` and `Server` headers unless the
    /// response already carries them. The transport also runs responses it
    /// produces itself (400, 431, 501) through here.
    pub fn finish(&self, mut response: Response) -> Response {
        response.default_header("Content-Type", "text/plain");
        response.default_header("Server", self.server_name.as_str());
        response
    }

    async fn respond(&self, incoming: Incoming) -> Response {
        let Incoming {
            request,
            body,
            remote_addr,
        } = incoming;

        let candidate = self.files.resolve(request.path());
        let file_exists = match &candidate {
            Some(path) => self.files.exists(path).await,
            None => false,
        };

        let matched = self
            .routes
            .find(request.path(), file_exists)
            .map(|m| (Arc::clone(m.route()), m.params()));

        if let Some((route, params)) = matched {
            return self.invoke(route, params, request, body, remote_addr).await;
        }

        match candidate {
            Some(path) if file_exists => self.serve_file(&path).await,
            _ => {
                debug!(path = %request.path(), "no route or file");
                Response::new(StatusCode::NotFound)
            }
        }
    }

    async fn invoke(
        &self,
        route: Arc<RouteDescriptor>,
        params: Parameters,
        request: Request,
        body: BodyStream,
        remote_addr: SocketAddr,
    ) -> Response {
        if !route.methods().allows(request.method()) {
            let allow = route.methods().allow_header().unwrap_or_default();
            return Response::new(StatusCode::MethodNotAllowed).header("Allow", allow);
        }

        let mut ctx = Context::new(request, remote_addr);
        ctx.bind_route(route.pattern().as_str(), params);

        if route.options().buffer_body {
            match body.collect(self.max_body_bytes).await {
                Ok(bytes) => ctx.attach_body(Body::Buffered(bytes)),
                Err(e) => return body_error_response(&e),
            }
        } else {
            ctx.attach_body(Body::Streaming(body));
        }

        let handler = Arc::clone(route.handler());
        let outcome = tokio::spawn(async move { handler(ctx).await }).await;

        match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                error!(route = %route.pattern(), error = %e, "handler failed");
                Response::new(StatusCode::InternalServerError)
            }
            Err(join_error) => {
                if join_error.is_panic() {
                    error!(route = %route.pattern(), "handler panicked");
                } else {
                    error!(route = %route.pattern(), error = %join_error, "handler task aborted");
                }
                Response::new(StatusCode::InternalServerError)
            }
        }
    }

    async fn serve_file(&self, path: &Path) -> Response {
        match self.files.open(path).await {
            Ok(Some((file, len))) => Response::new(StatusCode::Ok)
                .header("Content-Type", self.files.content_type(path))
                .file(file, len),
            Ok(None) => Response::new(StatusCode::NotFound),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to open static file");
                Response::new(StatusCode::InternalServerError)
            }
        }
    }
}

fn body_error_response(err: &BodyError) -> Response {
    let status = match err {
        BodyError::TooLarge { .. } => StatusCode::PayloadTooLarge,
        BodyError::Timeout => StatusCode::RequestTimeout,
        BodyError::Io(_) | BodyError::Truncated { .. } => StatusCode::BadRequest,
    };
    warn!(error = %err, status = status.as_u16(), "request body rejected");
    Response::new(status).keep_alive(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use crate::router::RouteOptions;
    use crate::static_files::tests::scratch_dir;

    fn incoming(method: &str, target: &str, body: &'static str) -> Incoming {
        let raw = format!(
            "{method} {target} HTTP/1.1\r\nHost: localhost\r\nContent-Length: {}\r\n\r\n",
            body.len()
        );
        let (request, _) = Request::parse(raw.as_bytes()).unwrap();
        Incoming {
            request,
            body: BodyStream::from_bytes(body),
            remote_addr: "127.0.0.1:40000".parse().unwrap(),
        }
    }

    fn dispatcher(routes: RouteTable, root: PathBuf) -> Dispatcher {
        let config = ServerConfig::default()
            .with_document_root(root)
            .with_server_name("httprib-test")
            .with_max_body_bytes(16);
        Dispatcher::new(Arc::new(routes), config).unwrap()
    }

    fn text(response: &Response) -> &str {
        std::str::from_utf8(response.buffered_body().unwrap()).unwrap()
    }

    fn echo_params(ctx: Context) -> impl Future<Output = Response> + Send {
        let mut pairs: Vec<String> = ctx.params().iter().map(|(k, v)| format!("{k}={v}")).collect();
        pairs.sort();
        async move { Response::new(StatusCode::Ok).body(pairs.join("&")) }
    }

    #[tokio::test]
    async fn parameter_route_extracts_values_and_query() {
        let mut routes = RouteTable::new();
        routes.any("/api/{action}", |ctx: Context| async move {
            let body = serde_json::json!({
                "action": ctx.params().get("action"),
                "id": ctx.query().get("id"),
                "route": ctx.route(),
            });
            Response::new(StatusCode::Ok).json(&body)
        });
        let d = dispatcher(routes, scratch_dir("dispatch-api"));

        let res = d.dispatch(incoming("GET", "/api/query?id=123&page=2", "")).await;
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(res.headers().get("content-type"), Some("application/json"));
        let json: serde_json::Value = serde_json::from_slice(res.buffered_body().unwrap()).unwrap();
        assert_eq!(json["action"], "query");
        assert_eq!(json["id"], "123");
        assert_eq!(json["route"], "/api/{action}");
    }

    #[tokio::test]
    async fn method_mismatch_is_405_with_allow() {
        let mut routes = RouteTable::new();
        routes.route(
            "/api/upload",
            ["POST"],
            |_ctx| async { Response::new(StatusCode::Ok) },
            RouteOptions::default(),
        );
        let d = dispatcher(routes, scratch_dir("dispatch-405"));

        let res = d.dispatch(incoming("GET", "/api/upload", "")).await;
        assert_eq!(res.status(), StatusCode::MethodNotAllowed);
        assert_eq!(res.headers().get("allow"), Some("POST"));

        let res = d.dispatch(incoming("POST", "/api/upload", "")).await;
        assert_eq!(res.status(), StatusCode::Ok);
    }

    #[tokio::test]
    async fn allow_lists_every_registered_method() {
        let mut routes = RouteTable::new();
        routes.route("/{user}/profile", ["GET", "POST"], echo_params, RouteOptions::streaming());
        let d = dispatcher(routes, scratch_dir("dispatch-allow"));

        let res = d.dispatch(incoming("DELETE", "/bob/profile", "")).await;
        assert_eq!(res.headers().get("allow"), Some("GET,POST"));
    }

    #[tokio::test]
    async fn profile_route_defaults_to_200_without_body() {
        let mut routes = RouteTable::new();
        routes.route(
            "/{user}/profile",
            ["GET", "POST"],
            |ctx: Context| async move {
                assert_eq!(ctx.params().get("user"), Some("alice"));
                Response::default()
            },
            RouteOptions::streaming(),
        );
        let d = dispatcher(routes, scratch_dir("dispatch-profile"));

        let res = d.dispatch(incoming("GET", "/alice/profile", "")).await;
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(res.content_length(), 0);
    }

    #[tokio::test]
    async fn literal_route_wins_over_sibling_wildcard() {
        let mut routes = RouteTable::new();
        routes.any("/api/{action}", |_ctx| async { Response::new(StatusCode::Accepted) });
        routes.any("/api/status", |_ctx| async { Response::new(StatusCode::Ok) });
        let d = dispatcher(routes, scratch_dir("dispatch-literal"));

        assert_eq!(d.dispatch(incoming("GET", "/api/status", "")).await.status(), StatusCode::Ok);
        assert_eq!(
            d.dispatch(incoming("GET", "/api/other", "")).await.status(),
            StatusCode::Accepted
        );
    }

    #[tokio::test]
    async fn static_file_beats_terminal_wildcard() {
        let root = scratch_dir("dispatch-file");
        std::fs::write(root.join("about.html"), "<h1>about</h1>").unwrap();
        let mut routes = RouteTable::new();
        routes.any("/{page}", |_ctx| async { Response::new(StatusCode::Accepted) });
        let d = dispatcher(routes, root);

        let res = d.dispatch(incoming("GET", "/about.html", "")).await;
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(res.headers().get("content-type"), Some("text/html"));
        assert_eq!(res.content_length(), 14);
        assert!(res.buffered_body().is_none());

        let res = d.dispatch(incoming("GET", "/contact.html", "")).await;
        assert_eq!(res.status(), StatusCode::Accepted);
    }

    #[tokio::test]
    async fn route_through_non_terminal_wildcard_ignores_file() {
        let root = scratch_dir("dispatch-nonterminal");
        std::fs::create_dir(root.join("alice")).unwrap();
        std::fs::write(root.join("alice").join("profile"), "on disk").unwrap();
        std::fs::write(root.join("bob"), "bob on disk").unwrap();
        let mut routes = RouteTable::new();
        routes.any("/{user}/profile", echo_params);
        let d = dispatcher(routes, root);

        let res = d.dispatch(incoming("GET", "/alice/profile", "")).await;
        assert_eq!(text(&res), "user=alice");

        // `/{user}` alone is not a route, so the file is served.
        let res = d.dispatch(incoming("GET", "/bob", "")).await;
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(res.content_length(), 11);
    }

    #[tokio::test]
    async fn directory_paths_use_default_document() {
        let root = scratch_dir("dispatch-index");
        std::fs::create_dir(root.join("docs")).unwrap();
        std::fs::write(root.join("docs").join("index.html"), "docs").unwrap();
        let d = dispatcher(RouteTable::new(), root);

        let res = d.dispatch(incoming("GET", "/docs/", "")).await;
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(res.headers().get("content-type"), Some("text/html"));

        // Exists, but it is a directory.
        let res = d.dispatch(incoming("GET", "/docs", "")).await;
        assert_eq!(res.status(), StatusCode::NotFound);
    }

    #[tokio::test]
    async fn directory_does_not_shadow_terminal_wildcard() {
        let root = scratch_dir("dispatch-dir-wildcard");
        std::fs::create_dir(root.join("docs")).unwrap();
        let mut routes = RouteTable::new();
        routes.any("/{page}", |ctx: Context| async move {
            let page = ctx.params().get("page").unwrap_or_default().to_owned();
            Response::new(StatusCode::Ok).body(format!("page={page}"))
        });
        let d = dispatcher(routes, root);

        let res = d.dispatch(incoming("GET", "/docs", "")).await;
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(text(&res), "page=docs");
    }

    #[test]
    fn finish_fills_missing_defaults_only() {
        let d = dispatcher(RouteTable::new(), scratch_dir("dispatch-finish"));
        let res = d.finish(Response::new(StatusCode::NotImplemented));
        assert_eq!(res.headers().get("content-type"), Some("text/plain"));
        assert_eq!(res.headers().get("server"), Some("httprib-test"));

        let res = d.finish(Response::new(StatusCode::Ok).header("Server", "custom"));
        assert_eq!(res.headers().get("server"), Some("custom"));
    }

    #[tokio::test]
    async fn unknown_extension_served_as_text_plain() {
        let root = scratch_dir("dispatch-ext");
        std::fs::write(root.join("notes.rst"), "notes").unwrap();
        let d = dispatcher(RouteTable::new(), root);

        let res = d.dispatch(incoming("GET", "/notes.rst", "")).await;
        assert_eq!(res.headers().get("content-type"), Some("text/plain"));
    }

    #[tokio::test]
    async fn traversal_is_not_found() {
        let root = scratch_dir("dispatch-traversal");
        let d = dispatcher(RouteTable::new(), root.join("www"));
        std::fs::create_dir(root.join("www")).unwrap();
        std::fs::write(root.join("secret.txt"), "secret").unwrap();

        let res = d.dispatch(incoming("GET", "/../secret.txt", "")).await;
        assert_eq!(res.status(), StatusCode::NotFound);
        let res = d.dispatch(incoming("GET", "/%2e%2e/secret.txt", "")).await;
        assert_eq!(res.status(), StatusCode::NotFound);
    }

    #[tokio::test]
    async fn default_headers_apply_unless_overridden() {
        let mut routes = RouteTable::new();
        routes.any("/img", |_ctx| async {
            Response::new(StatusCode::Ok).header("Content-Type", "image/png")
        });
        let d = dispatcher(routes, scratch_dir("dispatch-headers"));

        let res = d.dispatch(incoming("GET", "/missing", "")).await;
        assert_eq!(res.status(), StatusCode::NotFound);
        assert_eq!(res.headers().get("content-type"), Some("text/plain"));
        assert_eq!(res.headers().get("server"), Some("httprib-test"));

        let res = d.dispatch(incoming("GET", "/img", "")).await;
        assert_eq!(res.headers().get("content-type"), Some("image/png"));
        assert_eq!(res.headers().get("server"), Some("httprib-test"));
    }

    #[tokio::test]
    async fn handler_failures_are_contained() {
        let mut routes = RouteTable::new();
        routes.any("/err", |_ctx| async {
            Err::<Response, _>(std::io::Error::other("database unreachable"))
        });
        routes.any("/panic", |_ctx: Context| async {
            if true {
                panic!("handler bug");
            }
            Response::default()
        });
        routes.any("/ok", |_ctx| async { Response::new(StatusCode::Ok) });
        let d = dispatcher(routes, scratch_dir("dispatch-fail"));

        let res = d.dispatch(incoming("GET", "/err", "")).await;
        assert_eq!(res.status(), StatusCode::InternalServerError);
        let res = d.dispatch(incoming("GET", "/panic", "")).await;
        assert_eq!(res.status(), StatusCode::InternalServerError);
        let res = d.dispatch(incoming("GET", "/ok", "")).await;
        assert_eq!(res.status(), StatusCode::Ok);
    }

    #[tokio::test]
    async fn buffered_route_receives_whole_body() {
        let mut routes = RouteTable::new();
        routes.post("/echo", |ctx: Context| async move {
            let body = ctx.body().cloned().unwrap_or_default();
            Response::new(StatusCode::Ok).body_bytes(body.to_vec())
        });
        let d = dispatcher(routes, scratch_dir("dispatch-buffer"));

        let res = d.dispatch(incoming("POST", "/echo", "hello")).await;
        assert_eq!(text(&res), "hello");

        let res = d.dispatch(incoming("POST", "/echo", "this body is far too long")).await;
        assert_eq!(res.status(), StatusCode::PayloadTooLarge);
        assert!(!res.is_keep_alive());
    }

    #[tokio::test]
    async fn streaming_route_reads_body_itself() {
        let mut routes = RouteTable::new();
        routes.route(
            "/upload",
            "POST",
            |mut ctx: Context| async move {
                assert!(ctx.body().is_none());
                let mut stream = ctx.take_body_stream().ok_or("no body stream")?;
                let mut total = 0;
                while let Some(chunk) = stream.chunk().await {
                    total += chunk?.len();
                }
                Ok::<_, Box<dyn std::error::Error + Send + Sync>>(
                    Response::new(StatusCode::Ok).body(total.to_string()),
                )
            },
            RouteOptions::streaming(),
        );
        let d = dispatcher(routes, scratch_dir("dispatch-stream"));

        // Streaming routes are not bound by the buffering limit.
        let res = d.dispatch(incoming("POST", "/upload", "this body is far too long")).await;
        assert_eq!(text(&res), "25");
    }

    #[tokio::test]
    async fn reregistered_route_uses_last_handler() {
        let mut routes = RouteTable::new();
        routes.any("/v", |_ctx| async { Response::new(StatusCode::Accepted) });
        routes.any("/v", |_ctx| async { Response::new(StatusCode::Created) });
        let d = dispatcher(routes, scratch_dir("dispatch-rereg"));

        let res = d.dispatch(incoming("GET", "/v", "")).await;
        assert_eq!(res.status(), StatusCode::Created);
    }
}
