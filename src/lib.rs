//! # httprib
//!
//! An embeddable async HTTP/1.1 dispatcher. Routes live in a segment trie
//! with `{name}` wildcards; requests that match no route fall back to files
//! under a document root.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use httprib::{Dispatcher, Response, RouteTable, Server, ServerConfig, StatusCode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut routes = RouteTable::new();
//!     routes.get("/api/{action}", |ctx| async move {
//!         let action = ctx.params().get("action").unwrap_or_default().to_owned();
//!         Response::new(StatusCode::Ok).body(format!("action: {action}"))
//!     });
//!
//!     let config = ServerConfig::default().with_document_root("./public");
//!     let dispatcher = Dispatcher::new(Arc::new(routes), config)?;
//!     Server::bind("127.0.0.1:8080").await?.serve(dispatcher).await?;
//!     Ok(())
//! }
//! ```

pub mod access_log;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod http;
pub mod router;
pub mod server;
pub mod static_files;

pub use config::{AccessLogTarget, ConfigError, ServerConfig};
pub use context::Context;
pub use dispatch::{Dispatcher, Incoming};
pub use http::{BodyError, BodyStream, Headers, Method, Request, Response, StatusCode};
pub use router::{HandlerError, MethodFilter, RouteOptions, RouteTable};
pub use server::{Server, ServerError};
