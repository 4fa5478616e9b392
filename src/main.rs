//! `httprib` serves a directory over HTTP using the library's dispatcher.
//!
//! Configuration comes from an optional TOML file; `--root` overrides its
//! document root. Set `RUST_LOG` to adjust diagnostics (default
//! `httprib=info`).

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use httprib::{Dispatcher, Response, RouteTable, Server, ServerConfig, StatusCode};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "httprib")]
#[command(about = "Serve a directory with trie-routed HTTP dispatch", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    bind: String,

    /// Document root, overriding the configuration file
    #[arg(short, long)]
    root: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "httprib=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(root) = cli.root {
        config = config.with_document_root(root);
    }

    tracing::info!(
        document_root = %config.document_root.display(),
        server_name = %config.server_name,
        "configuration loaded"
    );

    let mut routes = RouteTable::new();
    routes.get("/_httprib/health", |_ctx| async {
        Response::new(StatusCode::Ok).body("ok")
    });

    let dispatcher = Dispatcher::new(Arc::new(routes), config)?;
    Server::bind(&cli.bind).await?.serve(dispatcher).await?;
    Ok(())
}
