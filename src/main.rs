//! Refront - main entry point

use anyhow::{Context, Result};
use clap::Parser;
use refront::{Origin, ProxyConfig, ProxyEngine, RewriteRules};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Refront - a URL-rewriting reverse proxy
#[derive(Parser, Debug)]
#[command(name = "refront")]
#[command(author = "Refront Contributors")]
#[command(version = "1.0.0")]
#[command(about = "Republish a backend site under a new public origin")]
struct Args {
    /// Backend origin to front, e.g. https://backend.example
    #[arg(long, env = "BACKEND_ORIGIN")]
    backend_origin: String,

    /// Fixed public origin; derived from each request's Host header when
    /// not set
    #[arg(long, env = "PUBLIC_ORIGIN")]
    public_origin: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value = "8080")]
    port: u16,

    /// Bound on the wait for a backend response, in seconds
    #[arg(long, env = "BACKEND_TIMEOUT_SECS", default_value = "30")]
    backend_timeout_secs: u64,

    /// Optional JSON rules file (redirect statuses, tag/attribute table)
    #[arg(long, env = "RULES_FILE")]
    rules: Option<PathBuf>,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting Refront v1.0.0");

    let backend_origin =
        Origin::parse(&args.backend_origin).context("invalid --backend-origin")?;
    info!("Backend origin: {}", backend_origin);

    let public_origin = args
        .public_origin
        .as_deref()
        .map(Origin::parse)
        .transpose()
        .context("invalid --public-origin")?;
    match &public_origin {
        Some(origin) => info!("Public origin: {}", origin),
        None => info!("Public origin derived per request"),
    }

    let rules = match &args.rules {
        Some(path) => RewriteRules::from_file(path)?,
        None => RewriteRules::default(),
    };

    let engine = Arc::new(ProxyEngine::new(ProxyConfig {
        backend_origin,
        public_origin,
        backend_timeout: Duration::from_secs(args.backend_timeout_secs),
        rules,
    })?);

    let addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse()?;
    refront::server::run(engine, addr).await
}
