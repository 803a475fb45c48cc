use anyhow::{Context, Result};
use axum::{Router, routing::get};
use clap::{Parser, Subcommand};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tower_http::cors::CorsLayer;
use tower_http::trace::{MakeSpan, TraceLayer};
use tracing::info;
use tracing_subscriber::prelude::*;
use uuid::Uuid;

mod cli;
mod config;
mod handlers;
mod metrics;
mod ws;

use share_registry::ShareRegistry;

use crate::config::{ServerConfig, load_config};
use crate::metrics::ServerMetrics;

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

#[derive(Parser)]
#[command(name = "lightbox")]
#[command(about = "Ephemeral image sharing between connected clients")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the share server in the foreground
    Server(ServerArgs),

    /// Share images until interrupted (they vanish when you stop)
    Share(ShareArgs),

    /// Search shared images and download a selection as a zip
    Fetch(FetchArgs),
}

#[derive(Parser)]
struct ServerArgs {
    /// Host to bind to
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Path to the config file (defaults to ./lightbox.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Parser)]
struct ShareArgs {
    /// Display name to share under
    #[arg(short, long)]
    name: String,

    /// Server WebSocket URL
    #[arg(short, long, default_value = "ws://127.0.0.1:9800/ws")]
    server: String,

    /// Image files or folders to share
    paths: Vec<PathBuf>,
}

#[derive(Parser)]
struct FetchArgs {
    /// Display name to connect under
    #[arg(short, long)]
    name: String,

    /// Server WebSocket URL
    #[arg(short, long, default_value = "ws://127.0.0.1:9800/ws")]
    server: String,

    /// Search query, matched fuzzily against `owner__filename` keys
    query: String,

    /// Download these exact keys instead of every search hit
    #[arg(long)]
    keys: Vec<String>,

    /// Where to write the zip archive
    #[arg(short, long, default_value = "images.zip")]
    out: PathBuf,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub registry: Arc<ShareRegistry>,
    /// Server runtime configuration
    pub config: Arc<ServerConfig>,
    /// Server metrics for observability
    pub metrics: Arc<ServerMetrics>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Server(args) => run_server(args).await,
        Commands::Share(args) => cli::share_command(&args.server, &args.name, &args.paths).await,
        Commands::Fetch(args) => {
            cli::fetch_command(&args.server, &args.name, &args.query, args.keys, &args.out).await
        }
    }
}

async fn run_server(args: ServerArgs) -> Result<()> {
    // Setup logging
    let default_directive = if args.debug {
        "lightbox=debug,tower_http=debug,info"
    } else {
        "lightbox=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    info!("Starting Lightbox - ephemeral image sharing");

    let file_config = load_config(args.config.as_deref())?;
    let server_config = Arc::new(ServerConfig::resolve(&file_config, args.host, args.port));
    info!(
        "Server config: max_upload={}MB",
        server_config.max_upload_bytes / (1024 * 1024)
    );

    let registry = Arc::new(ShareRegistry::with_upload_cap(
        server_config.max_upload_bytes,
    ));
    let metrics = Arc::new(ServerMetrics::new());

    let app_state = AppState {
        registry,
        config: server_config.clone(),
        metrics,
    };

    // Build routes
    let app = Router::new()
        .route("/ws", get(handlers::websocket_handler))
        // Health endpoints
        .route("/health", get(handlers::health_handler))
        .route("/health/live", get(handlers::health_live_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    let addr = format!("{}:{}", server_config.host, server_config.port).parse::<SocketAddr>()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Lightbox listening on ws://{}/ws", actual_addr);
    info!("  GET /ws      - share WebSocket (display name via x-display-name)");
    info!("  GET /health  - health probe");
    info!("  GET /metrics - server metrics");
    info!("State is in-memory only: shared images vanish with their owner's connection");

    // Create shutdown signal handler
    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("Received shutdown signal, cleaning up...");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error")?;

    info!("Shutdown complete");
    Ok(())
}
