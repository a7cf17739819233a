//! Unmark HTTP server
//!
//! Thin web front for `unmark-core`. Provides:
//!
//! - `GET /health` (also `/api/health`)
//! - `POST /api/remove-watermark`: multipart PDF upload, runs detection and
//!   removal, answers with counts and a download link
//! - `GET /api/download/:filename`: serves a previously cleaned file
//!
//! Uploads are written to a temporary file that is removed once the request
//! is done. Cleaned files are staged next to their final name and only moved
//! into place when removal finished within the timeout.

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use clap::Parser;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use unmark_core::{WatermarkConfig, DEFAULT_CORNER_THRESHOLD, DEFAULT_TARGET_DOMAIN};

mod api;
mod error;

use api::{handle_download, handle_health, handle_remove_watermark};

/// Origins always allowed besides `--frontend-url`
const LOCAL_FRONTENDS: [&str; 2] = ["http://localhost:3000", "http://127.0.0.1:3000"];

/// Command-line arguments for the unmark server
#[derive(Parser, Debug)]
#[command(name = "unmark-server")]
#[command(about = "Strips corner watermarks from uploaded PDFs")]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "8000")]
    port: u16,

    /// Host address to bind to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Domain whose links mark the watermark
    #[arg(long, env = "UNMARK_TARGET_DOMAIN", default_value = DEFAULT_TARGET_DOMAIN)]
    target_domain: String,

    /// Fraction of page width/height where the corner region starts
    #[arg(long, env = "UNMARK_CORNER_THRESHOLD", default_value_t = DEFAULT_CORNER_THRESHOLD)]
    corner_threshold: f64,

    /// Directory for cleaned files
    #[arg(long, env = "UNMARK_OUTPUT_DIR", default_value = "outputs")]
    output_dir: PathBuf,

    /// Frontend origin allowed by CORS
    #[arg(long, env = "FRONTEND_URL", default_value = "http://localhost:3000")]
    frontend_url: String,

    /// Processing timeout in milliseconds
    #[arg(long, default_value = "60000")]
    timeout_ms: u64,

    /// Largest accepted upload in bytes
    #[arg(long, default_value = "52428800")]
    max_upload_bytes: usize,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: WatermarkConfig,
    /// Where cleaned files are written and served from
    pub output_dir: PathBuf,
    /// Detection + removal timeout in milliseconds
    pub timeout_ms: u64,
    pub max_upload_bytes: usize,
}

/// Routes without CORS, which depends on deployment
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/health", get(handle_health))
        .route("/remove-watermark", post(handle_remove_watermark))
        .route("/download/:filename", get(handle_download));

    Router::new()
        .route("/health", get(handle_health))
        .nest("/api", api)
        .layer(DefaultBodyLimit::max(state.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(frontend_url: &str) -> anyhow::Result<CorsLayer> {
    let mut origins = vec![HeaderValue::from_str(frontend_url)?];
    for origin in LOCAL_FRONTENDS {
        let origin = HeaderValue::from_static(origin);
        if !origins.contains(&origin) {
            origins.push(origin);
        }
    }

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = WatermarkConfig::new(&args.target_domain, args.corner_threshold)?;
    std::fs::create_dir_all(&args.output_dir)?;

    let state = AppState {
        config,
        output_dir: args.output_dir.clone(),
        timeout_ms: args.timeout_ms,
        max_upload_bytes: args.max_upload_bytes,
    };

    let app = build_router(state).layer(cors_layer(&args.frontend_url)?);

    // Start server
    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Server listening on http://{}", addr);
    info!(
        "Target domain: {}, corner threshold: {}",
        args.target_domain, args.corner_threshold
    );
    info!("Output directory: {}", args.output_dir.display());
    info!("Processing timeout: {}ms", args.timeout_ms);

    axum::serve(listener, app).await?;

    Ok(())
}
