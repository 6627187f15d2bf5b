//! DDI Sync - network inventory reconciliation service
//!
//! Serves the reconciliation API: mapping suggestions, dry-run
//! classification against the DDI authority, and background apply tasks.

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};
use tracing_subscriber::{
    fmt::{self, MakeWriter},
    prelude::*,
    EnvFilter, Layer, Registry,
};

use ddi_sync::{
    api,
    config::{LogFormat, LogTarget, LoggingConfig},
    services::{CacheSyncJob, TaskRetentionJob},
    AppConfig, AppState,
};

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        print_help();
        return Ok(());
    }

    if args.iter().any(|arg| arg == "--version" || arg == "-V") {
        println!("DDI Sync {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Load configuration first (before logging, so we know log format)
    let config = AppConfig::load().context("Failed to load configuration")?;

    if args.iter().any(|arg| arg == "--check-config") {
        println!("Configuration is valid");
        return Ok(());
    }

    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.server.workers.max(1))
        .enable_all()
        .build()
        .context("Failed to build async runtime")?
        .block_on(run(config))
}

async fn run(config: AppConfig) -> Result<()> {
    // The guard must be kept alive for the duration of the program
    // to ensure log messages are flushed to files
    let _log_guard = init_logging(&config);

    info!("DDI Sync starting up");
    info!(
        authority = %config.authority.url,
        wapi_version = %config.authority.wapi_version,
        "Configuration loaded successfully"
    );
    if !config.authority.ssl_verify {
        warn!("TLS certificate verification for the DDI authority is disabled");
    }

    let state = AppState::new(config.clone())?;

    let _cache_sync = if config.cache.enabled && !config.cache.refresh_cron.trim().is_empty() {
        info!("Starting cache sync job: {}", config.cache.refresh_cron);
        Some(CacheSyncJob::new(state.authority.clone(), &config.cache.refresh_cron)?.start())
    } else {
        info!("Cache sync job disabled");
        None
    };

    let _retention = TaskRetentionJob::new(
        state.orchestrator.clone(),
        Duration::from_secs(config.tasks.sweep_interval_secs),
    )
    .start();

    let orchestrator = state.orchestrator.clone();
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address configuration")?;

    info!("Starting HTTP server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!("HTTP server is ready to accept connections");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    orchestrator.shutdown();
    info!("DDI Sync stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn init_logging(config: &AppConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_config = &config.logging;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_config.level));

    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut guard = None;

    if matches!(log_config.target, LogTarget::Console | LogTarget::Both) {
        layers.push(format_layer(&log_config.format, std::io::stdout, true));
    }
    if matches!(log_config.target, LogTarget::File | LogTarget::Both) {
        let (writer, file_guard) = create_file_writer(log_config);
        // Files never get ANSI colours
        layers.push(format_layer(&log_config.format, writer, false));
        guard = Some(file_guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .init();

    guard
}

fn format_layer<W>(format: &LogFormat, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer().with_writer(writer).with_ansi(ansi);
    match format {
        LogFormat::Json => layer.json().with_target(true).boxed(),
        LogFormat::Compact => layer.compact().with_target(false).boxed(),
        LogFormat::Pretty => layer.with_target(true).with_line_number(false).boxed(),
    }
}

/// Create a file writer with optional daily rotation
fn create_file_writer(
    log_config: &LoggingConfig,
) -> (
    tracing_appender::non_blocking::NonBlocking,
    tracing_appender::non_blocking::WorkerGuard,
) {
    if let Err(e) = std::fs::create_dir_all(&log_config.log_dir) {
        eprintln!(
            "Warning: Failed to create log directory {:?}: {}",
            log_config.log_dir, e
        );
    }

    let file_appender = if log_config.daily_rotation {
        tracing_appender::rolling::daily(&log_config.log_dir, &log_config.log_prefix)
    } else {
        tracing_appender::rolling::never(&log_config.log_dir, &log_config.log_prefix)
    };

    tracing_appender::non_blocking(file_appender)
}

/// Create the application router with all routes and middleware
fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    Router::new()
        .nest("/api/v1", api::routes())
        .with_state(state)
        .layer(CompressionLayer::new())
        .layer(trace_layer)
        .layer(cors)
}

fn print_help() {
    println!(
        r#"DDI Sync {}

USAGE:
    ddi-sync [OPTIONS]

OPTIONS:
    -h, --help              Print this help message
    -V, --version           Print version information
    --check-config          Load and validate the configuration, then exit

ENVIRONMENT:
    DDISYNC_CONFIG              Path to configuration file (default: config.yaml)
    DDISYNC_HOST, DDISYNC_PORT  Listen address overrides
    DDI_AUTHORITY_URL           DDI authority base URL (https://grid.example.com)
    DDI_AUTHORITY_USERNAME      DDI authority user
    DDI_AUTHORITY_PASSWORD      DDI authority password
    DDI_AUTHORITY_WAPI_VERSION  WAPI version (default: 2.13.1)
    DDI_AUTHORITY_SSL_VERIFY    Verify the authority's TLS certificate (default: true)
    DDISYNC_LOG_FORMAT          pretty | json | compact
    DDISYNC_LOG_TARGET          console | file | both
    DDISYNC_LOG_DIR             Directory for log files
    RUST_LOG                    Log filter

CONFIGURATION:
    The application looks for configuration files in the following order:
    1. Path specified by DDISYNC_CONFIG environment variable
    2. ./config.yaml
    3. ./config/config.yaml
    4. /etc/ddi-sync/config.yaml
    5. $XDG_CONFIG_HOME/ddi-sync/config.yaml"#,
        env!("CARGO_PKG_VERSION")
    );
}
