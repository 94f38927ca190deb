//! finsight-api - HTTP API server for the finsight report pipeline.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use finsight_analysis::{AnalyzerConfig, HttpAnalyzerBackend};
use finsight_api::{router, AppState};
use finsight_core::{defaults, AnalyzerBackend, BlobStore, ReportRepository};
use finsight_db::{Database, FilesystemBlobStore};
use finsight_jobs::{RecoveryService, ReportWorker, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing with configurable output
    //
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
    //   RUST_LOG    - standard env filter (default: "finsight_api=debug,tower_http=debug")
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "finsight_api=debug,tower_http=debug".into());

    let registry = tracing_subscriber::registry().with(env_filter);

    // Optionally create a file appender with daily rotation
    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("finsight-api.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer().with_writer(non_blocking);
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            } else {
                layer = layer.with_ansi(false); // no ANSI in files
            }
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    // Get configuration from environment
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost/finsight".to_string());
    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults::SERVER_PORT);

    // Connect to database and run pending migrations
    info!("Connecting to database...");
    let db = Database::connect(&database_url).await?;
    db.migrate().await?;
    info!("Database connected, migrations complete");

    // Initialize blob storage
    let blob_path = std::env::var("BLOB_STORAGE_PATH")
        .unwrap_or_else(|_| "/var/lib/finsight/blobs".to_string());
    let blobs = FilesystemBlobStore::new(&blob_path);
    blobs
        .validate()
        .await
        .map_err(|e| anyhow::anyhow!("blob storage validation failed: {e}"))?;
    info!("Blob storage initialized at {}", blob_path);

    let repo: Arc<dyn ReportRepository> = Arc::new(db.reports);
    let blobs: Arc<dyn BlobStore> = Arc::new(blobs);

    // Analyzer backend
    let analyzer_config = AnalyzerConfig::from_env();
    let analyzer: Arc<dyn AnalyzerBackend> = Arc::new(HttpAnalyzerBackend::new(
        analyzer_config.clone(),
    )?);
    info!(
        analyzer_url = %analyzer_config.base_url,
        analyzer_mode = %analyzer_config.mode,
        "Analyzer backend initialized"
    );

    // Start the report worker
    let worker_config = WorkerConfig::from_env();
    let worker = ReportWorker::new(
        repo.clone(),
        blobs.clone(),
        analyzer.clone(),
        analyzer_config,
        worker_config,
    );
    let worker_handle = worker.start();
    info!("Report worker started");

    // Recovery gateway
    let recovery = Arc::new(RecoveryService::new(repo.clone(), blobs.clone(), analyzer));

    let state = AppState {
        repo,
        blobs,
        recovery,
    };
    let app = router(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    // Stop claiming new reports; in-flight ones finish via recovery after restart.
    let _ = worker_handle.shutdown().await;

    Ok(())
}
