//! ONS Server - Main entry point

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Result;
use axum::Router;
use ons_common::logging::{init_logging, LogConfig};
use ons_common::SystemClock;
use tokio::signal;
use tower_http::compression::CompressionLayer;
use tracing::info;

use ons_server::{
    config::Config,
    features,
    ingest::IngestionOrchestrator,
    middleware,
    reader::PaginatedReader,
    storage::Storage,
    warehouse::{PgWarehouse, Warehouse},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Environment variables take precedence over these defaults
    let log_config = LogConfig::builder()
        .log_file_prefix("ons-server")
        .filter_directives("ons_server=debug,ons_ingest=debug,tower_http=debug,sqlx=warn")
        .build()
        .merge_env()?;

    init_logging(&log_config)?;

    info!("Starting ONS Server");

    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    let warehouse: Arc<dyn Warehouse> =
        Arc::new(PgWarehouse::connect(&config.database, &config.pipeline.project_id).await?);
    info!("Warehouse connection pool established");

    let storage = Arc::new(Storage::new(config.storage.clone()));
    info!(bucket = %storage.bucket(), "Storage client initialized");

    let clock = Arc::new(SystemClock);
    let orchestrator = IngestionOrchestrator::from_config(
        &config.pipeline,
        warehouse.clone(),
        storage,
        clock,
    )?;
    let reader = PaginatedReader::from_config(&config.pipeline, warehouse.clone())?;
    info!(table = %reader.table(), "Pipeline components ready");

    let app = create_router(
        features::FeatureState {
            orchestrator: Arc::new(orchestrator),
            reader: Arc::new(reader),
            warehouse,
        },
        &config,
    );

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(config.server.shutdown_timeout_secs))
        .await?;

    info!("Server shut down gracefully");

    Ok(())
}

/// Create the application router with all routes and middleware
fn create_router(state: features::FeatureState, config: &Config) -> Router {
    features::router(state)
        // Apply layers from innermost to outermost
        .layer(CompressionLayer::new())
        .layer(middleware::tracing_layer())
        .layer(middleware::cors_layer(&config.cors))
}

/// Graceful shutdown signal handler
async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }

    info!("Waiting up to {} seconds for in-flight ingestion to finish", timeout_secs);
    tokio::time::sleep(Duration::from_secs(timeout_secs.min(5))).await;
}
