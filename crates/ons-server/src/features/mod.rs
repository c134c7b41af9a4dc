//! HTTP feature slices
//!
//! Each feature is a vertical slice with its own commands or queries and
//! routes:
//!
//! - **ingest**: `POST /download_upload` runs the ingestion pipeline
//! - **records**: `GET /records` pages through the trusted table
//!
//! Commands and queries implement `mediator::Request`; handlers are plain
//! async functions called from the routes.

pub mod ingest;
pub mod records;

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;

use crate::ingest::IngestionOrchestrator;
use crate::reader::PaginatedReader;
use crate::warehouse::Warehouse;

/// Shared state for all feature routes
#[derive(Clone)]
pub struct FeatureState {
    pub orchestrator: Arc<IngestionOrchestrator>,
    pub reader: Arc<PaginatedReader>,
    pub warehouse: Arc<dyn Warehouse>,
}

/// Router with every feature mounted at the root
pub fn router(state: FeatureState) -> Router<()> {
    Router::new()
        .route("/health", get(health_check))
        .with_state(state.warehouse.clone())
        .merge(ingest::ingest_routes().with_state(state.orchestrator.clone()))
        .merge(records::records_routes().with_state(state.reader.clone()))
}

/// Warehouse connectivity probe
async fn health_check(State(warehouse): State<Arc<dyn Warehouse>>) -> Response {
    match warehouse.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "warehouse": "connected"
            })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Warehouse health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "warehouse": "unreachable"
                })),
            )
                .into_response()
        },
    }
}
