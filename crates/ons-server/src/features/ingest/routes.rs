//! Ingestion API routes
//!
//! - `POST /download_upload` - Run the ingestion pipeline for one package
//!
//! Every failure uses the same envelope so an operator can tell which stage
//! broke without reading logs:
//!
//! ```json
//! {"message": "Error", "stage": "download", "detail": "..."}
//! ```

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};

use super::commands::{run, RunIngestionCommand, RunIngestionError};
use crate::error::status_for;
use crate::ingest::{IngestionOrchestrator, Stage};

pub fn ingest_routes() -> Router<Arc<IngestionOrchestrator>> {
    Router::new().route("/download_upload", post(run_ingestion))
}

/// Run ingestion
///
/// # Response
///
/// - `200 OK` - `Success!` with the kept resources, or "already updated"
/// - `400 Bad Request` - Body is not an array, missing field, bad date
/// - `409 Conflict` - Another run holds the staging area
/// - `5xx` - A stage failed; `stage` names it
#[tracing::instrument(skip_all)]
async fn run_ingestion(
    State(orchestrator): State<Arc<IngestionOrchestrator>>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, IngestApiError> {
    let Json(body) = body.map_err(|rejection| {
        tracing::debug!(error = %rejection, "Unreadable ingestion body");
        RunIngestionError::MalformedBody
    })?;

    let command = RunIngestionCommand::from_body(body)?;
    let response = run::handle(orchestrator, command).await?;

    Ok((StatusCode::OK, Json(response)).into_response())
}

#[derive(Debug)]
pub struct IngestApiError(RunIngestionError);

impl From<RunIngestionError> for IngestApiError {
    fn from(err: RunIngestionError) -> Self {
        Self(err)
    }
}

impl IntoResponse for IngestApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self.0 {
            RunIngestionError::MalformedBody
            | RunIngestionError::MissingField(_)
            | RunIngestionError::InvalidWindow(_) => {
                tracing::warn!(error = %self.0, "Ingestion request rejected");
                (
                    StatusCode::BAD_REQUEST,
                    json!({
                        "message": "Error",
                        "stage": Stage::Request,
                        "detail": self.0.to_string(),
                    }),
                )
            },
            RunIngestionError::Stage(failure) => {
                let status = match failure.stage {
                    Stage::Lock => StatusCode::CONFLICT,
                    _ => status_for(&failure.error),
                };

                let mut body = json!({
                    "message": "Error",
                    "stage": failure.stage,
                    "detail": failure.error.to_string(),
                });
                if let Some(upload) = &failure.upload {
                    body["uploaded"] = json!(upload
                        .uploaded
                        .iter()
                        .map(|o| o.key.as_str())
                        .collect::<Vec<_>>());
                    body["failed"] = json!(upload.failed);
                    body["retained"] = json!(upload.retained());
                }
                (status, body)
            },
        };

        (status, Json(body)).into_response()
    }
}
