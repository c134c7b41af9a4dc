//! Server-specific error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use ons_common::OnsError;
use serde_json::json;
use thiserror::Error;

/// HTTP status for a pipeline error
pub fn status_for(err: &OnsError) -> StatusCode {
    match err {
        OnsError::Validation(_) => StatusCode::BAD_REQUEST,
        OnsError::RemoteNotFound(_) => StatusCode::NOT_FOUND,
        OnsError::RemoteRejected { .. } | OnsError::DataFormat(_) => StatusCode::BAD_GATEWAY,
        OnsError::TransientIo(_) => StatusCode::SERVICE_UNAVAILABLE,
        OnsError::Materialization(_)
        | OnsError::Warehouse(_)
        | OnsError::Config(_)
        | OnsError::Io(_)
        | OnsError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Pipeline(#[from] OnsError),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Pipeline(ref e) => {
                let status = status_for(e);
                if status.is_server_error() {
                    tracing::error!("Pipeline error: {}", e);
                }
                (status, e.to_string())
            },
            AppError::Validation(ref message) => (StatusCode::BAD_REQUEST, message.clone()),
        };

        let body = Json(json!({
            "error": {
                "message": error_message,
                "status": status.as_u16(),
            }
        }));

        (status, body).into_response()
    }
}
