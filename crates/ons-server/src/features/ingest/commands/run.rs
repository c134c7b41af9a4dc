//! Run ingestion command
//!
//! The request body is a JSON array whose first element carries the package
//! to ingest:
//!
//! ```json
//! [{"package_name": "ear-diario-por-reservatorio",
//!   "package_id": "61e92787-9847-4731-8b73-e878eb5bc158",
//!   "start_date": "01-01-2024",
//!   "end_date": "31-12-2024"}]
//! ```
//!
//! Validation happens before any collaborator is touched.

use std::sync::Arc;

use mediator::Request;
use ons_common::OnsError;
use ons_ingest::{
    filter::Granularity, DownloadWarning, IngestionWindow, ResourceDescriptor,
    YEAR_GRANULARITY_FILTER,
};
use serde::{Deserialize, Serialize};

use crate::ingest::{IngestOutcome, IngestRequest, IngestionOrchestrator, StageFailure};

pub const SUCCESS_MESSAGE: &str = "Success!";
pub const FRESH_MESSAGE: &str = "The data is already updated";

/// Command to ingest one package
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunIngestionCommand {
    #[serde(default)]
    pub package_name: Option<String>,
    #[serde(default)]
    pub package_id: Option<String>,
    /// `DD-MM-YYYY`
    #[serde(default)]
    pub start_date: Option<String>,
    /// `DD-MM-YYYY`
    #[serde(default)]
    pub end_date: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum RunIngestionResponse {
    Completed {
        message: &'static str,
        data: Vec<ResourceDescriptor>,
        start_date: Option<String>,
        end_date: Option<String>,
        granularity: Granularity,
        uploaded: Vec<String>,
        warnings: Vec<DownloadWarning>,
    },
    AlreadyUpdated {
        message: &'static str,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        materialized: bool,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum RunIngestionError {
    #[error("Request body must be a non-empty JSON array whose first element is an object")]
    MalformedBody,

    #[error("Missing required field '{0}'")]
    MissingField(&'static str),

    #[error("{0}")]
    InvalidWindow(OnsError),

    #[error(transparent)]
    Stage(#[from] StageFailure),
}

impl Request<Result<RunIngestionResponse, RunIngestionError>> for RunIngestionCommand {}

fn required(value: &Option<String>, field: &'static str) -> Result<String, RunIngestionError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(RunIngestionError::MissingField(field))
}

impl RunIngestionCommand {
    /// Take the command from the first element of a JSON array body
    pub fn from_body(body: serde_json::Value) -> Result<Self, RunIngestionError> {
        let first = match body {
            serde_json::Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
            _ => return Err(RunIngestionError::MalformedBody),
        };
        if !first.is_object() {
            return Err(RunIngestionError::MalformedBody);
        }

        serde_json::from_value(first).map_err(|_| RunIngestionError::MalformedBody)
    }

    #[tracing::instrument(skip(self), fields(package = ?self.package_name))]
    pub fn validate(&self) -> Result<IngestRequest, RunIngestionError> {
        let package_name = required(&self.package_name, "package_name")?;
        let package_id = required(&self.package_id, "package_id")?;
        let window =
            IngestionWindow::parse(self.start_date.as_deref(), self.end_date.as_deref())
                .map_err(RunIngestionError::InvalidWindow)?;

        tracing::debug!(explicit_window = window.is_explicit(), "Command validation passed");
        Ok(IngestRequest {
            package_name,
            package_id,
            window,
        })
    }
}

/// Validate and run the pipeline
pub async fn handle(
    orchestrator: Arc<IngestionOrchestrator>,
    command: RunIngestionCommand,
) -> Result<RunIngestionResponse, RunIngestionError> {
    let request = command.validate()?;

    match orchestrator.run(&request).await? {
        IngestOutcome::AlreadyFresh => Ok(RunIngestionResponse::AlreadyUpdated {
            message: FRESH_MESSAGE,
            materialized: false,
        }),
        IngestOutcome::Resumed => Ok(RunIngestionResponse::AlreadyUpdated {
            message: FRESH_MESSAGE,
            materialized: true,
        }),
        IngestOutcome::Completed(summary) => Ok(RunIngestionResponse::Completed {
            message: SUCCESS_MESSAGE,
            data: summary.resources,
            start_date: command.start_date,
            end_date: command.end_date,
            granularity: YEAR_GRANULARITY_FILTER,
            uploaded: summary.uploaded,
            warnings: summary.warnings,
        }),
    }
}
