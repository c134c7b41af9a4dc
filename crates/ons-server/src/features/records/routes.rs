//! Records API routes
//!
//! - `GET /records?page_size=&cursor=` - One page of the trusted table
//!
//! ```json
//! {"data": [...], "next_cursor": "2024-03-01|FURNAS", "pages_remaining": 4}
//! ```

use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};

use super::queries::{fetch, FetchRecordsQuery};
use crate::error::AppError;
use crate::reader::PaginatedReader;

pub fn records_routes() -> Router<Arc<PaginatedReader>> {
    Router::new().route("/records", get(fetch_records))
}

async fn fetch_records(
    State(reader): State<Arc<PaginatedReader>>,
    query: Result<Query<FetchRecordsQuery>, QueryRejection>,
) -> Result<Response, AppError> {
    let Query(query) = query.map_err(|e| AppError::Validation(e.body_text()))?;

    let page = fetch::handle(reader, query).await?;

    tracing::debug!(rows = page.data.len(), pages_remaining = page.pages_remaining, "Records served");
    Ok(Json(page).into_response())
}
