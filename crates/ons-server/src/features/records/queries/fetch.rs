//! Fetch records query

use std::sync::Arc;

use mediator::Request;
use ons_common::OnsError;
use serde::{Deserialize, Serialize};

use crate::reader::{CursorPage, PaginatedReader, DEFAULT_PAGE_SIZE};

/// Query parameters of `GET /records`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchRecordsQuery {
    /// Rows per page, `1..=100`, default 100
    #[serde(default)]
    pub page_size: Option<i64>,
    /// `next_cursor` of the previous page
    #[serde(default)]
    pub cursor: Option<String>,
}

pub type FetchRecordsResponse = CursorPage<serde_json::Value>;

impl Request<Result<FetchRecordsResponse, OnsError>> for FetchRecordsQuery {}

impl FetchRecordsQuery {
    pub fn page_size(&self) -> i64 {
        self.page_size.unwrap_or(DEFAULT_PAGE_SIZE)
    }
}

#[tracing::instrument(skip(reader))]
pub async fn handle(
    reader: Arc<PaginatedReader>,
    query: FetchRecordsQuery,
) -> Result<FetchRecordsResponse, OnsError> {
    reader.fetch(query.page_size(), query.cursor.as_deref()).await
}
