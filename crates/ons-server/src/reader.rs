//! Cursor-paginated reads of the trusted table
//!
//! Rows are served in ascending `(ordering, tiebreak)` order. The cursor is
//! the position of the last row of a page, serialized as `YYYY-MM-DD` or
//! `YYYY-MM-DD|<tiebreak>`; the next page starts strictly after it. A bare
//! date is always accepted and skips every row of that date.

use std::sync::Arc;

use chrono::NaiveDate;
use ons_common::{OnsError, Result};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::config::PipelineConfig;
use crate::warehouse::{Ident, KeysetScan, Position, TableRef, Warehouse};

pub const DEFAULT_PAGE_SIZE: i64 = 100;
pub const MAX_PAGE_SIZE: i64 = 100;

const CURSOR_DATE_FORMAT: &str = "%Y-%m-%d";
const CURSOR_SEPARATOR: char = '|';

/// One page of rows
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CursorPage<T> {
    pub data: Vec<T>,
    pub next_cursor: Option<String>,
    pub pages_remaining: i64,
}

/// Reject page sizes outside `(0, MAX_PAGE_SIZE]`
pub fn validate_page_size(page_size: i64) -> Result<i64> {
    if page_size <= 0 || page_size > MAX_PAGE_SIZE {
        return Err(OnsError::Validation(format!(
            "page_size must be between 1 and {}, got {}",
            MAX_PAGE_SIZE, page_size
        )));
    }
    Ok(page_size)
}

pub fn encode_cursor(position: &Position) -> String {
    let date = position.date.format(CURSOR_DATE_FORMAT);
    match &position.key {
        Some(key) => format!("{}{}{}", date, CURSOR_SEPARATOR, key),
        None => date.to_string(),
    }
}

pub fn decode_cursor(cursor: &str) -> Result<Position> {
    let (date, key) = match cursor.split_once(CURSOR_SEPARATOR) {
        Some((date, key)) => (date, Some(key.to_string())),
        None => (cursor, None),
    };

    let date = NaiveDate::parse_from_str(date.trim(), CURSOR_DATE_FORMAT)
        .map_err(|_| OnsError::Validation(format!("Malformed cursor '{}'", cursor)))?;

    Ok(Position { date, key })
}

/// `ceil(remaining / page_size)`
fn pages_for(remaining: i64, page_size: i64) -> i64 {
    if remaining <= 0 {
        0
    } else {
        (remaining + page_size - 1) / page_size
    }
}

pub struct PaginatedReader {
    warehouse: Arc<dyn Warehouse>,
    table: TableRef,
    ordering: Ident,
    tiebreak: Option<Ident>,
}

impl PaginatedReader {
    pub fn new(
        warehouse: Arc<dyn Warehouse>,
        table: TableRef,
        ordering: Ident,
        tiebreak: Option<Ident>,
    ) -> Self {
        Self {
            warehouse,
            table,
            ordering,
            tiebreak,
        }
    }

    /// Reader over `trusted_dataset.table_id`
    pub fn from_config(config: &PipelineConfig, warehouse: Arc<dyn Warehouse>) -> Result<Self> {
        Ok(Self::new(
            warehouse,
            TableRef::new(&config.trusted_dataset, &config.table_id)?,
            Ident::new(&config.ordering_column)?,
            config.tiebreak_column.as_deref().map(Ident::new).transpose()?,
        ))
    }

    pub fn table(&self) -> &TableRef {
        &self.table
    }

    fn scan(&self, after: Option<Position>) -> KeysetScan {
        KeysetScan {
            table: self.table.clone(),
            ordering: self.ordering.clone(),
            tiebreak: self.tiebreak.clone(),
            after,
        }
    }

    /// Fetch the page after `cursor`, or the first page
    ///
    /// `page_size` and `cursor` are validated before the warehouse is queried.
    #[instrument(skip(self), fields(table = %self.table))]
    pub async fn fetch(
        &self,
        page_size: i64,
        cursor: Option<&str>,
    ) -> Result<CursorPage<serde_json::Value>> {
        let page_size = validate_page_size(page_size)?;
        let after = cursor
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(decode_cursor)
            .transpose()?;

        // A trusted table that does not exist yet reads as empty
        let rows = match self.warehouse.fetch_after(&self.scan(after), page_size).await {
            Ok(rows) => rows,
            Err(OnsError::RemoteNotFound(what)) => {
                warn!(table = %self.table, "Trusted table not found, serving an empty page: {}", what);
                Vec::new()
            },
            Err(e) => return Err(e),
        };

        let Some(last) = rows.last() else {
            debug!("Empty page");
            return Ok(CursorPage {
                data: Vec::new(),
                next_cursor: None,
                pages_remaining: 0,
            });
        };

        let next = last.position.clone();
        let remaining = self.warehouse.count_after(&self.scan(Some(next.clone()))).await?;
        debug!(rows = rows.len(), remaining, "Page fetched");

        Ok(CursorPage {
            next_cursor: Some(encode_cursor(&next)),
            pages_remaining: pages_for(remaining, page_size),
            data: rows.into_iter().map(|row| row.value).collect(),
        })
    }
}
