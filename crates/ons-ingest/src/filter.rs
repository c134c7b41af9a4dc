//! Year-window filtering of catalog resources
//!
//! Resource names end in a `-YYYY` token and that is the only time granularity
//! the catalog exposes. A request window of `15-06-2024..20-06-2024` therefore
//! keeps every resource tagged `2024`; see [`YEAR_GRANULARITY_FILTER`].

use chrono::{Datelike, Duration, NaiveDate};
use ons_common::{Clock, OnsError, Result};
use serde::Serialize;
use tracing::{debug, warn};

use crate::models::ResourceDescriptor;

/// External date format of the ingestion window
pub const WINDOW_DATE_FORMAT: &str = "%d-%m-%Y";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Year,
}

/// Resources are matched on the year span of the window, not on exact dates
pub const YEAR_GRANULARITY_FILTER: Granularity = Granularity::Year;

/// Requested ingestion window
///
/// `None` means no explicit window was given and the rolling default
/// `[year(today - 1), year(today)]` applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IngestionWindow {
    range: Option<(NaiveDate, NaiveDate)>,
}

impl IngestionWindow {
    /// Rolling default window
    pub fn rolling() -> Self {
        Self { range: None }
    }

    pub fn between(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            range: Some((start, end)),
        }
    }

    /// Parse `DD-MM-YYYY` bounds
    ///
    /// Both bounds must be present and non-empty for an explicit window;
    /// otherwise the rolling default is used.
    pub fn parse(start: Option<&str>, end: Option<&str>) -> Result<Self> {
        let start = start.map(str::trim).filter(|s| !s.is_empty());
        let end = end.map(str::trim).filter(|s| !s.is_empty());

        match (start, end) {
            (Some(start), Some(end)) => Ok(Self::between(parse_date(start)?, parse_date(end)?)),
            _ => Ok(Self::rolling()),
        }
    }

    pub fn is_explicit(&self) -> bool {
        self.range.is_some()
    }

    /// Inclusive year span
    pub fn year_span(&self, clock: &dyn Clock) -> (i32, i32) {
        match self.range {
            Some((start, end)) => (start.year(), end.year()),
            None => {
                let today = clock.today();
                ((today - Duration::days(1)).year(), today.year())
            },
        }
    }
}

fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, WINDOW_DATE_FORMAT).map_err(|_| {
        OnsError::Validation(format!("Invalid date '{}', expected DD-MM-YYYY", value))
    })
}

/// Year token of a resource name
///
/// `Ok(None)` when the name has no `-` delimiter at all; an error when the
/// trailing token is present but not an integer.
pub fn year_in(name: &str) -> Result<Option<i32>> {
    let Some((_, token)) = name.rsplit_once('-') else {
        return Ok(None);
    };

    token
        .trim()
        .parse::<i32>()
        .map(Some)
        .map_err(|_| OnsError::DataFormat(format!("Resource '{}' has a non-numeric year token '{}'", name, token)))
}

/// Keep the descriptors whose year falls in the window, preserving order
pub fn filter_by_year(
    descriptors: Vec<ResourceDescriptor>,
    window: &IngestionWindow,
    clock: &dyn Clock,
) -> Result<Vec<ResourceDescriptor>> {
    let (start_year, end_year) = window.year_span(clock);
    if start_year > end_year {
        warn!(start_year, end_year, "Ingestion window is inverted, nothing will match");
    }

    let mut kept = Vec::with_capacity(descriptors.len());
    for descriptor in descriptors {
        match year_in(&descriptor.name)? {
            Some(year) if (start_year..=end_year).contains(&year) => kept.push(descriptor),
            Some(year) => debug!(resource = %descriptor.name, year, "Outside window"),
            None => warn!(resource = %descriptor.name, "Resource name has no year token, skipping"),
        }
    }

    debug!(start_year, end_year, kept = kept.len(), "Year filter applied");
    Ok(kept)
}
