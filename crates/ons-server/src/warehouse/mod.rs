//! Analytical warehouse seam
//!
//! The pipeline needs five things from the warehouse: a partition row count
//! for the freshness gate, a procedure call for materialization, keyset page
//! reads with a remaining-row count for `/records`, and a liveness probe.
//! Datasets map to PostgreSQL schemas in [`postgres::PgWarehouse`].

use async_trait::async_trait;
use chrono::NaiveDate;
use ons_common::{OnsError, Result};
use std::fmt;

pub mod postgres;

pub use postgres::PgWarehouse;

/// A validated SQL identifier: `[A-Za-z_][A-Za-z0-9_]*`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ident(String);

impl Ident {
    pub fn new(value: &str) -> Result<Self> {
        let mut chars = value.chars();
        let valid = match chars.next() {
            Some(first) => {
                (first.is_ascii_alphabetic() || first == '_')
                    && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            },
            None => false,
        };

        if valid {
            Ok(Self(value.to_string()))
        } else {
            Err(OnsError::Validation(format!("Invalid identifier '{}'", value)))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Double-quoted form for SQL text
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `dataset.table`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub dataset: Ident,
    pub table: Ident,
}

impl TableRef {
    pub fn new(dataset: &str, table: &str) -> Result<Self> {
        Ok(Self {
            dataset: Ident::new(dataset)?,
            table: Ident::new(table)?,
        })
    }

    pub fn quoted(&self) -> String {
        format!("{}.{}", self.dataset.quoted(), self.table.quoted())
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.dataset, self.table)
    }
}

/// Position of a row in `(ordering, tiebreak)` order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub date: NaiveDate,
    /// `None` means "after every row of `date`"
    pub key: Option<String>,
}

/// Keyset scan over a table ordered by a date column
#[derive(Debug, Clone)]
pub struct KeysetScan {
    pub table: TableRef,
    pub ordering: Ident,
    pub tiebreak: Option<Ident>,
    /// Exclusive lower bound; `None` scans from the start
    pub after: Option<Position>,
}

impl KeysetScan {
    /// Whether a row at `(date, key)` lies strictly after the lower bound
    pub fn admits(&self, date: NaiveDate, key: &str) -> bool {
        let Some(after) = &self.after else {
            return true;
        };
        match (&self.tiebreak, &after.key) {
            (Some(_), Some(after_key)) => (date, key) > (after.date, after_key.as_str()),
            _ => date > after.date,
        }
    }
}

/// One row of a page with its position
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub position: Position,
    pub value: serde_json::Value,
}

#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Rows of `table` whose `column` equals `value`
    async fn count_partition(&self, table: &TableRef, column: &Ident, value: &str) -> Result<i64>;

    /// `CALL dataset.procedure()` and wait for completion
    async fn call_procedure(&self, dataset: &Ident, procedure: &Ident) -> Result<()>;

    /// Up to `limit` rows strictly after `scan.after`, ascending
    async fn fetch_after(&self, scan: &KeysetScan, limit: i64) -> Result<Vec<Row>>;

    /// Number of rows strictly after `scan.after`
    async fn count_after(&self, scan: &KeysetScan) -> Result<i64>;

    async fn health_check(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ident_accepts_plain_names() {
        assert!(Ident::new("ear_data").is_ok());
        assert!(Ident::new("_raw2024").is_ok());
        assert_eq!(Ident::new("dt").map(|i| i.quoted()).ok(), Some("\"dt\"".to_string()));
    }

    #[test]
    fn test_ident_rejects_injection() {
        for bad in ["", "1table", "ear-diario", "a.b", "x\"; DROP TABLE y; --", "espaço"] {
            assert!(Ident::new(bad).is_err(), "{bad}");
        }
    }

    fn scan(tiebreak: bool, after: Option<(u32, Option<&str>)>) -> KeysetScan {
        KeysetScan {
            table: TableRef::new("trusted", "ear_diario").unwrap_or_else(|e| panic!("{e}")),
            ordering: Ident::new("ear_data").unwrap_or_else(|e| panic!("{e}")),
            tiebreak: tiebreak.then(|| Ident::new("id_reservatorio").unwrap_or_else(|e| panic!("{e}"))),
            after: after.map(|(day, key)| Position {
                date: day_of(day),
                key: key.map(str::to_string),
            }),
        }
    }

    fn day_of(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap_or_default()
    }

    #[test]
    fn test_admits_everything_without_bound() {
        assert!(scan(true, None).admits(day_of(1), ""));
    }

    #[test]
    fn test_admits_same_date_with_greater_key() {
        let s = scan(true, Some((5, Some("FURNAS"))));
        assert!(s.admits(day_of(5), "SOBRADINHO"));
        assert!(!s.admits(day_of(5), "FURNAS"));
        assert!(!s.admits(day_of(5), "EMBORCACAO"));
        assert!(s.admits(day_of(6), "A"));
        assert!(!s.admits(day_of(4), "Z"));
    }

    #[test]
    fn test_date_only_bound_skips_whole_day() {
        let s = scan(true, Some((5, None)));
        assert!(!s.admits(day_of(5), "ZZZ"));
        assert!(s.admits(day_of(6), ""));

        let s = scan(false, Some((5, Some("FURNAS"))));
        assert!(!s.admits(day_of(5), "SOBRADINHO"));
    }
}
