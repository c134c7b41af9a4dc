//! PostgreSQL warehouse adapter

use async_trait::async_trait;
use chrono::NaiveDate;
use ons_common::{OnsError, Result};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::Row as _;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, error, instrument};

use super::{Ident, KeysetScan, Position, Row, TableRef, Warehouse};
use crate::config::DatabaseConfig;

#[derive(Clone)]
pub struct PgWarehouse {
    pool: PgPool,
}

impl PgWarehouse {
    /// Connect a pool whose sessions carry the statement timeout
    pub async fn connect(config: &DatabaseConfig, application_name: &str) -> Result<Self> {
        let options = PgConnectOptions::from_str(&config.url)
            .map_err(|e| OnsError::Config(format!("Invalid DATABASE_URL: {}", e)))?
            .application_name(application_name)
            .options([(
                "statement_timeout",
                format!("{}s", config.statement_timeout_secs),
            )]);

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect_with(options)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Classify a driver error
///
/// Missing schema/table/procedure become `RemoteNotFound`; connection trouble
/// and cancelled statements are transient.
pub fn map_sqlx_error(context: &str, err: sqlx::Error) -> OnsError {
    let message = format!("{}: {}", context, err);
    match &err {
        sqlx::Error::Database(db) => match db.code().as_deref() {
            // undefined_table, invalid_schema_name, undefined_function
            Some("42P01") | Some("3F000") | Some("42883") => OnsError::RemoteNotFound(message),
            // query_canceled (statement_timeout), admin_shutdown, cannot_connect_now
            Some("57014") | Some("57P01") | Some("57P03") => OnsError::TransientIo(message),
            _ => OnsError::Warehouse(message),
        },
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            OnsError::TransientIo(message)
        },
        sqlx::Error::Configuration(_) => OnsError::Config(message),
        _ => OnsError::Warehouse(message),
    }
}

fn ordering_expr(scan: &KeysetScan) -> String {
    format!("t.{}::date", scan.ordering.quoted())
}

fn tiebreak_expr(scan: &KeysetScan) -> String {
    match &scan.tiebreak {
        Some(column) => format!("COALESCE(t.{}::text, '') COLLATE \"C\"", column.quoted()),
        None => "''".to_string(),
    }
}

fn keyed_bound(scan: &KeysetScan) -> bool {
    scan.tiebreak.is_some() && scan.after.as_ref().is_some_and(|a| a.key.is_some())
}

/// `WHERE` clause of a keyset scan; binds `$1` (date) and `$2` (key) as needed
fn keyset_filter(scan: &KeysetScan) -> String {
    let ord = ordering_expr(scan);
    let mut clause = format!("{} IS NOT NULL", ord);

    if scan.after.is_some() {
        if keyed_bound(scan) {
            clause.push_str(&format!(
                " AND ({ord} > $1 OR ({ord} = $1 AND {tie} > $2))",
                ord = ord,
                tie = tiebreak_expr(scan)
            ));
        } else {
            clause.push_str(&format!(" AND {} > $1", ord));
        }
    }

    clause
}

fn bound_params(scan: &KeysetScan) -> usize {
    match &scan.after {
        None => 0,
        Some(_) if keyed_bound(scan) => 2,
        Some(_) => 1,
    }
}

pub(crate) fn fetch_sql(scan: &KeysetScan) -> String {
    format!(
        "SELECT to_jsonb(t) AS row, {ord} AS ord, {tie} AS tie \
         FROM {table} t \
         WHERE {filter} \
         ORDER BY ord ASC, tie ASC \
         LIMIT ${limit}",
        ord = ordering_expr(scan),
        tie = tiebreak_expr(scan),
        table = scan.table.quoted(),
        filter = keyset_filter(scan),
        limit = bound_params(scan) + 1,
    )
}

pub(crate) fn count_sql(scan: &KeysetScan) -> String {
    format!(
        "SELECT COUNT(*) FROM {table} t WHERE {filter}",
        table = scan.table.quoted(),
        filter = keyset_filter(scan),
    )
}

fn decode_row(scan: &KeysetScan, row: &PgRow) -> std::result::Result<Row, sqlx::Error> {
    let value: serde_json::Value = row.try_get("row")?;
    let date: NaiveDate = row.try_get("ord")?;
    let key: String = row.try_get("tie")?;

    Ok(Row {
        position: Position {
            date,
            key: scan.tiebreak.as_ref().map(|_| key),
        },
        value,
    })
}

#[async_trait]
impl Warehouse for PgWarehouse {
    #[instrument(skip(self))]
    async fn count_partition(&self, table: &TableRef, column: &Ident, value: &str) -> Result<i64> {
        let sql = format!(
            "SELECT COUNT(1) FROM {} WHERE {}::text = $1",
            table.quoted(),
            column.quoted()
        );
        debug!(%sql, "Counting partition");

        sqlx::query_scalar::<_, i64>(&sql)
            .bind(value)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(&format!("count {}", table), e))
    }

    #[instrument(skip(self))]
    async fn call_procedure(&self, dataset: &Ident, procedure: &Ident) -> Result<()> {
        let sql = format!("CALL {}.{}()", dataset.quoted(), procedure.quoted());

        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| map_sqlx_error(&format!("call {}.{}", dataset, procedure), e))
    }

    #[instrument(skip(self, scan), fields(table = %scan.table))]
    async fn fetch_after(&self, scan: &KeysetScan, limit: i64) -> Result<Vec<Row>> {
        let sql = fetch_sql(scan);
        debug!(%sql, "Fetching page");

        let mut query = sqlx::query(&sql);
        if let Some(after) = &scan.after {
            query = query.bind(after.date);
            if keyed_bound(scan) {
                query = query.bind(after.key.as_deref().unwrap_or_default());
            }
        }

        let rows = query
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(&format!("fetch {}", scan.table), e))?;

        rows.iter()
            .map(|row| decode_row(scan, row))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| map_sqlx_error(&format!("decode {}", scan.table), e))
    }

    #[instrument(skip(self, scan), fields(table = %scan.table))]
    async fn count_after(&self, scan: &KeysetScan) -> Result<i64> {
        let sql = count_sql(scan);

        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        if let Some(after) = &scan.after {
            query = query.bind(after.date);
            if keyed_bound(scan) {
                query = query.bind(after.key.as_deref().unwrap_or_default());
            }
        }

        query
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(&format!("count {}", scan.table), e))
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| {
                error!("Warehouse health check failed: {}", e);
                map_sqlx_error("health check", e)
            })
    }
}
