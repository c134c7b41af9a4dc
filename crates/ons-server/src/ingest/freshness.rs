//! Freshness gate
//!
//! A package counts as updated when its raw table already holds rows whose
//! partition column equals today's date. The gate never fails: a missing
//! table means "not yet updated", and any other warehouse error is logged and
//! also answered with "not updated" so the run proceeds.

use std::sync::Arc;

use ons_common::{Clock, OnsError, Result};
use tracing::{debug, error, info, instrument};

use crate::warehouse::{Ident, TableRef, Warehouse};

/// Raw table holding a package: `-` in package names becomes `_`
pub fn raw_table_name(package_name: &str) -> String {
    package_name.trim().replace('-', "_")
}

pub struct FreshnessGate {
    warehouse: Arc<dyn Warehouse>,
    raw_dataset: Ident,
    partition_column: Ident,
    clock: Arc<dyn Clock>,
}

impl FreshnessGate {
    pub fn new(
        warehouse: Arc<dyn Warehouse>,
        raw_dataset: Ident,
        partition_column: Ident,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            warehouse,
            raw_dataset,
            partition_column,
            clock,
        }
    }

    /// Table the gate inspects for a package
    pub fn table_for(&self, package_name: &str) -> Result<TableRef> {
        Ok(TableRef {
            dataset: self.raw_dataset.clone(),
            table: Ident::new(&raw_table_name(package_name))?,
        })
    }

    #[instrument(skip(self))]
    pub async fn has_updated_today(&self, table: &TableRef) -> bool {
        let today = self.clock.today().format("%Y-%m-%d").to_string();

        match self
            .warehouse
            .count_partition(table, &self.partition_column, &today)
            .await
        {
            Ok(count) => {
                debug!(%table, %today, count, "Partition count");
                count > 0
            },
            Err(OnsError::RemoteNotFound(what)) => {
                info!(%table, "Raw table not found, treating as not updated: {}", what);
                false
            },
            Err(e) => {
                error!(%table, error = %e, "Freshness check failed, treating as not updated");
                false
            },
        }
    }
}
