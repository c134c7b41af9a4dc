//! Materialization trigger
//!
//! Calls the stored procedure that promotes raw-zone data into the trusted
//! table. Failures are returned to the caller.

use std::sync::Arc;

use ons_common::{OnsError, Result};
use tracing::{error, info, instrument};

use crate::warehouse::{Ident, Warehouse};

/// Promotes raw-zone data into the trusted tables through a stored procedure
pub struct MaterializationTrigger {
    warehouse: Arc<dyn Warehouse>,
    dataset: Ident,
    procedure: Ident,
}

impl MaterializationTrigger {
    pub fn new(warehouse: Arc<dyn Warehouse>, dataset: Ident, procedure: Ident) -> Self {
        Self {
            warehouse,
            dataset,
            procedure,
        }
    }

    /// Run the procedure to completion
    ///
    /// Every failure comes back as [`OnsError::Materialization`].
    #[instrument(skip(self), fields(procedure = %self.procedure))]
    pub async fn run(&self) -> Result<()> {
        match self
            .warehouse
            .call_procedure(&self.dataset, &self.procedure)
            .await
        {
            Ok(()) => {
                info!("Procedure {}.{} executed", self.dataset, self.procedure);
                Ok(())
            },
            Err(e) => {
                error!(error = %e, "Procedure {}.{} failed", self.dataset, self.procedure);
                Err(match e {
                    OnsError::Materialization(_) => e,
                    other => OnsError::Materialization(format!(
                        "{}.{}: {}",
                        self.dataset, self.procedure, other
                    )),
                })
            },
        }
    }
}
