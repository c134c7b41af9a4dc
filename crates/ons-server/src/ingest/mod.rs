//! Server-side ingestion stages
//!
//! The discovery and download stages live in `ons_ingest`; this module adds
//! the stages that need the object store or the warehouse and the
//! orchestrator that sequences all of them.

pub mod freshness;
pub mod materialize;
pub mod orchestrator;
pub mod staging;

pub use freshness::FreshnessGate;
pub use materialize::MaterializationTrigger;
pub use orchestrator::{
    IngestOutcome, IngestRequest, IngestSummary, IngestionOrchestrator, Stage, StageFailure,
};
pub use staging::{StagingSink, UploadPolicy, UploadReport};
