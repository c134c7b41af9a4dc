//! ONS Server Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! HTTP service for the reservoir data pipeline.
//!
//! # Overview
//!
//! - **Ingestion**: `POST /download_upload` runs gate, catalog lookup, year
//!   filter, download, staging upload and materialization for one package
//! - **Records**: `GET /records` serves the trusted table with a keyset cursor
//! - **Health**: `GET /health` probes the warehouse
//!
//! # Architecture
//!
//! External systems sit behind traits so every stage can be exercised with
//! in-memory fakes:
//!
//! - [`ons_ingest::ResourceCatalog`]: the CKAN catalog
//! - [`storage::ObjectStore`]: S3-compatible object storage
//! - [`warehouse::Warehouse`]: the analytical store (PostgreSQL)
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ons_common::SystemClock;
//! use ons_server::{
//!     config::Config, features, ingest::IngestionOrchestrator, reader::PaginatedReader,
//!     storage::Storage, warehouse::PgWarehouse,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let warehouse = Arc::new(
//!         PgWarehouse::connect(&config.database, &config.pipeline.project_id).await?,
//!     );
//!     let storage = Arc::new(Storage::new(config.storage.clone()));
//!
//!     let state = features::FeatureState {
//!         orchestrator: Arc::new(IngestionOrchestrator::from_config(
//!             &config.pipeline,
//!             warehouse.clone(),
//!             storage,
//!             Arc::new(SystemClock),
//!         )?),
//!         reader: Arc::new(PaginatedReader::from_config(&config.pipeline, warehouse.clone())?),
//!         warehouse,
//!     };
//!     let _app = features::router(state);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod features;
pub mod ingest;
pub mod middleware;
pub mod reader;
pub mod storage;
pub mod warehouse;

pub use error::AppError;
