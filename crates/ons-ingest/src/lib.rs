//! ONS Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Discovery and download side of the reservoir data pipeline.
//!
//! # Stages
//!
//! - **catalog**: lists a package's resources through the CKAN action API and
//!   resolves direct download URLs
//! - **filter**: keeps the resources whose trailing year token falls inside the
//!   requested window (year granularity)
//! - **download**: fetches each resource into the staging directory with a
//!   timeout, bounded retries and bounded concurrency
//! - **normalize**: rewrites every staged Parquet file with all columns coerced
//!   to strings
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ons_common::SystemClock;
//! use ons_ingest::{
//!     catalog::{CatalogClient, CatalogConfig, ResourceCatalog},
//!     download::{DownloadConfig, ResourceDownloader},
//!     filter::{filter_by_year, IngestionWindow},
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let catalog = Arc::new(CatalogClient::new(CatalogConfig::default())?);
//!     let resources = catalog.list_resources("ear-diario-por-reservatorio").await;
//!     let window = IngestionWindow::parse(Some("01-01-2024"), Some("31-12-2024"))?;
//!     let kept = filter_by_year(resources, &window, &SystemClock)?;
//!
//!     let downloader = ResourceDownloader::new(catalog, DownloadConfig::default())?;
//!     let report = downloader.download_all(&kept).await?;
//!     println!("staged {} files", report.staged.len());
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod download;
pub mod filter;
pub mod models;
pub mod normalize;

pub use catalog::{CatalogClient, CatalogConfig, ResourceCatalog};
pub use download::{DownloadConfig, DownloadReport, ResourceDownloader};
pub use filter::{filter_by_year, IngestionWindow, YEAR_GRANULARITY_FILTER};
pub use models::{DownloadWarning, ResourceDescriptor, StagedFile};
