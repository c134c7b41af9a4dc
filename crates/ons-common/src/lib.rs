//! ONS Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the reservoir data pipeline.
//!
//! # Overview
//!
//! This crate provides common functionality used across all workspace members:
//!
//! - **Error Handling**: the `OnsError` taxonomy shared by ingestion and serving
//! - **Logging**: tracing subscriber bootstrap driven by `LOG_*` variables
//! - **Retry**: bounded exponential backoff for network-bound stages
//! - **Clock**: injectable calendar so "today" can be pinned in tests
//!
//! # Example
//!
//! ```no_run
//! use ons_common::{OnsError, Result};
//! use ons_common::retry::RetryPolicy;
//!
//! async fn fetch() -> Result<Vec<u8>> {
//!     let policy = RetryPolicy::default();
//!     policy
//!         .run("fetch payload", || async { Err(OnsError::TransientIo("timeout".into())) })
//!         .await
//! }
//! ```

pub mod clock;
pub mod error;
pub mod logging;
pub mod retry;

// Re-export commonly used types
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{OnsError, Result};
