//! Configuration management
//!
//! Built once in `main` and handed to every component; nothing else reads the
//! environment.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use ons_common::retry::RetryPolicy;

use crate::ingest::staging::UploadPolicy;
use crate::storage::config::StorageConfig;

// ============================================================================
// Server Configuration Constants
// ============================================================================

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 8000;

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 2;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default per-statement timeout in seconds.
pub const DEFAULT_DATABASE_STATEMENT_TIMEOUT_SECS: u64 = 60;

/// Default CORS allowed origin for local development.
pub const DEFAULT_CORS_ALLOWED_ORIGIN: &str = "http://localhost:3000";

// ============================================================================
// Pipeline Defaults
// ============================================================================

pub const DEFAULT_STAGING_DIR: &str = "./staging";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 500;
pub const DEFAULT_DOWNLOAD_CONCURRENCY: usize = 4;
pub const DEFAULT_PROCEDURE: &str = "materialize_trusted";
pub const DEFAULT_ORDERING_COLUMN: &str = "ear_data";
pub const DEFAULT_TIEBREAK_COLUMN: &str = "id_reservatorio";
pub const DEFAULT_PARTITION_COLUMN: &str = "dt";

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub cors: CorsConfig,
    pub pipeline: PipelineConfig,
    pub storage: StorageConfig,
}

/// Server-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub statement_timeout_secs: u64,
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
}

/// Ingestion and serving settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Warehouse project, reported as the connection's application name
    pub project_id: String,
    /// Schema holding one raw table per package, partitioned by `partition_column`
    pub raw_dataset: String,
    /// Schema holding the trusted tables and the materialization procedure
    pub trusted_dataset: String,
    /// Trusted table served by `/records`
    pub table_id: String,
    pub bucket: String,
    pub catalog_url: String,
    pub resource_format: String,
    pub staging_dir: PathBuf,
    pub http_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub download_concurrency: usize,
    pub upload_policy: UploadPolicy,
    pub procedure: String,
    pub ordering_column: String,
    pub tiebreak_column: Option<String>,
    pub partition_column: String,
}

impl PipelineConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.retry_base_delay_ms),
        )
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

fn required(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<String> {
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| anyhow::anyhow!("Missing required environment variable {}", key))
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key).and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}

fn text(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    lookup(key).unwrap_or_else(|| default.to_string())
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let bucket = required(&lookup, "ONS_BUCKET")?;

        let upload_policy = match lookup("ONS_UPLOAD_POLICY") {
            Some(value) => value.parse()?,
            None => UploadPolicy::default(),
        };

        let tiebreak_column = match lookup("ONS_TIEBREAK_COLUMN") {
            Some(value) if value.trim().is_empty() => None,
            Some(value) => Some(value.trim().to_string()),
            None => Some(DEFAULT_TIEBREAK_COLUMN.to_string()),
        };

        let config = Config {
            server: ServerConfig {
                host: text(&lookup, "ONS_HOST", DEFAULT_SERVER_HOST),
                port: parsed(&lookup, "ONS_PORT", DEFAULT_SERVER_PORT),
                shutdown_timeout_secs: parsed(
                    &lookup,
                    "ONS_SHUTDOWN_TIMEOUT",
                    DEFAULT_SHUTDOWN_TIMEOUT_SECS,
                ),
            },
            database: DatabaseConfig {
                url: required(&lookup, "DATABASE_URL")?,
                max_connections: parsed(
                    &lookup,
                    "DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                ),
                min_connections: parsed(
                    &lookup,
                    "DATABASE_MIN_CONNECTIONS",
                    DEFAULT_DATABASE_MIN_CONNECTIONS,
                ),
                connect_timeout_secs: parsed(
                    &lookup,
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                ),
                statement_timeout_secs: parsed(
                    &lookup,
                    "DATABASE_STATEMENT_TIMEOUT",
                    DEFAULT_DATABASE_STATEMENT_TIMEOUT_SECS,
                ),
            },
            cors: CorsConfig {
                allowed_origins: text(&lookup, "CORS_ALLOWED_ORIGINS", DEFAULT_CORS_ALLOWED_ORIGIN)
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                allow_credentials: parsed(&lookup, "CORS_ALLOW_CREDENTIALS", false),
            },
            pipeline: PipelineConfig {
                project_id: required(&lookup, "ONS_PROJECT_ID")?,
                raw_dataset: required(&lookup, "ONS_RAW_DATASET")?,
                trusted_dataset: required(&lookup, "ONS_TRUSTED_DATASET")?,
                table_id: required(&lookup, "ONS_TABLE_ID")?,
                bucket: bucket.clone(),
                catalog_url: text(
                    &lookup,
                    "ONS_CATALOG_URL",
                    ons_ingest::catalog::DEFAULT_CATALOG_URL,
                ),
                resource_format: text(
                    &lookup,
                    "ONS_RESOURCE_FORMAT",
                    ons_ingest::catalog::DEFAULT_RESOURCE_FORMAT,
                ),
                staging_dir: PathBuf::from(text(&lookup, "ONS_STAGING_DIR", DEFAULT_STAGING_DIR)),
                http_timeout_secs: parsed(&lookup, "ONS_HTTP_TIMEOUT", DEFAULT_HTTP_TIMEOUT_SECS),
                max_retries: parsed(&lookup, "ONS_MAX_RETRIES", DEFAULT_MAX_RETRIES),
                retry_base_delay_ms: parsed(
                    &lookup,
                    "ONS_RETRY_BASE_DELAY_MS",
                    DEFAULT_RETRY_BASE_DELAY_MS,
                ),
                download_concurrency: parsed(
                    &lookup,
                    "ONS_DOWNLOAD_CONCURRENCY",
                    DEFAULT_DOWNLOAD_CONCURRENCY,
                ),
                upload_policy,
                procedure: text(&lookup, "ONS_PROCEDURE", DEFAULT_PROCEDURE),
                ordering_column: text(&lookup, "ONS_ORDERING_COLUMN", DEFAULT_ORDERING_COLUMN),
                tiebreak_column,
                partition_column: text(&lookup, "ONS_PARTITION_COLUMN", DEFAULT_PARTITION_COLUMN),
            },
            storage: StorageConfig::from_lookup(&lookup, bucket),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port must be greater than 0");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        if self.pipeline.download_concurrency == 0 {
            anyhow::bail!("ONS_DOWNLOAD_CONCURRENCY must be greater than 0");
        }

        let pipeline = &self.pipeline;
        let mut identifiers = vec![
            ("ONS_RAW_DATASET", pipeline.raw_dataset.as_str()),
            ("ONS_TRUSTED_DATASET", pipeline.trusted_dataset.as_str()),
            ("ONS_TABLE_ID", pipeline.table_id.as_str()),
            ("ONS_PROCEDURE", pipeline.procedure.as_str()),
            ("ONS_ORDERING_COLUMN", pipeline.ordering_column.as_str()),
            ("ONS_PARTITION_COLUMN", pipeline.partition_column.as_str()),
        ];
        if let Some(tiebreak) = &pipeline.tiebreak_column {
            identifiers.push(("ONS_TIEBREAK_COLUMN", tiebreak.as_str()));
        }
        for (key, value) in identifiers {
            crate::warehouse::Ident::new(value)
                .map_err(|e| anyhow::anyhow!("{}: {}", key, e))?;
        }

        if self.cors.allowed_origins.is_empty() {
            tracing::warn!("No CORS origins configured - all origins will be allowed");
        }

        Ok(())
    }
}
