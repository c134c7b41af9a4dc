//! Resource downloader
//!
//! Resolves each resource's download URL, fetches it, writes it to the
//! staging directory and rewrites it with every column as text.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::{stream, FutureExt, StreamExt, TryStreamExt};
use ons_common::{retry::RetryPolicy, OnsError, Result};
use reqwest::Client;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::catalog::ResourceCatalog;
use crate::models::{DownloadWarning, ResourceDescriptor, StagedFile};
use crate::normalize::normalize_parquet;

pub const DEFAULT_STAGING_DIR: &str = "./staging";
pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_EXTENSION: &str = "parquet";

#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Local buffer holding files between download and upload
    pub staging_dir: PathBuf,
    /// Per-request timeout
    pub timeout: Duration,
    pub retry: RetryPolicy,
    /// Maximum resources fetched at once
    pub concurrency: usize,
    pub extension: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            staging_dir: PathBuf::from(DEFAULT_STAGING_DIR),
            timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            concurrency: DEFAULT_CONCURRENCY,
            extension: DEFAULT_EXTENSION.to_string(),
        }
    }
}

impl DownloadConfig {
    pub fn with_staging_dir(staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            ..Self::default()
        }
    }

    pub fn staging_path(&self, descriptor: &ResourceDescriptor) -> PathBuf {
        self.staging_dir
            .join(format!("{}.{}", descriptor.staging_stem(), self.extension))
    }
}

/// Result of one batch; one staged file per staging path, in input order
#[derive(Debug, Default, Clone, Serialize)]
pub struct DownloadReport {
    pub staged: Vec<StagedFile>,
    pub warnings: Vec<DownloadWarning>,
}

enum Outcome {
    Staged(StagedFile),
    Skipped(DownloadWarning),
}

/// Fetches resources into the staging directory and normalizes them
pub struct ResourceDownloader {
    catalog: Arc<dyn ResourceCatalog>,
    client: Client,
    config: DownloadConfig,
}

impl ResourceDownloader {
    pub fn new(catalog: Arc<dyn ResourceCatalog>, config: DownloadConfig) -> Result<Self> {
        if config.extension.is_empty() || config.extension.contains(['/', '\\', '.']) {
            return Err(OnsError::Config(format!(
                "Invalid staging extension '{}'",
                config.extension
            )));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("ons-ingest/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| OnsError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            catalog,
            client,
            config,
        })
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Download, persist and normalize every descriptor
    ///
    /// Resources without a download URL are reported as warnings and skipped.
    /// Any other failure aborts the batch.
    #[instrument(skip_all, fields(resources = descriptors.len()))]
    pub async fn download_all(&self, descriptors: &[ResourceDescriptor]) -> Result<DownloadReport> {
        tokio::fs::create_dir_all(&self.config.staging_dir).await?;

        // Descriptors sharing a staging path run one after another, last write wins
        let mut groups: Vec<(PathBuf, Vec<ResourceDescriptor>)> = Vec::new();
        for descriptor in descriptors {
            let path = self.config.staging_path(descriptor);
            match groups.iter_mut().find(|(p, _)| *p == path) {
                Some((_, group)) => group.push(descriptor.clone()),
                None => groups.push((path, vec![descriptor.clone()])),
            }
        }

        let outcomes: Vec<Vec<Outcome>> = stream::iter(groups)
            .map(|(path, group)| async move { self.download_group(path, group).await }.boxed())
            .buffered(self.config.concurrency.max(1))
            .try_collect()
            .await?;

        let mut report = DownloadReport::default();
        for outcome in outcomes.into_iter().flatten() {
            match outcome {
                Outcome::Staged(file) => report.staged.push(file),
                Outcome::Skipped(warning) => report.warnings.push(warning),
            }
        }

        info!(
            staged = report.staged.len(),
            skipped = report.warnings.len(),
            "Download batch complete"
        );
        Ok(report)
    }

    /// Descriptors writing the same staging file, in order
    ///
    /// Only the last staged descriptor is reported; earlier copies were overwritten.
    async fn download_group(
        &self,
        path: PathBuf,
        group: Vec<ResourceDescriptor>,
    ) -> Result<Vec<Outcome>> {
        if group.len() > 1 {
            warn!(path = %path.display(), count = group.len(), "Resources share a staging file");
        }

        let mut warnings = Vec::new();
        let mut staged = None;
        for descriptor in &group {
            match self.download_one(descriptor, &path).await? {
                Outcome::Staged(file) => staged = Some(file),
                skipped @ Outcome::Skipped(_) => warnings.push(skipped),
            }
        }

        Ok(staged.map(Outcome::Staged).into_iter().chain(warnings).collect())
    }

    async fn download_one(&self, descriptor: &ResourceDescriptor, path: &Path) -> Result<Outcome> {
        let skip = |reason: String| -> Result<Outcome> {
            warn!(resource = %descriptor.name, id = %descriptor.id, "{}", reason);
            Ok(Outcome::Skipped(DownloadWarning {
                resource_id: descriptor.id.clone(),
                name: descriptor.name.clone(),
                reason,
            }))
        };

        let resolved = self
            .config
            .retry
            .run("resolve download url", || {
                self.catalog.resolve_download_url(&descriptor.id)
            })
            .await;

        let url = match resolved {
            Ok(Some(url)) => url,
            Ok(None) => return skip("No download URL in catalog".to_string()),
            Err(OnsError::RemoteNotFound(what)) => {
                return skip(format!("Resource not found in catalog: {}", what))
            },
            Err(e) => return Err(e),
        };

        let bytes = match self
            .config
            .retry
            .run("download", || self.fetch(&url))
            .await
        {
            Ok(bytes) => bytes,
            Err(OnsError::RemoteNotFound(_)) => {
                return skip(format!("Download URL returned 404: {}", url))
            },
            Err(e) => return Err(e),
        };

        tokio::fs::write(path, &bytes).await?;
        info!(
            resource = %descriptor.name,
            path = %path.display(),
            bytes = bytes.len(),
            "Downloaded"
        );

        let summary = normalize_in_background(path.to_path_buf()).await?;

        Ok(Outcome::Staged(StagedFile {
            resource_id: descriptor.id.clone(),
            name: descriptor.name.clone(),
            bytes: tokio::fs::metadata(path).await?.len(),
            path: path.to_path_buf(),
            rows: summary.rows,
            columns: summary.columns,
        }))
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(OnsError::from_status(status, url));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

async fn normalize_in_background(path: PathBuf) -> Result<crate::normalize::NormalizeSummary> {
    tokio::task::spawn_blocking(move || normalize_parquet(&path))
        .await
        .map_err(|e| OnsError::Io(std::io::Error::other(e)))?
}
