//! Staging sink: staging directory -> object storage
//!
//! Every file under the staging directory is uploaded to
//! `ons/{package}/dt={today}/{relative_path}`. A file is deleted locally only
//! after its own upload succeeded, so a partial batch never loses data. The
//! directory is reset to empty only when every file made it.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use chrono::NaiveDate;
use ons_common::{retry::RetryPolicy, Clock, OnsError, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use walkdir::WalkDir;

use crate::storage::ObjectStore;

/// What to do with the rest of the batch after a file fails to upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadPolicy {
    /// Stop at the first failure
    #[default]
    Abort,
    /// Keep uploading the remaining files
    Continue,
}

impl FromStr for UploadPolicy {
    type Err = OnsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "abort" => Ok(UploadPolicy::Abort),
            "continue" => Ok(UploadPolicy::Continue),
            other => Err(OnsError::Config(format!(
                "Invalid upload policy '{}', expected 'abort' or 'continue'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadedObject {
    pub path: PathBuf,
    pub key: String,
    pub size: i64,
    pub checksum: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedUpload {
    pub path: PathBuf,
    pub key: String,
    pub cause: String,
}

/// Per-file outcome of one staging upload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UploadReport {
    pub prefix: String,
    pub uploaded: Vec<UploadedObject>,
    pub failed: Vec<FailedUpload>,
    /// Files skipped after an abort; still on local disk
    pub not_attempted: Vec<PathBuf>,
}

impl UploadReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.not_attempted.is_empty()
    }

    /// Files still sitting in the staging directory
    pub fn retained(&self) -> Vec<PathBuf> {
        self.failed
            .iter()
            .map(|f| f.path.clone())
            .chain(self.not_attempted.iter().cloned())
            .collect()
    }
}

/// `ons/{package}/dt={YYYY-MM-DD}/`
pub fn destination_prefix(package_name: &str, today: NaiveDate) -> String {
    format!("ons/{}/dt={}/", package_name, today.format("%Y-%m-%d"))
}

/// Object key for a path relative to the staging root, always `/`-separated
pub fn object_key(prefix: &str, relative: &Path) -> String {
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    format!("{}{}", prefix, parts.join("/"))
}

pub struct StagingSink {
    store: Arc<dyn ObjectStore>,
    retry: RetryPolicy,
    policy: UploadPolicy,
    clock: Arc<dyn Clock>,
}

impl StagingSink {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        retry: RetryPolicy,
        policy: UploadPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            retry,
            policy,
            clock,
        }
    }

    /// Upload every file below `source_dir` under the package's dated prefix
    #[instrument(skip(self, source_dir), fields(package = %package_name))]
    pub async fn upload(&self, source_dir: &Path, package_name: &str) -> Result<UploadReport> {
        let prefix = destination_prefix(package_name, self.clock.today());
        let mut report = UploadReport {
            prefix: prefix.clone(),
            ..UploadReport::default()
        };

        if !source_dir.exists() {
            tokio::fs::create_dir_all(source_dir).await?;
            return Ok(report);
        }

        let files = list_files(source_dir)?;
        let mut pending = files.into_iter();

        while let Some((path, relative)) = pending.next() {
            let key = object_key(&prefix, &relative);
            let outcome = self
                .retry
                .run("stage upload", || self.store.put_file(&key, &path))
                .await;

            match outcome {
                Ok(result) => {
                    if let Err(e) = tokio::fs::remove_file(&path).await {
                        warn!(path = %path.display(), error = %e, "Uploaded file could not be removed");
                    }
                    report.uploaded.push(UploadedObject {
                        path,
                        key,
                        size: result.size,
                        checksum: result.checksum,
                    });
                },
                Err(e) => {
                    warn!(path = %path.display(), %key, error = %e, "Upload failed");
                    report.failed.push(FailedUpload {
                        path,
                        key,
                        cause: e.to_string(),
                    });
                    if self.policy == UploadPolicy::Abort {
                        report.not_attempted = pending.by_ref().map(|(p, _)| p).collect();
                        break;
                    }
                },
            }
        }

        if report.is_complete() {
            tokio::fs::remove_dir_all(source_dir).await?;
            tokio::fs::create_dir_all(source_dir).await?;
            info!(uploaded = report.uploaded.len(), %prefix, "Staging directory uploaded and cleared");
        } else {
            warn!(
                uploaded = report.uploaded.len(),
                failed = report.failed.len(),
                not_attempted = report.not_attempted.len(),
                "Partial upload, remaining files kept in staging"
            );
        }

        Ok(report)
    }
}

/// Regular files below `root` with their relative paths, sorted
fn list_files(root: &Path) -> Result<Vec<(PathBuf, PathBuf)>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| OnsError::Io(std::io::Error::other(e)))?
            .to_path_buf();
        files.push((entry.into_path(), relative));
    }
    Ok(files)
}
