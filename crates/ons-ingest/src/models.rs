//! Data types passed between ingestion stages

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One downloadable resource listed by the catalog
///
/// `name` ends with a `-YYYY` year token, e.g. `ear-diario-por-reservatorio-2024`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub format: String,
}

impl ResourceDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            format: String::new(),
        }
    }

    /// File name used in the staging directory, without extension
    ///
    /// Path separators and other unsafe characters are replaced so a hostile
    /// name cannot escape the staging directory.
    pub fn staging_stem(&self) -> String {
        let source = if self.name.trim().is_empty() {
            &self.id
        } else {
            &self.name
        };

        let stem: String = source
            .trim()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();

        stem.trim_start_matches('.').to_string()
    }
}

/// A downloaded, normalized file waiting in the staging directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagedFile {
    pub resource_id: String,
    pub name: String,
    pub path: PathBuf,
    pub bytes: u64,
    pub rows: usize,
    pub columns: usize,
}

/// A resource that was skipped without failing the batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadWarning {
    pub resource_id: String,
    pub name: String,
    pub reason: String,
}
