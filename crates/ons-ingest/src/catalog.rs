//! CKAN catalog client
//!
//! The ONS open-data portal exposes a CKAN action API:
//!
//! - `GET {base}/package_show?id=<package>` lists the package's resources
//! - `GET {base}/resource_show?id=<resource>` returns the resource's direct URL
//!
//! Listing absorbs every failure (empty body, invalid JSON, `success: false`,
//! network errors) and returns an empty list. URL resolution does propagate
//! errors so the downloader can retry transient ones.

use async_trait::async_trait;
use ons_common::{OnsError, Result};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::models::ResourceDescriptor;

pub const DEFAULT_CATALOG_URL: &str = "https://dados.ons.org.br/api/3/action";
pub const DEFAULT_RESOURCE_FORMAT: &str = "PARQUET";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Remote resource catalog
#[async_trait]
pub trait ResourceCatalog: Send + Sync {
    /// Resources of the configured format; empty on any failure
    async fn list_resources(&self, package_id: &str) -> Vec<ResourceDescriptor>;

    /// Direct download URL of a resource, `None` when the catalog has none
    async fn resolve_download_url(&self, resource_id: &str) -> Result<Option<String>>;
}

#[derive(Debug, Clone)]
pub struct CatalogConfig {
    /// Action API base, e.g. `https://dados.ons.org.br/api/3/action`
    pub base_url: String,
    /// Resource format to keep, compared case-insensitively
    pub format: String,
    pub timeout: Duration,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_CATALOG_URL.to_string(),
            format: DEFAULT_RESOURCE_FORMAT.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl CatalogConfig {
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }
}

/// CKAN envelope: `{"success": bool, "result": ..., "error": ...}`
#[derive(Debug, Deserialize)]
struct CkanResponse<T> {
    #[serde(default = "default_success")]
    success: bool,
    result: Option<T>,
    error: Option<serde_json::Value>,
}

fn default_success() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct PackageResult {
    #[serde(default)]
    resources: Vec<CkanResource>,
}

#[derive(Debug, Deserialize)]
struct CkanResource {
    id: Option<String>,
    name: Option<String>,
    #[serde(default)]
    format: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResourceResult {
    url: Option<String>,
}

pub struct CatalogClient {
    client: Client,
    config: CatalogConfig,
}

impl CatalogClient {
    pub fn new(config: CatalogConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("ons-ingest/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| OnsError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn action_url(&self, action: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), action)
    }

    async fn get_action<T>(&self, action: &str, id: &str) -> Result<CkanResponse<T>>
    where
        T: for<'de> Deserialize<'de>,
    {
        let url = self.action_url(action);
        debug!("GET {}?id={}", url, id);

        let response = self.client.get(&url).query(&[("id", id)]).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(OnsError::from_status(status, &format!("{} {}", action, id)));
        }

        let body = response.bytes().await?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(OnsError::DataFormat(format!("Empty response from {}", action)));
        }

        serde_json::from_slice(&body)
            .map_err(|e| OnsError::DataFormat(format!("Invalid JSON from {}: {}", action, e)))
    }

    fn keep_format(&self, resource: &CkanResource) -> bool {
        resource
            .format
            .as_deref()
            .map(|f| f.trim().eq_ignore_ascii_case(&self.config.format))
            .unwrap_or(false)
    }
}

#[async_trait]
impl ResourceCatalog for CatalogClient {
    #[instrument(skip(self))]
    async fn list_resources(&self, package_id: &str) -> Vec<ResourceDescriptor> {
        let envelope = match self.get_action::<PackageResult>("package_show", package_id).await {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(package = package_id, error = %e, "Catalog lookup failed, treating as empty");
                return Vec::new();
            },
        };

        if !envelope.success || envelope.error.is_some() {
            warn!(
                package = package_id,
                error = ?envelope.error,
                "Catalog reported an error, treating as empty"
            );
            return Vec::new();
        }

        let resources: Vec<ResourceDescriptor> = envelope
            .result
            .map(|r| r.resources)
            .unwrap_or_default()
            .into_iter()
            .filter(|r| self.keep_format(r))
            .filter_map(|r| match (r.id, r.name) {
                (Some(id), Some(name)) if !id.is_empty() => Some(ResourceDescriptor {
                    id,
                    name,
                    format: r.format.unwrap_or_default(),
                }),
                _ => None,
            })
            .collect();

        info!(
            package = package_id,
            format = %self.config.format,
            count = resources.len(),
            "Catalog resources listed"
        );

        resources
    }

    #[instrument(skip(self))]
    async fn resolve_download_url(&self, resource_id: &str) -> Result<Option<String>> {
        let envelope = self
            .get_action::<ResourceResult>("resource_show", resource_id)
            .await?;

        if !envelope.success {
            warn!(
                resource = resource_id,
                error = ?envelope.error,
                "resource_show reported an error, no download URL"
            );
            return Ok(None);
        }

        Ok(envelope
            .result
            .and_then(|r| r.url)
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty()))
    }
}
