use async_trait::async_trait;
use aws_sdk_s3::{
    config::{http::HttpResponse, Credentials, Region},
    error::SdkError,
    operation::put_object::PutObjectError,
    primitives::ByteStream,
    Client,
};
use ons_common::{OnsError, Result};
use std::path::Path;
use tracing::{debug, info, instrument};

pub mod config;

/// Durable object storage for staged files
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload a local file under `key`, replacing any existing object
    async fn put_file(&self, key: &str, path: &Path) -> Result<UploadResult>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResult {
    pub key: String,
    pub checksum: String,
    pub size: i64,
}

/// S3-compatible storage client
#[derive(Clone)]
pub struct Storage {
    client: Client,
    bucket: String,
}

impl Storage {
    pub fn new(config: config::StorageConfig) -> Self {
        debug!("Initializing storage with config: {:?}", config);

        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "ons-storage",
        );

        let mut s3_config_builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(s3_config_builder.build());

        info!("Storage client initialized for bucket: {}", config.bucket);

        Self {
            client,
            bucket: config.bucket,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ObjectStore for Storage {
    #[instrument(skip(self, path), fields(bucket = %self.bucket))]
    async fn put_file(&self, key: &str, path: &Path) -> Result<UploadResult> {
        let data = tokio::fs::read(path).await?;
        let checksum = calculate_sha256(&data);
        let size = data.len() as i64;

        debug!("Uploading {} bytes to s3://{}/{}", size, self.bucket, key);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("application/vnd.apache.parquet")
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| classify_sdk_error(key, e))?;

        info!("Uploaded {} to s3://{}/{}", path.display(), self.bucket, key);

        Ok(UploadResult {
            key: key.to_string(),
            checksum,
            size,
        })
    }
}

fn classify_sdk_error(key: &str, err: SdkError<PutObjectError, HttpResponse>) -> OnsError {
    let message = format!("s3 put {}: {}", key, err);

    match err.raw_response().map(|r| r.status().as_u16()) {
        Some(404) => OnsError::RemoteNotFound(message),
        Some(status) if status >= 500 || status == 429 => OnsError::TransientIo(message),
        Some(status) => OnsError::RemoteRejected { status, message },
        // no response at all: timeout, dispatch or construction failure
        None => match err {
            SdkError::ConstructionFailure(_) => OnsError::Config(message),
            _ => OnsError::TransientIo(message),
        },
    }
}

fn calculate_sha256(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
