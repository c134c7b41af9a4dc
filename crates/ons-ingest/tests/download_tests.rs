//! Integration tests for the resource downloader
//!
//! A wiremock server plays both the CKAN catalog and the file host; the
//! payloads are real Parquet files built with polars.

use std::fs::File;
use std::sync::Arc;
use std::time::Duration;

use ons_common::{retry::RetryPolicy, OnsError};
use ons_ingest::{
    CatalogClient, CatalogConfig, DownloadConfig, ResourceDescriptor, ResourceDownloader,
};
use polars::prelude::*;
use serde_json::json;
use tempfile::TempDir;
use wiremock::{
    matchers::{method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

fn parquet_payload() -> Vec<u8> {
    let mut df = df!(
        "id_reservatorio" => ["FURNAS", "EMBORCACAO", "TRES MARIAS"],
        "ear_data" => ["2024-01-01", "2024-01-01", "2024-01-02"],
        "ear_reservatorio_percentual" => [61.2f64, 48.0, 73.9],
    )
    .unwrap();
    let mut buf = Vec::new();
    ParquetWriter::new(&mut buf).finish(&mut df).unwrap();
    buf
}

async fn mount_resource(server: &MockServer, id: &str, url: Option<String>) {
    Mock::given(method("GET"))
        .and(path("/api/3/action/resource_show"))
        .and(query_param("id", id))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "result": {"id": id, "url": url}
        })))
        .mount(server)
        .await;
}

fn downloader(server: &MockServer, staging: &TempDir) -> ResourceDownloader {
    let catalog = Arc::new(
        CatalogClient::new(CatalogConfig::with_base_url(format!("{}/api/3/action", server.uri())))
            .unwrap(),
    );
    let config = DownloadConfig {
        retry: RetryPolicy::new(3, Duration::from_millis(5)),
        timeout: Duration::from_secs(5),
        ..DownloadConfig::with_staging_dir(staging.path())
    };
    ResourceDownloader::new(catalog, config).unwrap()
}

#[tokio::test]
async fn test_download_normalizes_and_skips_missing_urls() {
    let server = MockServer::start().await;
    let staging = TempDir::new().unwrap();

    mount_resource(&server, "r2024", Some(format!("{}/files/ear-2024.parquet", server.uri()))).await;
    mount_resource(&server, "r2025", None).await;
    Mock::given(method("GET"))
        .and(path("/files/ear-2024.parquet"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(parquet_payload()))
        .mount(&server)
        .await;

    let resources = vec![
        ResourceDescriptor::new("r2024", "ear-diario-2024"),
        ResourceDescriptor::new("r2025", "ear-diario-2025"),
    ];
    let report = downloader(&server, &staging).download_all(&resources).await.unwrap();

    assert_eq!(report.staged.len(), 1);
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].resource_id, "r2025");

    let staged = &report.staged[0];
    assert_eq!(staged.path, staging.path().join("ear-diario-2024.parquet"));
    assert_eq!(staged.rows, 3);
    assert_eq!(staged.columns, 3);

    let df = ParquetReader::new(File::open(&staged.path).unwrap()).finish().unwrap();
    assert_eq!(
        df.column("ear_reservatorio_percentual").unwrap().dtype(),
        &DataType::String
    );
}

#[tokio::test]
async fn test_download_overwrites_previous_copy() {
    let server = MockServer::start().await;
    let staging = TempDir::new().unwrap();
    std::fs::write(staging.path().join("ear-diario-2024.parquet"), b"stale").unwrap();

    mount_resource(&server, "r2024", Some(format!("{}/files/ear-2024.parquet", server.uri()))).await;
    Mock::given(method("GET"))
        .and(path("/files/ear-2024.parquet"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(parquet_payload()))
        .mount(&server)
        .await;

    let report = downloader(&server, &staging)
        .download_all(&[ResourceDescriptor::new("r2024", "ear-diario-2024")])
        .await
        .unwrap();

    assert_eq!(report.staged[0].rows, 3);
    assert_ne!(std::fs::read(&report.staged[0].path).unwrap(), b"stale");
}

#[tokio::test]
async fn test_resources_sharing_a_staging_file_are_downloaded_in_turn() {
    let server = MockServer::start().await;
    let staging = TempDir::new().unwrap();

    for id in ["r-space", "r-underscore"] {
        mount_resource(&server, id, Some(format!("{}/files/{}.parquet", server.uri(), id))).await;
        Mock::given(method("GET"))
            .and(path(format!("/files/{}.parquet", id)))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(parquet_payload()))
            .expect(1)
            .mount(&server)
            .await;
    }

    // Both names map to `ear_2024.parquet`
    let resources = vec![
        ResourceDescriptor::new("r-space", "ear 2024"),
        ResourceDescriptor::new("r-underscore", "ear_2024"),
    ];
    let catalog = Arc::new(
        CatalogClient::new(CatalogConfig::with_base_url(format!("{}/api/3/action", server.uri())))
            .unwrap(),
    );
    let config = DownloadConfig {
        concurrency: 8,
        ..DownloadConfig::with_staging_dir(staging.path())
    };

    let report = ResourceDownloader::new(catalog, config)
        .unwrap()
        .download_all(&resources)
        .await
        .unwrap();

    assert_eq!(report.staged.len(), 1);
    assert_eq!(report.staged[0].resource_id, "r-underscore");
    assert_eq!(report.staged[0].path, staging.path().join("ear_2024.parquet"));
    assert_eq!(report.staged[0].rows, 3);
    assert!(report.warnings.is_empty());

    let files: Vec<_> = std::fs::read_dir(staging.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(files, vec![std::ffi::OsString::from("ear_2024.parquet")]);
}

#[tokio::test]
async fn test_download_retries_transient_failures() {
    let server = MockServer::start().await;
    let staging = TempDir::new().unwrap();

    mount_resource(&server, "r2024", Some(format!("{}/files/ear-2024.parquet", server.uri()))).await;
    Mock::given(method("GET"))
        .and(path("/files/ear-2024.parquet"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/ear-2024.parquet"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(parquet_payload()))
        .mount(&server)
        .await;

    let report = downloader(&server, &staging)
        .download_all(&[ResourceDescriptor::new("r2024", "ear-diario-2024")])
        .await
        .unwrap();

    assert_eq!(report.staged.len(), 1);
}

#[tokio::test]
async fn test_download_rejected_aborts_batch() {
    let server = MockServer::start().await;
    let staging = TempDir::new().unwrap();

    mount_resource(&server, "r2024", Some(format!("{}/files/ear-2024.parquet", server.uri()))).await;
    Mock::given(method("GET"))
        .and(path("/files/ear-2024.parquet"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;

    let err = downloader(&server, &staging)
        .download_all(&[ResourceDescriptor::new("r2024", "ear-diario-2024")])
        .await
        .unwrap_err();

    assert!(matches!(err, OnsError::RemoteRejected { status: 403, .. }));
}

#[tokio::test]
async fn test_download_non_parquet_payload_is_data_format() {
    let server = MockServer::start().await;
    let staging = TempDir::new().unwrap();

    mount_resource(&server, "r2024", Some(format!("{}/files/ear-2024.parquet", server.uri()))).await;
    Mock::given(method("GET"))
        .and(path("/files/ear-2024.parquet"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let err = downloader(&server, &staging)
        .download_all(&[ResourceDescriptor::new("r2024", "ear-diario-2024")])
        .await
        .unwrap_err();

    assert!(matches!(err, OnsError::DataFormat(_)));
}
