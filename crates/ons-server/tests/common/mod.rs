//! Shared fixtures for ons-server integration tests
//!
//! In-memory fakes stand in for the warehouse and the object store; a
//! wiremock server plays the CKAN catalog and the file host. Nothing here
//! needs Docker or network access.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{body::Body, http::Request, Router};
use chrono::NaiveDate;
use ons_common::{retry::RetryPolicy, FixedClock, OnsError, Result};
use ons_ingest::{CatalogClient, CatalogConfig, DownloadConfig};
use ons_server::{
    features::{self, FeatureState},
    ingest::{
        FreshnessGate, IngestionOrchestrator, MaterializationTrigger, StagingSink, UploadPolicy,
    },
    reader::PaginatedReader,
    storage::{ObjectStore, UploadResult},
    warehouse::{Ident, KeysetScan, Position, Row, TableRef, Warehouse},
};
use polars::prelude::*;
use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::{
    matchers::{method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

pub const PACKAGE_NAME: &str = "ear-diario-por-reservatorio";
pub const PACKAGE_ID: &str = "pkg-ear";
pub const RAW_TABLE: &str = "raw.ear_diario_por_reservatorio";

pub fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
}

pub fn day(month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, month, day).unwrap()
}

// ============================================================================
// Warehouse fake
// ============================================================================

/// Trusted rows plus raw partitions, keyed by `dataset.table`
#[derive(Default)]
pub struct FakeWarehouse {
    rows: Mutex<Vec<(NaiveDate, String, Value)>>,
    partitions: Mutex<HashMap<String, Vec<String>>>,
    pub queries: AtomicUsize,
    pub procedure_calls: AtomicUsize,
    pub fail_procedure: AtomicBool,
    pub fail_partition_check: AtomicBool,
    /// Trusted table not yet created
    pub missing_trusted: AtomicBool,
    pub unhealthy: AtomicBool,
}

impl FakeWarehouse {
    pub fn with_rows(rows: impl IntoIterator<Item = (NaiveDate, String)>) -> Self {
        let warehouse = Self::default();
        for (date, key) in rows {
            warehouse.insert(date, &key);
        }
        warehouse
    }

    pub fn insert(&self, date: NaiveDate, key: &str) {
        let value = json!({
            "ear_data": date.format("%Y-%m-%d").to_string(),
            "id_reservatorio": key,
        });
        self.rows.lock().unwrap().push((date, key.to_string(), value));
    }

    /// Create an empty raw table
    pub fn create_table(&self, table: &str) {
        self.partitions
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default();
    }

    /// Add one raw row in partition `dt`
    pub fn add_partition(&self, table: &str, dt: NaiveDate) {
        self.partitions
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .push(dt.format("%Y-%m-%d").to_string());
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn procedure_count(&self) -> usize {
        self.procedure_calls.load(Ordering::SeqCst)
    }

    fn sorted_after(&self, scan: &KeysetScan) -> Vec<Row> {
        let mut rows: Vec<_> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|(date, key, _)| scan.admits(*date, key))
            .cloned()
            .collect();
        rows.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));

        rows.into_iter()
            .map(|(date, key, value)| Row {
                position: Position {
                    date,
                    key: scan.tiebreak.as_ref().map(|_| key),
                },
                value,
            })
            .collect()
    }
}

#[async_trait]
impl Warehouse for FakeWarehouse {
    async fn count_partition(&self, table: &TableRef, _column: &Ident, value: &str) -> Result<i64> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.fail_partition_check.load(Ordering::SeqCst) {
            return Err(OnsError::TransientIo("connection reset".into()));
        }
        match self.partitions.lock().unwrap().get(&table.to_string()) {
            Some(values) => Ok(values.iter().filter(|v| v.as_str() == value).count() as i64),
            None => Err(OnsError::RemoteNotFound(format!("relation {} does not exist", table))),
        }
    }

    async fn call_procedure(&self, dataset: &Ident, procedure: &Ident) -> Result<()> {
        self.procedure_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_procedure.load(Ordering::SeqCst) {
            return Err(OnsError::Warehouse(format!(
                "procedure {}.{} raised an exception",
                dataset, procedure
            )));
        }
        Ok(())
    }

    async fn fetch_after(&self, scan: &KeysetScan, limit: i64) -> Result<Vec<Row>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.missing_trusted.load(Ordering::SeqCst) {
            return Err(OnsError::RemoteNotFound(format!(
                "relation {} does not exist",
                scan.table
            )));
        }
        Ok(self
            .sorted_after(scan)
            .into_iter()
            .take(limit as usize)
            .collect())
    }

    async fn count_after(&self, scan: &KeysetScan) -> Result<i64> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.sorted_after(scan).len() as i64)
    }

    async fn health_check(&self) -> Result<()> {
        if self.unhealthy.load(Ordering::SeqCst) {
            return Err(OnsError::TransientIo("pool timed out".into()));
        }
        Ok(())
    }
}

// ============================================================================
// Object store fake
// ============================================================================

#[derive(Default)]
pub struct MemoryStore {
    pub objects: Mutex<BTreeMap<String, Vec<u8>>>,
    /// Keys ending with any of these suffixes are rejected
    pub reject_suffixes: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn reject(&self, suffix: &str) {
        self.reject_suffixes.lock().unwrap().push(suffix.to_string());
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put_file(&self, key: &str, path: &Path) -> Result<UploadResult> {
        if self
            .reject_suffixes
            .lock()
            .unwrap()
            .iter()
            .any(|s| key.ends_with(s.as_str()))
        {
            return Err(OnsError::RemoteRejected {
                status: 403,
                message: format!("AccessDenied for {}", key),
            });
        }

        let data = tokio::fs::read(path).await?;
        let size = data.len() as i64;
        self.objects.lock().unwrap().insert(key.to_string(), data);
        Ok(UploadResult {
            key: key.to_string(),
            checksum: String::new(),
            size,
        })
    }
}

// ============================================================================
// Catalog and payloads
// ============================================================================

pub fn parquet_payload() -> Vec<u8> {
    let mut df = df!(
        "id_reservatorio" => ["FURNAS", "EMBORCACAO"],
        "ear_data" => ["2024-01-01", "2024-01-01"],
        "ear_reservatorio_percentual" => [61.2f64, 48.0],
    )
    .unwrap();
    let mut buf = Vec::new();
    ParquetWriter::new(&mut buf).finish(&mut df).unwrap();
    buf
}

pub fn resource_name(year: i32) -> String {
    format!("{}-{}", PACKAGE_NAME, year)
}

/// Object key of a resource uploaded today
pub fn uploaded_key(year: i32) -> String {
    format!("ons/{}/dt=2024-06-01/{}.parquet", PACKAGE_NAME, resource_name(year))
}

/// Mount `package_show`, `resource_show` and the file for each year
pub async fn mount_catalog(server: &MockServer, years: &[i32], delay: Duration) {
    let resources: Vec<Value> = years
        .iter()
        .map(|year| json!({"id": format!("r{}", year), "name": resource_name(*year), "format": "PARQUET"}))
        .collect();

    Mock::given(method("GET"))
        .and(path("/api/3/action/package_show"))
        .and(query_param("id", PACKAGE_ID))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"success": true, "result": {"resources": resources}}))
                .set_delay(delay),
        )
        .mount(server)
        .await;

    for year in years {
        let id = format!("r{}", year);
        Mock::given(method("GET"))
            .and(path("/api/3/action/resource_show"))
            .and(query_param("id", id.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "result": {"id": id, "url": format!("{}/files/{}.parquet", server.uri(), resource_name(*year))}
            })))
            .mount(server)
            .await;

        Mock::given(method("GET"))
            .and(path(format!("/files/{}.parquet", resource_name(*year))))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(parquet_payload()))
            .mount(server)
            .await;
    }
}

// ============================================================================
// Assembled pipeline
// ============================================================================

pub struct TestPipeline {
    pub server: MockServer,
    pub staging: TempDir,
    pub warehouse: Arc<FakeWarehouse>,
    pub store: Arc<MemoryStore>,
    pub orchestrator: Arc<IngestionOrchestrator>,
}

impl TestPipeline {
    pub async fn start(years: &[i32]) -> Self {
        Self::start_with(years, Duration::ZERO, UploadPolicy::Abort).await
    }

    pub async fn start_with(years: &[i32], catalog_delay: Duration, policy: UploadPolicy) -> Self {
        let server = MockServer::start().await;
        mount_catalog(&server, years, catalog_delay).await;

        let staging = TempDir::new().unwrap();
        let warehouse = Arc::new(FakeWarehouse::default());
        let store = Arc::new(MemoryStore::default());
        let clock = Arc::new(FixedClock(today()));
        let retry = RetryPolicy::new(1, Duration::ZERO);

        let catalog = Arc::new(
            CatalogClient::new(CatalogConfig::with_base_url(format!(
                "{}/api/3/action",
                server.uri()
            )))
            .unwrap(),
        );
        let download = DownloadConfig {
            retry,
            timeout: Duration::from_secs(5),
            ..DownloadConfig::with_staging_dir(staging.path())
        };

        let orchestrator = IngestionOrchestrator::new(
            catalog,
            download,
            StagingSink::new(store.clone(), retry, policy, clock.clone()),
            FreshnessGate::new(
                warehouse.clone(),
                Ident::new("raw").unwrap(),
                Ident::new("dt").unwrap(),
                clock.clone(),
            ),
            MaterializationTrigger::new(
                warehouse.clone(),
                Ident::new("trusted").unwrap(),
                Ident::new("materialize_trusted").unwrap(),
            ),
            clock,
        );

        Self {
            server,
            staging,
            warehouse,
            store,
            orchestrator: Arc::new(orchestrator),
        }
    }

    pub fn package_staging(&self) -> std::path::PathBuf {
        self.orchestrator.staging_dir_for(PACKAGE_NAME)
    }

    pub fn app(&self) -> Router {
        app_with(self.warehouse.clone(), self.orchestrator.clone(), None)
    }
}

/// An orchestrator whose catalog is unreachable; for routes that never ingest
pub fn idle_orchestrator(warehouse: Arc<FakeWarehouse>) -> Arc<IngestionOrchestrator> {
    let clock = Arc::new(FixedClock(today()));
    let catalog =
        Arc::new(CatalogClient::new(CatalogConfig::with_base_url("http://127.0.0.1:9")).unwrap());

    Arc::new(IngestionOrchestrator::new(
        catalog,
        DownloadConfig::default(),
        StagingSink::new(
            Arc::new(MemoryStore::default()),
            RetryPolicy::once(),
            UploadPolicy::Abort,
            clock.clone(),
        ),
        FreshnessGate::new(
            warehouse.clone(),
            Ident::new("raw").unwrap(),
            Ident::new("dt").unwrap(),
            clock.clone(),
        ),
        MaterializationTrigger::new(
            warehouse,
            Ident::new("trusted").unwrap(),
            Ident::new("materialize_trusted").unwrap(),
        ),
        clock,
    ))
}

pub fn reader_for(warehouse: Arc<FakeWarehouse>, tiebreak: Option<&str>) -> PaginatedReader {
    PaginatedReader::new(
        warehouse,
        TableRef::new("trusted", "ear_diario").unwrap(),
        Ident::new("ear_data").unwrap(),
        tiebreak.map(|t| Ident::new(t).unwrap()),
    )
}

pub fn app_with(
    warehouse: Arc<FakeWarehouse>,
    orchestrator: Arc<IngestionOrchestrator>,
    reader: Option<PaginatedReader>,
) -> Router {
    let reader = reader.unwrap_or_else(|| reader_for(warehouse.clone(), Some("id_reservatorio")));
    features::router(FeatureState {
        orchestrator,
        reader: Arc::new(reader),
        warehouse,
    })
}

// ============================================================================
// HTTP helpers
// ============================================================================

pub fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
