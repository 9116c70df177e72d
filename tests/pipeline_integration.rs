//! End-to-end tests of the pipeline against a file-backed warehouse
//!
//! Covers: idempotent ingestion, conflict detection, stability gating,
//! watermark monotonicity, incremental completeness, crash-safe
//! re-selection, snapshot determinism and no-op exports.

use chrono::NaiveDate;
use dropledger::config::PipelineConfig;
use dropledger::engine::Pipeline;
use dropledger::error::Error;
use dropledger::types::{parse_timestamp, RowKey};
use dropledger::warehouse::{TableName, Warehouse};
use pretty_assertions::assert_eq;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ============================================================================
// Helpers
// ============================================================================

struct Workspace {
    dir: TempDir,
    sink_url: String,
    stability_secs: f64,
}

impl Workspace {
    fn new(sink_url: &str) -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("drop/bank")).unwrap();
        Self {
            dir,
            sink_url: sink_url.to_string(),
            stability_secs: 0.0,
        }
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    fn drop_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.path("drop").join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn config(&self) -> PipelineConfig {
        let yaml = format!(
            r#"
warehouse:
  path: {warehouse}
drop_zone:
  root: {drop}
  stability_secs: {stability}
sources:
  - prefix: bank
http:
  max_retries: 0
  requests_per_second: 100
datasets:
  - name: bank
    table: raw.bank
    snapshot:
      destination: {out}
      format: parquet
    incremental:
      max_rows_per_append: 2
      sink:
        type: http
        url: {sink}
"#,
            warehouse = self.path("warehouse/analytics.duckdb").display(),
            drop = self.path("drop").display(),
            stability = self.stability_secs,
            out = self.path("out").display(),
            sink = self.sink_url,
        );
        let config = PipelineConfig::from_yaml_str(&yaml).unwrap();
        config.validate().unwrap();
        config
    }

    /// Open a fresh pipeline, as a new process would
    fn open(&self) -> Pipeline {
        Pipeline::from_config(self.config()).unwrap()
    }
}

fn staged_rows(pipeline: &Pipeline) -> u64 {
    pipeline
        .warehouse()
        .row_count(&TableName::parse("raw.bank").unwrap())
        .unwrap()
}

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
}

/// Ids in every request body the sink received, in arrival order
async fn delivered_ids(server: &MockServer) -> Vec<String> {
    let id_index = |body: &Value| {
        body["columns"]
            .as_array()
            .unwrap()
            .iter()
            .position(|c| c == "id")
            .unwrap()
    };
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .flat_map(|request| {
            let body: Value = serde_json::from_slice(&request.body).unwrap();
            let idx = id_index(&body);
            body["rows"]
                .as_array()
                .unwrap()
                .iter()
                .map(|row| row[idx].as_str().unwrap().to_string())
                .collect::<Vec<_>>()
        })
        .collect()
}

async fn accepting_sink() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/append"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    server
}

const DAY_ONE: &str = "id,event_ts,amount\n\
    1,2024-03-01 09:00:00,5.0\n\
    2,2024-03-01 09:00:00,6.0\n\
    3,2024-03-01 10:00:00,7.0\n";

const DAY_TWO: &str = "id,event_ts,amount\n\
    4,2024-03-02 09:00:00,1.0\n\
    5,2024-03-02 11:00:00,2.0\n";

// ============================================================================
// Ingestion
// ============================================================================

#[tokio::test]
async fn test_reingesting_same_file_is_noop_across_restarts() {
    let ws = Workspace::new("http://127.0.0.1:9/append");
    ws.drop_file("bank/day1.csv", DAY_ONE);

    {
        let pipeline = ws.open();
        let report = pipeline.ingest().await.unwrap();
        assert_eq!(report.ingested.len(), 1);
        assert_eq!(staged_rows(&pipeline), 3);
    }

    let pipeline = ws.open();
    let report = pipeline.ingest().await.unwrap();
    assert!(report.ingested.is_empty());
    assert_eq!(report.already_ingested, vec!["bank/day1.csv"]);
    assert_eq!(staged_rows(&pipeline), 3);
    assert_eq!(pipeline.ledger().list().unwrap().len(), 1);
}

#[tokio::test]
async fn test_changed_redrop_is_flagged_and_not_merged() {
    let ws = Workspace::new("http://127.0.0.1:9/append");
    ws.drop_file("bank/day1.csv", DAY_ONE);
    let pipeline = ws.open();
    pipeline.ingest().await.unwrap();
    let original = pipeline.ledger().lookup("bank/day1.csv").unwrap().unwrap();

    ws.drop_file("bank/day1.csv", "id,event_ts,amount\n9,2024-03-01 12:00:00,1.0\n");
    let report = pipeline.ingest().await.unwrap();

    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].kind, "conflicting_re_drop");
    assert_eq!(staged_rows(&pipeline), 3);
    assert_eq!(
        pipeline.ledger().lookup("bank/day1.csv").unwrap().unwrap(),
        original
    );

    // Operator reconciles by forgetting the entry
    assert!(pipeline.ledger().forget("bank/day1.csv").unwrap());
    let report = pipeline.ingest().await.unwrap();
    assert_eq!(report.ingested.len(), 1);
    assert_eq!(staged_rows(&pipeline), 4);
}

#[tokio::test]
async fn test_file_still_being_written_is_deferred() {
    let mut ws = Workspace::new("http://127.0.0.1:9/append");
    ws.stability_secs = 1.0;
    let file = ws.drop_file("bank/growing.csv", "id,event_ts,amount\n");
    let pipeline = ws.open();

    let writer = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(200));
        let mut content = std::fs::read_to_string(&file).unwrap();
        content.push_str("1,2024-03-01 09:00:00,5.0\n");
        std::fs::write(&file, content).unwrap();
    });

    let report = pipeline.ingest().await.unwrap();
    writer.join().unwrap();
    assert_eq!(report.not_stable, vec!["bank/growing.csv"]);
    assert!(pipeline.ledger().list().unwrap().is_empty());

    let report = pipeline.ingest().await.unwrap();
    assert_eq!(report.ingested.len(), 1);
    assert_eq!(staged_rows(&pipeline), 1);
}

// ============================================================================
// Watermarks
// ============================================================================

#[test]
fn test_watermark_never_moves_backwards() {
    let dir = TempDir::new().unwrap();
    let warehouse = Arc::new(Warehouse::open(dir.path().join("w.duckdb")).unwrap());
    let store = dropledger::state::WatermarkStore::new(warehouse);

    let later = RowKey::new(parse_timestamp("2024-03-02 00:00:00").unwrap(), "5");
    let earlier = RowKey::new(parse_timestamp("2024-03-01 00:00:00").unwrap(), "9");

    store.advance("bank", &later).unwrap();
    let err = store.advance("bank", &earlier).unwrap_err();
    assert!(matches!(err, Error::NonMonotonic { .. }));
    assert!(err.is_fatal());
    assert_eq!(store.read("bank").unwrap().key(), later);
}

// ============================================================================
// Incremental Export
// ============================================================================

#[tokio::test]
async fn test_every_row_delivered_once_across_runs() {
    let server = accepting_sink().await;
    let ws = Workspace::new(&format!("{}/append", server.uri()));

    ws.drop_file("bank/day1.csv", DAY_ONE);
    let pipeline = ws.open();
    let first = pipeline.run(date()).await.unwrap();
    assert!(first.is_success(), "{first:?}");
    assert_eq!(first.incremental[0].rows_delivered, 3);
    assert_eq!(first.incremental[0].appends, 2);

    ws.drop_file("bank/day2.csv", DAY_TWO);
    let second = pipeline.run(date()).await.unwrap();
    assert_eq!(second.incremental[0].rows_delivered, 2);

    assert_eq!(delivered_ids(&server).await, vec!["1", "2", "3", "4", "5"]);
    assert_eq!(
        pipeline.watermarks().read("bank").unwrap().key(),
        RowKey::new(parse_timestamp("2024-03-02 11:00:00").unwrap(), "5")
    );
}

#[tokio::test]
async fn test_failed_delivery_is_reselected_after_restart() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/append"))
        .respond_with(ResponseTemplate::new(400).set_body_string("sheet locked"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/append"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let ws = Workspace::new(&format!("{}/append", server.uri()));
    ws.drop_file("bank/day1.csv", DAY_ONE);

    {
        let pipeline = ws.open();
        pipeline.ingest().await.unwrap();
        let err = pipeline.export_incremental("bank").await.unwrap_err();
        assert!(matches!(err, Error::SinkDelivery { .. }));
        assert!(pipeline.watermarks().read("bank").unwrap().is_sentinel());
    }

    let pipeline = ws.open();
    let report = pipeline.export_incremental("bank").await.unwrap();
    assert_eq!(report.rows_delivered, 3);

    // The rejected first chunk is re-sent in full
    assert_eq!(delivered_ids(&server).await, vec!["1", "2", "1", "2", "3"]);
}

#[tokio::test]
async fn test_export_without_new_rows_does_nothing() {
    let server = accepting_sink().await;
    let ws = Workspace::new(&format!("{}/append", server.uri()));
    ws.drop_file("bank/day1.csv", DAY_ONE);
    let pipeline = ws.open();
    pipeline.ingest().await.unwrap();
    pipeline.export_incremental("bank").await.unwrap();

    let requests_before = server.received_requests().await.unwrap().len();
    let watermark_before = pipeline.watermarks().read("bank").unwrap();

    let report = pipeline.export_incremental("bank").await.unwrap();

    assert!(report.is_noop());
    assert_eq!(server.received_requests().await.unwrap().len(), requests_before);
    assert_eq!(pipeline.watermarks().read("bank").unwrap(), watermark_before);
}

// ============================================================================
// Snapshots
// ============================================================================

#[tokio::test]
async fn test_snapshot_is_deterministic_across_ingest_order() {
    let first = Workspace::new("http://127.0.0.1:9/append");
    first.drop_file("bank/a.csv", DAY_ONE);
    first.drop_file("bank/b.csv", DAY_TWO);

    let second = Workspace::new("http://127.0.0.1:9/append");
    second.drop_file("bank/a.csv", DAY_TWO);
    second.drop_file("bank/b.csv", DAY_ONE);

    let mut manifests = Vec::new();
    for ws in [&first, &second] {
        let pipeline = ws.open();
        pipeline.ingest().await.unwrap();
        // Staged metadata columns differ between the two; snapshot only data columns
        pipeline
            .warehouse()
            .execute_batch(
                "CREATE SCHEMA IF NOT EXISTS curated;
                 CREATE OR REPLACE TABLE curated.bank AS
                 SELECT id, CAST(event_ts AS TIMESTAMP) AS event_ts, CAST(amount AS DOUBLE) AS amount
                 FROM raw.bank;",
            )
            .unwrap();
        let mut config = ws.config();
        config.datasets[0].table = "curated.bank".to_string();
        drop(pipeline);

        let pipeline = Pipeline::from_config(config).unwrap();
        manifests.push(pipeline.export_snapshot("bank", date()).await.unwrap());
    }

    assert_eq!(manifests[0].row_count, 5);
    assert_eq!(manifests[0].content_hash, manifests[1].content_hash);

    let data = std::fs::read(first.path("out/bank/dt=2024-03-01/data.parquet")).unwrap();
    let alias = std::fs::read(first.path("out/bank/latest.parquet")).unwrap();
    assert_eq!(data, alias);
}
