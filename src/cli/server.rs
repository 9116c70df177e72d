//! HTTP trigger server
//!
//! Lets a scheduler or an operator trigger runs and exports over HTTP.
//! Mutating requests are serialized: only one run or export touches the
//! warehouse at a time.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;

use crate::engine::Pipeline;
use crate::error::{Error, Result};

/// App state shared across handlers
struct AppState {
    pipeline: Arc<Pipeline>,
    run_lock: Mutex<()>,
}

/// Optional body for run and snapshot triggers
#[derive(Debug, Default, Deserialize)]
struct PartitionRequest {
    /// Snapshot partition date; defaults to today (UTC)
    #[serde(default)]
    partition: Option<NaiveDate>,
}

impl PartitionRequest {
    fn partition(&self) -> NaiveDate {
        self.partition.unwrap_or_else(|| Utc::now().date_naive())
    }
}

/// Response wrapper
#[derive(Debug, Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<&'static str>,
}

impl<T: Serialize> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            kind: None,
        }
    }

    fn error(err: &Error) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(err.to_string()),
            kind: Some(err.kind()),
        }
    }
}

fn ok<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
}

fn error_response(err: &Error) -> Response {
    let status = match err {
        Error::UnknownDataset { .. } => StatusCode::NOT_FOUND,
        Error::Config { .. } | Error::InvalidConfigValue { .. } => StatusCode::BAD_REQUEST,
        Error::QualityGateRejected { .. } => StatusCode::CONFLICT,
        Error::SinkDelivery { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ApiResponse::<()>::error(err))).into_response()
}

fn respond<T: Serialize>(result: Result<T>) -> Response {
    match result {
        Ok(data) => ok(data),
        Err(e) => error_response(&e),
    }
}

/// Build the router over a pipeline
pub fn router(pipeline: Arc<Pipeline>) -> Router {
    let state = AppState {
        pipeline,
        run_lock: Mutex::new(()),
    };

    Router::new()
        .route("/health", get(health))
        .route("/runs", post(trigger_run))
        .route("/ingest", post(trigger_ingest))
        .route("/datasets/:name/snapshot", post(trigger_snapshot))
        .route("/datasets/:name/incremental", post(trigger_incremental))
        .route("/watermarks", get(list_watermarks))
        .route("/ledger", get(list_ledger))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Start the HTTP server
pub async fn serve(pipeline: Arc<Pipeline>, port: u16) -> Result<()> {
    let app = router(pipeline);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Starting HTTP server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::config(format!("Failed to bind to port {port}: {e}")))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| Error::Other(format!("Server error: {e}")))?;

    Ok(())
}

/// Health check endpoint
async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "version": crate::VERSION }))
}

/// Run the whole pipeline once
async fn trigger_run(
    State(state): State<Arc<AppState>>,
    body: Option<Json<PartitionRequest>>,
) -> Response {
    let request = body.map(|Json(req)| req).unwrap_or_default();
    let _guard = state.run_lock.lock().await;

    match state.pipeline.run(request.partition()).await {
        Ok(report) => {
            let status = if report.is_rejected() {
                StatusCode::CONFLICT
            } else {
                StatusCode::OK
            };
            let body = ApiResponse {
                success: report.is_success(),
                data: Some(report),
                error: None,
                kind: None,
            };
            (status, Json(body)).into_response()
        }
        Err(e) => error_response(&e),
    }
}

/// Scan the drop zone once
async fn trigger_ingest(State(state): State<Arc<AppState>>) -> Response {
    let _guard = state.run_lock.lock().await;
    respond(state.pipeline.ingest().await)
}

/// Write a snapshot of one dataset
async fn trigger_snapshot(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    body: Option<Json<PartitionRequest>>,
) -> Response {
    let request = body.map(|Json(req)| req).unwrap_or_default();
    let _guard = state.run_lock.lock().await;
    respond(
        state
            .pipeline
            .export_snapshot(&name, request.partition())
            .await,
    )
}

/// Deliver one dataset's new rows
async fn trigger_incremental(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Response {
    let _guard = state.run_lock.lock().await;
    respond(state.pipeline.export_incremental(&name).await)
}

/// Current watermarks
async fn list_watermarks(State(state): State<Arc<AppState>>) -> Response {
    let pipeline = Arc::clone(&state.pipeline);
    let result = tokio::task::spawn_blocking(move || pipeline.watermarks().list())
        .await
        .map_err(Error::task)
        .and_then(|r| r);
    respond(result)
}

/// Ingested files
async fn list_ledger(State(state): State<Arc<AppState>>) -> Response {
    let pipeline = Arc::clone(&state.pipeline);
    let result = tokio::task::spawn_blocking(move || pipeline.ledger().list())
        .await
        .map_err(Error::task)
        .and_then(|r| r);
    respond(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use axum::body::Body;
    use axum::http::Request;
    use pretty_assertions::assert_eq;
    use serde_json::Value;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct Fixture {
        dir: TempDir,
        app: Router,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let drop = dir.path().join("drop");
        std::fs::create_dir_all(drop.join("bank")).unwrap();
        std::fs::write(
            drop.join("bank/a.csv"),
            "id,event_ts,amount\n1,2024-03-01 09:00:00,5.0\n",
        )
        .unwrap();

        let yaml = format!(
            r#"
warehouse:
  path: ":memory:"
drop_zone:
  root: {drop}
  stability_secs: 0
sources:
  - prefix: bank
datasets:
  - name: bank
    table: raw.bank
    snapshot:
      destination: {out}
    incremental:
      sink:
        type: csv_file
        path: {sink}
"#,
            drop = drop.display(),
            out = dir.path().join("out").display(),
            sink = dir.path().join("sink.csv").display(),
        );
        let config = PipelineConfig::from_yaml_str(&yaml).unwrap();
        let pipeline = Pipeline::from_config(config).unwrap();
        Fixture {
            app: router(Arc::new(pipeline)),
            dir,
        }
    }

    async fn call(app: &Router, method: &str, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let fx = fixture();
        let (status, body) = call(&fx.app, "GET", "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_run_then_inspect() {
        let fx = fixture();

        let (status, body) = call(&fx.app, "POST", "/runs").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["incremental"][0]["rows_delivered"], 1);

        let (_, ledger) = call(&fx.app, "GET", "/ledger").await;
        assert_eq!(ledger["data"][0]["filename"], "bank/a.csv");

        let (_, watermarks) = call(&fx.app, "GET", "/watermarks").await;
        assert_eq!(watermarks["data"][0]["dataset"], "bank");
        assert_eq!(watermarks["data"][0]["last_id"], "1");

        assert!(fx.dir.path().join("sink.csv").exists());
    }

    #[tokio::test]
    async fn test_ingest_then_export_dataset() {
        let fx = fixture();

        let (status, body) = call(&fx.app, "POST", "/ingest").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["ingested"][0]["filename"], "bank/a.csv");

        let (status, body) = call(&fx.app, "POST", "/datasets/bank/snapshot").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["row_count"], 1);

        let (status, body) = call(&fx.app, "POST", "/datasets/bank/incremental").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["rows_delivered"], 1);

        let (_, body) = call(&fx.app, "POST", "/datasets/bank/incremental").await;
        assert_eq!(body["data"]["rows_delivered"], 0);
    }

    #[tokio::test]
    async fn test_unknown_dataset_is_not_found() {
        let fx = fixture();
        let (status, body) = call(&fx.app, "POST", "/datasets/nope/incremental").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
        assert_eq!(body["kind"], "unknown_dataset");
    }
}
