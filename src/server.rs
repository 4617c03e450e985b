use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Query, State as AxumState},
    http::{header, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};

use crate::error::AppError;
use crate::metrics::DashboardMode;
use crate::telemetry::{ActionInput, BackupEntry, RetryStatsSnapshot};
use crate::AppState;

/// Entries returned by `/health`.
pub const RECENT_ACTIONS_LIMIT: usize = 5;
/// Entries returned by `/backup-log`.
pub const BACKUP_LOG_LIMIT: usize = 50;

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/actions", post(record_action))
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .route("/backup-log", get(backup_log))
        .layer(cors)
        .with_state(state)
}

/// Serve until the shutdown signal flips.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), AppError> {
    let addr = listener.local_addr()?;
    tracing::info!("Telemetry server listening on http://{}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
            tracing::info!("Telemetry server shutting down");
        })
        .await?;

    Ok(())
}

// =============================================================================
// Handlers
// =============================================================================

/// POST /actions: validate and ingest one action record.
///
/// The body is parsed by hand so malformed JSON gets the same structured
/// 422 as a missing field.
async fn record_action(
    AxumState(state): AxumState<Arc<AppState>>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let input: ActionInput = serde_json::from_slice(&body)
        .map_err(|e| AppError::Validation(format!("Invalid action body: {e}")))?;
    let outcome = state.recorder.record(input).await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
struct MetricsParams {
    mode: Option<String>,
}

/// GET /metrics?mode=test|live
async fn metrics(
    AxumState(state): AxumState<Arc<AppState>>,
    Query(params): Query<MetricsParams>,
) -> impl IntoResponse {
    let mode = match params.mode.as_deref() {
        None | Some("") => DashboardMode::default(),
        Some(raw) => match raw.parse::<DashboardMode>() {
            Ok(mode) => mode,
            Err(e) => return (StatusCode::BAD_REQUEST, Json(e)).into_response(),
        },
    };
    Json(state.gate.select(mode).await).into_response()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    backup_queue_length: usize,
    dead_letter_length: usize,
    evicted_total: u64,
    store_configured: bool,
    retry: RetryStatsSnapshot,
    recent_actions: Vec<BackupEntry>,
}

/// GET /health
async fn health(AxumState(state): AxumState<Arc<AppState>>) -> impl IntoResponse {
    let backup_queue_length = state.backup.len();
    let status = if state.store_configured && backup_queue_length == 0 {
        "ok"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status,
        service: "dashboard-telemetry",
        backup_queue_length,
        dead_letter_length: state.backup.dead_letter_len(),
        evicted_total: state.backup.evicted_total(),
        store_configured: state.store_configured,
        retry: state.retry_stats.snapshot(),
        recent_actions: state.backup.snapshot(RECENT_ACTIONS_LIMIT),
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BackupLogResponse {
    total_entries: usize,
    entries: Vec<BackupEntry>,
}

/// GET /backup-log
async fn backup_log(AxumState(state): AxumState<Arc<AppState>>) -> impl IntoResponse {
    Json(BackupLogResponse {
        total_entries: state.backup.len(),
        entries: state.backup.snapshot(BACKUP_LOG_LIMIT),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{ExecutionAggregator, ModeGate};
    use crate::store::testing::{spawn_http, FakeStore};
    use crate::store::RecordStore;
    use crate::telemetry::{ActionRecorder, BackupQueue, RetryStats};
    use serde_json::{json, Value};

    fn state_with(store: Arc<FakeStore>) -> Arc<AppState> {
        let backup = Arc::new(BackupQueue::new());
        let timeout = Duration::from_secs(15);
        let dyn_store: Arc<dyn RecordStore> = store;
        Arc::new(AppState {
            store_configured: dyn_store.is_configured(),
            recorder: Arc::new(ActionRecorder::new(
                dyn_store.clone(),
                backup.clone(),
                "Metrics",
                timeout,
            )),
            gate: Arc::new(ModeGate::new(
                ExecutionAggregator::new(dyn_store, "Test Results", timeout),
                backup.clone(),
            )),
            backup,
            retry_stats: Arc::new(RetryStats::default()),
        })
    }

    async fn spawn(store: Arc<FakeStore>) -> (String, Arc<AppState>) {
        let state = state_with(store);
        (spawn_http(router(state.clone())).await, state)
    }

    #[tokio::test]
    async fn test_post_action_persists() {
        let store = Arc::new(FakeStore::healthy());
        let (base, _) = spawn(store.clone()).await;

        let resp = reqwest::Client::new()
            .post(format!("{base}/actions"))
            .json(&json!({ "action": "Lead Export", "actor": "System", "exportType": "csv", "campaign": "spring" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body, json!({ "persisted": true, "queued": false }));

        let rows = store.rows("Metrics");
        assert_eq!(rows[0]["exportType"], "csv");
        assert_eq!(rows[0]["campaign"], "spring");
    }

    #[tokio::test]
    async fn test_post_action_accepts_numeric_session_id() {
        let store = Arc::new(FakeStore::healthy());
        let (base, _) = spawn(store.clone()).await;

        let resp = reqwest::Client::new()
            .post(format!("{base}/actions"))
            .json(&json!({ "action": "Call Started", "actor": "Voice", "sessionId": 42, "status": true }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body, json!({ "persisted": true, "queued": false }));

        let rows = store.rows("Metrics");
        assert_eq!(rows[0]["sessionId"], "42");
        assert_eq!(rows[0]["status"], "true");
    }

    #[tokio::test]
    async fn test_post_action_queues_without_token() {
        let (base, state) = spawn(Arc::new(FakeStore::unconfigured())).await;
        let client = reqwest::Client::new();

        let body: Value = client
            .post(format!("{base}/actions"))
            .json(&json!({ "action": "X", "actor": "Y" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body, json!({ "persisted": false, "queued": true }));
        assert_eq!(state.backup.len(), 1);

        let health: Value = client
            .get(format!("{base}/health"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "degraded");
        assert_eq!(health["backupQueueLength"], 1);
        assert_eq!(health["storeConfigured"], false);
        assert_eq!(health["recentActions"][0]["action"], "X");
        assert_eq!(health["retry"]["ticks"], 0);
    }

    #[tokio::test]
    async fn test_post_action_validation_is_422() {
        let (base, state) = spawn(Arc::new(FakeStore::healthy())).await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{base}/actions"))
            .json(&json!({ "action": "X" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 422);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["kind"], "validation");

        let resp = client
            .post(format!("{base}/actions"))
            .header("content-type", "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 422);
        assert!(state.backup.is_empty());
    }

    #[tokio::test]
    async fn test_metrics_modes() {
        let (base, _) = spawn(Arc::new(FakeStore::failing_reads())).await;
        let client = reqwest::Client::new();

        let test: Value = client
            .get(format!("{base}/metrics?mode=test"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(test["mode"], "test");
        assert_eq!(test["totalFunctions"], 40);

        let live: Value = client
            .get(format!("{base}/metrics"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(live["mode"], "live");
        assert_eq!(live["totalFunctions"], 0);
        assert_eq!(live["successRate"], "0%");
        assert_eq!(live["healthChecks"]["store"], "error");

        let resp = client
            .get(format!("{base}/metrics?mode=staging"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn test_backup_log_caps_entries() {
        let (base, state) = spawn(Arc::new(FakeStore::failing_writes())).await;
        for i in 0..60 {
            state
                .recorder
                .record(ActionInput::new(format!("A{i}"), "System"))
                .await
                .unwrap();
        }

        let body: Value = reqwest::get(format!("{base}/backup-log"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["totalEntries"], 60);
        let entries = body["entries"].as_array().unwrap();
        assert_eq!(entries.len(), BACKUP_LOG_LIMIT);
        assert_eq!(entries[0]["action"], "A10");
        assert_eq!(entries[49]["action"], "A59");
    }

    #[tokio::test]
    async fn test_health_ok_when_configured_and_empty() {
        let (base, _) = spawn(Arc::new(FakeStore::healthy())).await;
        let health: Value = reqwest::get(format!("{base}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "ok");
        assert_eq!(health["deadLetterLength"], 0);
        assert_eq!(health["recentActions"], json!([]));
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown_signal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(serve(listener, state_with(Arc::new(FakeStore::healthy())), rx));

        tx.send(true).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
