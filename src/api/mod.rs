//! HTTP API adapter (spec §6), mirroring `proxy/server.rs`'s
//! `Router::new().route(...).with_state(state)` shape. Since the `.ods`
//! config format and the Swagger/OpenAPI document are explicitly out of
//! scope (spec §1, §6), `/api/config` is implemented against the
//! `ConfigSource` trait rather than an actual spreadsheet codec, and
//! `/spec`/`/api/docs` return a static placeholder.

use crate::config::{ConfigSource, RtdsConfig};
use crate::scan::Command;
use crate::store::{get_current, get_history, get_state, CurrentRow, DbPool, HistoryRow, StateRow};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::DateTime;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Shared state the adapter needs: the domain config backing store, the
/// scan loop's command channel, and the read-side DB pool.
#[derive(Clone)]
pub struct ApiState {
    pub config_source: Arc<dyn ConfigSource>,
    pub command_tx: mpsc::Sender<Command>,
    pub pool: DbPool,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/config", get(get_config).post(post_config))
        .route("/api/reload", post(post_reload))
        .route("/api/status", get(get_status))
        .route("/api/state", get(get_state_handler))
        .route("/api/current", get(get_current_handler))
        .route("/api/history/:start_time/:size", get(get_history_handler))
        .route("/spec", get(spec_doc))
        .route("/api/docs", get(spec_doc))
        .with_state(state)
}

/// Error responses (spec §6: JSON `{"error": msg}` with status 400/404).
/// Shape follows the teacher's `proxy/api.rs` `ApiError` enum.
#[derive(Debug)]
pub enum ApiError {
    Internal(String),
    BadRequest(String),
    NotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        };
        tracing::error!(%status, %message, "api error");
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

/// GET /api/config — export current domain config. The ODS codec itself is
/// out of scope; `ConfigSource` stands in (spec §6, §9).
async fn get_config(State(state): State<ApiState>) -> Result<Json<RtdsConfig>, ApiError> {
    state
        .config_source
        .load()
        .map(Json)
        .map_err(|e| ApiError::Internal(e.to_string()))
}

/// POST /api/config — replace the domain config. A real ODS upload would be
/// validated by file extension and multipart-decoded; here the adapter
/// accepts the equivalent structured JSON body directly against the same
/// `ConfigSource::save`.
async fn post_config(State(state): State<ApiState>, Json(config): Json<RtdsConfig>) -> Result<StatusCode, ApiError> {
    state
        .config_source
        .save(&config)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(StatusCode::OK)
}

/// POST /api/reload — enqueue RELOAD for the scan loop (spec §4.5, §6).
async fn post_reload(State(state): State<ApiState>) -> Result<StatusCode, ApiError> {
    state
        .command_tx
        .send(Command::Reload)
        .await
        .map_err(|_| ApiError::Internal("scan loop command channel is closed".to_string()))?;
    Ok(StatusCode::OK)
}

async fn get_status() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "OK" }))
}

async fn get_state_handler(State(state): State<ApiState>) -> Result<Json<Vec<StateRow>>, ApiError> {
    get_state(&state.pool).map(Json).map_err(|e| ApiError::Internal(e.to_string()))
}

async fn get_current_handler(State(state): State<ApiState>) -> Result<Json<Vec<CurrentRow>>, ApiError> {
    get_current(&state.pool).map(Json).map_err(|e| ApiError::Internal(e.to_string()))
}

/// GET /api/history/<start_time>/<size>. Per the Open Question resolution
/// recorded in DESIGN.md, a malformed `start_time` is a strict 400 rather
/// than the source's silent "now - 24h" fallback.
async fn get_history_handler(
    State(state): State<ApiState>,
    Path((start_time, size)): Path<(String, usize)>,
) -> Result<Json<Vec<HistoryRow>>, ApiError> {
    DateTime::parse_from_rfc3339(&start_time)
        .map_err(|_| ApiError::BadRequest(format!("start_time is not RFC3339: {start_time}")))?;
    get_history(&state.pool, &start_time, size)
        .map(Json)
        .map_err(|e| ApiError::Internal(e.to_string()))
}

/// GET /spec, /api/docs — a static placeholder. The generated OpenAPI
/// document is out of scope (spec §6).
async fn spec_doc() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain")],
        "RTDS API\n\nstatus, state, current, history, config, reload.\nSee the module docs for request/response shapes; no generated OpenAPI document is served by this build.\n",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RtdsConfig;
    use crate::store::build_pool;
    use std::sync::Mutex;

    struct MemConfigSource(Mutex<RtdsConfig>);

    impl ConfigSource for MemConfigSource {
        fn load(&self) -> anyhow::Result<RtdsConfig> {
            Ok(self.0.lock().unwrap().clone())
        }
        fn save(&self, config: &RtdsConfig) -> anyhow::Result<()> {
            *self.0.lock().unwrap() = config.clone();
            Ok(())
        }
    }

    fn test_state() -> (tempfile::TempDir, ApiState, mpsc::Receiver<Command>) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("rtds.db");
        {
            let conn = rusqlite::Connection::open(&db_path).unwrap();
            crate::store::schema::init(&conn).unwrap();
        }
        let pool = build_pool(db_path.to_str().unwrap()).unwrap();
        let (command_tx, command_rx) = mpsc::channel(4);
        let state = ApiState {
            config_source: Arc::new(MemConfigSource(Mutex::new(RtdsConfig::default()))),
            command_tx,
            pool,
        };
        (dir, state, command_rx)
    }

    #[tokio::test]
    async fn reload_enqueues_command() {
        let (_dir, state, mut command_rx) = test_state();
        post_reload(State(state)).await.unwrap();
        assert!(matches!(command_rx.recv().await, Some(Command::Reload)));
    }

    #[tokio::test]
    async fn get_config_round_trips_default() {
        let (_dir, state, _rx) = test_state();
        let Json(config) = get_config(State(state)).await.unwrap();
        assert!(config.tags.is_empty());
    }

    #[tokio::test]
    async fn history_rejects_malformed_start_time() {
        let (_dir, state, _rx) = test_state();
        let err = get_history_handler(State(state), Path(("not-a-time".to_string(), 10)))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn status_reports_ok() {
        let Json(body) = get_status().await;
        assert_eq!(body["status"], "OK");
    }
}
