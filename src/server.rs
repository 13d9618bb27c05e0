//! HTTP API over a shared [`DynReconciler`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/status` | Repository, index, and sync status |
//! | `GET`  | `/stats` | Index statistics |
//! | `POST` | `/search` | Search the index |
//! | `POST` | `/sync?full=bool` | Incremental (default) or full sync |
//! | `POST` | `/setup` | Clone or pull, then full sync |
//! | `POST` | `/rebuild` | Setup, clear, full sync |
//! | `GET`  | `/sync/stream?full=bool` | Sync as server-sent events |
//! | `GET`  | `/rebuild/stream` | Rebuild as server-sent events |
//! | `POST` | `/sync/cancel` | Cancel the running sync |
//! | `POST` | `/cleanup` | Remove orphaned index entries |
//! | `POST` | `/reindex/{*path}` | Re-index one document |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "busy", "message": "A sync operation is already in progress" } }
//! ```
//!
//! `bad_request` → 400, `not_found` → 404, `busy` and `cancelled` → 409,
//! anything else → 500.
//!
//! Sync runs execute on their own task, so a client that disconnects
//! mid-request never leaves the index half-rebuilt.
//!
//! Streams emit one SSE event per progress event, named after its `type`
//! (`status`, `progress`, `file_complete`, `warning`, `error`, `complete`),
//! with the event JSON as data.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};

use vaultsync_core::models::{IndexStats, ProgressEvent, SearchHit, SearchQuery};

use crate::config::Config;
use crate::error::SyncError;
use crate::reconcile::{
    DynReconciler, OutcomeError, ReindexOutcome, RepositoryStatus, SweepReport, SyncMode,
    SyncOutcome,
};

#[derive(Clone)]
struct AppState {
    reconciler: Arc<DynReconciler>,
}

/// Bind `[server].bind` and serve until the process is terminated.
pub async fn run_server(config: &Config, reconciler: Arc<DynReconciler>) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let app = router(reconciler);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

pub fn router(reconciler: Arc<DynReconciler>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/status", get(handle_status))
        .route("/stats", get(handle_stats))
        .route("/search", post(handle_search))
        .route("/sync", post(handle_sync))
        .route("/sync/stream", get(handle_sync_stream))
        .route("/sync/cancel", post(handle_cancel))
        .route("/setup", post(handle_setup))
        .route("/rebuild", post(handle_rebuild))
        .route("/rebuild/stream", get(handle_rebuild_stream))
        .route("/cleanup", post(handle_cleanup))
        .route("/reindex/{*path}", post(handle_reindex))
        .layer(cors)
        .with_state(AppState { reconciler })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl AppError {
    fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            status: status_for(code),
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<SyncError> for AppError {
    fn from(err: SyncError) -> Self {
        AppError::new(err.code(), err.to_string())
    }
}

impl From<OutcomeError> for AppError {
    fn from(err: OutcomeError) -> Self {
        AppError::new(err.code, err.message)
    }
}

fn status_for(code: &str) -> StatusCode {
    match code {
        "bad_request" => StatusCode::BAD_REQUEST,
        "not_found" => StatusCode::NOT_FOUND,
        "busy" | "cancelled" => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new("bad_request", message)
}

/// A failed outcome becomes an error response; a successful one is returned as-is.
fn outcome_response(outcome: SyncOutcome) -> Result<Json<SyncOutcome>, AppError> {
    if let (false, Some(err)) = (outcome.success, outcome.error.clone()) {
        return Err(err.into());
    }
    Ok(Json(outcome))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /status, GET /stats ============

async fn handle_status(State(state): State<AppState>) -> Result<Json<RepositoryStatus>, AppError> {
    Ok(Json(state.reconciler.status().await?))
}

async fn handle_stats(State(state): State<AppState>) -> Result<Json<IndexStats>, AppError> {
    Ok(Json(state.reconciler.stats().await?))
}

// ============ POST /search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    path_filter: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

fn default_limit() -> i64 {
    10
}

#[derive(Serialize)]
struct SearchResponse {
    count: usize,
    results: Vec<SearchHit>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    if req.limit < 1 {
        return Err(bad_request("limit must be at least 1"));
    }

    let mut query = SearchQuery::new(req.query, req.limit as usize).with_tags(req.tags);
    query.path_filter = req.path_filter;

    let results = state.reconciler.search(&query).await?;
    Ok(Json(SearchResponse {
        count: results.len(),
        results,
    }))
}

// ============ Sync runs ============

#[derive(Deserialize, Default)]
struct SyncParams {
    #[serde(default)]
    full: bool,
}

impl SyncParams {
    fn mode(&self) -> SyncMode {
        if self.full {
            SyncMode::Full
        } else {
            SyncMode::Incremental
        }
    }
}

async fn handle_sync(
    State(state): State<AppState>,
    Query(params): Query<SyncParams>,
) -> Result<Json<SyncOutcome>, AppError> {
    outcome_response(state.reconciler.run_detached(params.mode()).await)
}

async fn handle_setup(State(state): State<AppState>) -> Result<Json<SyncOutcome>, AppError> {
    outcome_response(state.reconciler.run_detached(SyncMode::InitialSetup).await)
}

async fn handle_rebuild(State(state): State<AppState>) -> Result<Json<SyncOutcome>, AppError> {
    outcome_response(state.reconciler.run_detached(SyncMode::Rebuild).await)
}

async fn handle_sync_stream(
    State(state): State<AppState>,
    Query(params): Query<SyncParams>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, AppError> {
    let rx = state.reconciler.stream(params.mode())?;
    Ok(progress_sse(rx))
}

async fn handle_rebuild_stream(
    State(state): State<AppState>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, AppError> {
    let rx = state.reconciler.stream(SyncMode::Rebuild)?;
    Ok(progress_sse(rx))
}

fn progress_sse(
    rx: mpsc::Receiver<ProgressEvent>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let events = stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        let sse = Event::default().event(event.kind()).json_data(&event);
        Some((sse, rx))
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}

#[derive(Serialize)]
struct CancelResponse {
    cancelled: bool,
}

async fn handle_cancel(State(state): State<AppState>) -> Json<CancelResponse> {
    Json(CancelResponse {
        cancelled: state.reconciler.cancel(),
    })
}

// ============ Maintenance ============

async fn handle_cleanup(State(state): State<AppState>) -> Result<Json<SweepReport>, AppError> {
    Ok(Json(state.reconciler.sweep_orphans().await?))
}

async fn handle_reindex(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Json<ReindexOutcome>, AppError> {
    let outcome = state.reconciler.force_reindex(&path).await;
    if let (false, Some(err)) = (outcome.success, outcome.error.clone()) {
        return Err(err.into());
    }
    Ok(Json(outcome))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_map_to_statuses() {
        assert_eq!(status_for("busy"), StatusCode::CONFLICT);
        assert_eq!(status_for("not_found"), StatusCode::NOT_FOUND);
        assert_eq!(status_for("bad_request"), StatusCode::BAD_REQUEST);
        assert_eq!(status_for("pull_failed"), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn sync_params_pick_mode() {
        assert_eq!(SyncParams::default().mode(), SyncMode::Incremental);
        assert_eq!(SyncParams { full: true }.mode(), SyncMode::Full);
    }
}
