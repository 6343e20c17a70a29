//! HTTP service over the answer pipeline and the ingest operations.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/chat` | Full intent-routed answer pipeline |
//! | `POST` | `/query` | Ranked retrieval only, for inspection |
//! | `POST` | `/ingest/entry/{id}` | Rebuild vectors for one entry |
//! | `POST` | `/ingest/batch` | Rebuild a list of entries |
//! | `POST` | `/ingest/all` | Rebuild a whole tenant |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! All error responses share one JSON shape:
//!
//! ```json
//! { "error": { "code": "invalid_argument", "message": "question must not be empty" } }
//! ```
//!
//! Error codes: `invalid_argument` (400), `not_found` (404),
//! `service_unavailable` (503, legacy backend unreachable),
//! `bad_gateway` (502, legacy backend returned an error), `internal` (500).
//!
//! `/chat` itself almost never errors: the pipeline degrades through its
//! fallback chain and the 5xx codes only appear when the legacy backend
//! fails with no generative model configured to cover for it.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser-based
//! support consoles can call the service directly.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::answer::AnswerPipeline;
use crate::ingest;
use crate::models::{AnswerResponse, ChatRequest, RankedResult, RebuildReport};
use crate::retrieval;
use crate::traits::LegacySearchError;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    pipeline: Arc<AnswerPipeline>,
}

/// Starts the HTTP server on `[service].bind` and serves until the
/// process is terminated.
pub async fn run_server(pipeline: AnswerPipeline) -> anyhow::Result<()> {
    let bind_addr = pipeline.config().service.bind.clone();
    let state = AppState {
        pipeline: Arc::new(pipeline),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/chat", post(handle_chat))
        .route("/query", post(handle_query))
        .route("/ingest/entry/{id}", post(handle_ingest_entry))
        .route("/ingest/batch", post(handle_ingest_batch))
        .route("/ingest/all", post(handle_ingest_all))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    info!("faultdesk listening on http://{bind_addr}");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
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

/// Internal error type that converts into an HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
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

fn invalid_argument(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "invalid_argument".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

/// Maps pipeline errors to status codes. The only errors the pipeline
/// surfaces are legacy-backend failures with no generative cover, so
/// the mapping distinguishes an unreachable backend (503) from one that
/// answered with an error (502).
fn classify_chat_error(err: anyhow::Error) -> AppError {
    match err.downcast_ref::<LegacySearchError>() {
        Some(LegacySearchError::Connect(_)) => AppError {
            status: StatusCode::SERVICE_UNAVAILABLE,
            code: "service_unavailable".to_string(),
            message: format!("{err:#}"),
        },
        Some(LegacySearchError::Status { .. }) => AppError {
            status: StatusCode::BAD_GATEWAY,
            code: "bad_gateway".to_string(),
            message: format!("{err:#}"),
        },
        _ => internal_error(format!("{err:#}")),
    }
}

fn classify_ingest_error(err: anyhow::Error) -> AppError {
    let msg = format!("{err:#}");
    if msg.contains("not found") {
        not_found(msg)
    } else {
        internal_error(msg)
    }
}

// ============ POST /chat ============

async fn handle_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<AnswerResponse>, AppError> {
    if req.question.trim().is_empty() {
        return Err(invalid_argument("question must not be empty"));
    }

    let response = state
        .pipeline
        .answer(&req)
        .await
        .map_err(classify_chat_error)?;
    Ok(Json(response))
}

// ============ POST /query ============

#[derive(Deserialize)]
struct QueryRequest {
    query: String,
    #[serde(default)]
    tenant_id: Option<String>,
    #[serde(default)]
    top_k: Option<usize>,
}

#[derive(Serialize)]
struct QueryResponse {
    results: Vec<RankedResult>,
}

/// Raw ranked retrieval, bypassing intent routing and synthesis. Used
/// to inspect what the scorer would feed the pipeline for a question.
async fn handle_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    if req.query.trim().is_empty() {
        return Err(invalid_argument("query must not be empty"));
    }
    let config = state.pipeline.config();
    let top_k = req.top_k.unwrap_or(config.retrieval.top_k);
    if top_k == 0 {
        return Err(invalid_argument("top_k must be >= 1"));
    }
    let tenant_id = req
        .tenant_id
        .unwrap_or_else(|| config.service.default_tenant.clone());

    let results = retrieval::retrieve(
        state.pipeline.embedder(),
        state.pipeline.vectors(),
        &config.retrieval,
        &tenant_id,
        req.query.trim(),
        top_k,
    )
    .await
    .map_err(|e| internal_error(format!("{e:#}")))?;

    Ok(Json(QueryResponse { results }))
}

// ============ POST /ingest/entry/{id} ============

#[derive(Serialize)]
struct IngestEntryResponse {
    entry_id: i64,
    upserted: usize,
}

async fn handle_ingest_entry(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<IngestEntryResponse>, AppError> {
    let pipeline = &state.pipeline;
    let upserted = ingest::rebuild_one(
        pipeline.knowledge(),
        pipeline.embedder(),
        pipeline.vectors(),
        &pipeline.config().retrieval,
        id,
    )
    .await
    .map_err(classify_ingest_error)?;

    Ok(Json(IngestEntryResponse {
        entry_id: id,
        upserted,
    }))
}

// ============ POST /ingest/batch ============

#[derive(Deserialize)]
struct IngestBatchRequest {
    ids: Vec<i64>,
}

async fn handle_ingest_batch(
    State(state): State<AppState>,
    Json(req): Json<IngestBatchRequest>,
) -> Result<Json<RebuildReport>, AppError> {
    if req.ids.is_empty() {
        return Err(invalid_argument("ids must not be empty"));
    }
    let pipeline = &state.pipeline;
    let report = ingest::rebuild_batch(
        pipeline.knowledge(),
        pipeline.embedder(),
        pipeline.vectors(),
        &pipeline.config().retrieval,
        &req.ids,
        ingest::BATCH_LOG_EVERY,
    )
    .await;
    Ok(Json(report))
}

// ============ POST /ingest/all ============

#[derive(Deserialize, Default)]
#[serde(default)]
struct IngestAllRequest {
    tenant_id: Option<String>,
    status: Option<String>,
    limit: Option<usize>,
    clear_first: bool,
}

async fn handle_ingest_all(
    State(state): State<AppState>,
    Json(req): Json<IngestAllRequest>,
) -> Result<Json<RebuildReport>, AppError> {
    let pipeline = &state.pipeline;
    let tenant_id = req
        .tenant_id
        .unwrap_or_else(|| pipeline.config().service.default_tenant.clone());

    let report = ingest::rebuild_all(
        pipeline.knowledge(),
        pipeline.embedder(),
        pipeline.vectors(),
        &pipeline.config().retrieval,
        &tenant_id,
        req.status.as_deref(),
        req.limit,
        req.clear_first,
    )
    .await
    .map_err(|e| internal_error(format!("{e:#}")))?;

    Ok(Json(report))
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
