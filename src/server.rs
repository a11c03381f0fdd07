//! HTTP surface for detection and batch jobs.
//!
//! A thin JSON layer over the same services the CLI uses. Batch jobs run in
//! the background; clients poll `GET /jobs/{id}` until the status is
//! `completed` or `failed`.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Health check (returns version and detection mode) |
//! | `POST`   | `/detect` | Detect the source context of one document |
//! | `POST`   | `/jobs` | Start a batch job from `{docs}` or `{docsRoot}` (`{}` uses the configured docs root) |
//! | `GET`    | `/jobs` | All jobs, most recently started first |
//! | `GET`    | `/jobs/{id}` | One job |
//! | `GET`    | `/cache/stats` | Response cache counters |
//! | `DELETE` | `/cache` | Drop every cached agent response |
//!
//! Relative paths in request bodies resolve against the server's working
//! directory, like paths in the config file.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "no job with id: job_1_abc" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::batch::{BatchRunner, BatchSource};
use crate::cache::CacheStats;
use crate::config::Config;
use crate::detect::ContextDetector;
use crate::jobs::{DetectionJob, JobQueue};
use crate::models::{ContextDetectionResult, SourceContext};

/// Shared services handed to every handler.
#[derive(Clone)]
struct AppState {
    detector: Arc<ContextDetector>,
    runner: BatchRunner,
}

/// Starts the HTTP server on `[server].bind` and runs until the process ends.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let detector = Arc::new(ContextDetector::from_config(config)?);
    let queue = Arc::new(JobQueue::from_config(&config.jobs));

    let bind_addr = config.server.bind.clone();
    let app = router(detector, queue);

    tracing::info!(bind = %bind_addr, "server listening");
    println!("srcctx server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// The application router over existing services.
pub fn router(detector: Arc<ContextDetector>, queue: Arc<JobQueue>) -> Router {
    let state = AppState {
        runner: BatchRunner::new(Arc::clone(&detector), queue),
        detector,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/detect", post(handle_detect))
        .route("/jobs", post(handle_create_job).get(handle_list_jobs))
        .route("/jobs/{id}", get(handle_get_job))
        .route("/cache/stats", get(handle_cache_stats))
        .route("/cache", delete(handle_clear_cache))
        .layer(cors)
        .with_state(state)
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
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn internal(err: anyhow::Error) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: format!("{:#}", err),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    /// `"llm"` when a chat model is configured and available, else `"rules"`.
    mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let model = state.detector.model_name().map(str::to_string);
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        mode: if model.is_some() { "llm" } else { "rules" }.to_string(),
        model,
    })
}

// ============ POST /detect ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetectRequest {
    doc_path: String,
    /// Raw page text; read from `doc_path` when absent.
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    existing_mapping: Option<SourceContext>,
}

async fn handle_detect(
    State(state): State<AppState>,
    Json(req): Json<DetectRequest>,
) -> Result<Json<ContextDetectionResult>, AppError> {
    if req.doc_path.trim().is_empty() {
        return Err(bad_request("docPath must not be empty"));
    }

    let content = match req.content {
        Some(content) => content,
        None => tokio::fs::read_to_string(&req.doc_path)
            .await
            .map_err(|e| not_found(format!("cannot read document {}: {}", req.doc_path, e)))?,
    };

    let result = state
        .detector
        .detect_source_context(
            &req.doc_path,
            &content,
            state.detector.project_root(),
            req.existing_mapping.as_ref(),
        )
        .await
        .map_err(internal)?;

    Ok(Json(result))
}

// ============ /jobs ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateJobRequest {
    #[serde(default)]
    docs: Option<Vec<PathBuf>>,
    #[serde(default)]
    docs_root: Option<PathBuf>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateJobResponse {
    job_id: String,
}

async fn handle_create_job(
    State(state): State<AppState>,
    Json(req): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<CreateJobResponse>), AppError> {
    let source = match (req.docs, req.docs_root) {
        (Some(_), Some(_)) => return Err(bad_request("set either docs or docsRoot, not both")),
        (Some(docs), None) => {
            if docs.is_empty() {
                return Err(bad_request("docs must not be empty"));
            }
            BatchSource::Documents(docs)
        }
        (None, docs_root) => BatchSource::Directory {
            docs_root: docs_root.unwrap_or_else(|| state.detector.docs_root().to_path_buf()),
            include: state.detector.doc_globs().to_vec(),
        },
    };

    let job_id = state.runner.start(source);
    Ok((StatusCode::ACCEPTED, Json(CreateJobResponse { job_id })))
}

#[derive(Serialize)]
struct JobListResponse {
    jobs: Vec<DetectionJob>,
}

async fn handle_list_jobs(State(state): State<AppState>) -> Json<JobListResponse> {
    Json(JobListResponse {
        jobs: state.runner.queue().get_all_jobs(),
    })
}

async fn handle_get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DetectionJob>, AppError> {
    state
        .runner
        .queue()
        .get_job(&id)
        .map(Json)
        .ok_or_else(|| not_found(format!("no job with id: {}", id)))
}

// ============ /cache ============

async fn handle_cache_stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.detector.cache_stats())
}

async fn handle_clear_cache(State(state): State<AppState>) -> StatusCode {
    state.detector.clear_cache();
    StatusCode::NO_CONTENT
}
