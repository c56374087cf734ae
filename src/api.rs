// HTTP surface: routes, shared state and error mapping

use anyhow::Result;
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use futures::Stream;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::{error, info, warn};

use crate::core::config::Config;
use crate::core::errors::{ArtifactError, TaskError};
use crate::core::types::{ArtifactRole, SubmittedTask, TaskStatus, TextTranslationRequest};
use crate::orchestration::PdfOrchestrator;
use crate::services::pdf::DocumentUpload;
use crate::services::storage::TranslationLog;
use crate::services::translation::StreamRelay;
use crate::utils::Metrics;

/// Upper bound on uploaded documents
const MAX_UPLOAD_BYTES: usize = 200 * 1024 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub relay: Arc<StreamRelay>,
    pub orchestrator: Arc<PdfOrchestrator>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let metrics = Metrics::new();
        let log = TranslationLog::new(&config.storage.translations_file, metrics.clone());
        let relay = Arc::new(StreamRelay::new(
            Arc::clone(&config),
            log.clone(),
            metrics.clone(),
        )?);
        let orchestrator = Arc::new(PdfOrchestrator::new(
            Arc::clone(&config),
            log,
            metrics.clone(),
        )?);

        Ok(Self {
            config,
            relay,
            orchestrator,
            metrics,
        })
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let static_files = ServeDir::new(&state.config.server.public_dir);

    Router::new()
        .route("/api/translate-text", post(translate_text))
        .route("/api/translate-pdf", post(translate_pdf))
        .route(
            "/api/translate-pdf/{task_id}",
            get(pdf_status).delete(cancel_pdf),
        )
        .route("/api/translate-pdf/{task_id}/{role}", get(download_artifact))
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/stats", get(stats_endpoint))
        .fallback_service(static_files)
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn error_response(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(serde_json::json!({ "error": message.into() })))
}

impl IntoResponse for TaskError {
    fn into_response(self) -> Response {
        let status = match &self {
            TaskError::MissingFile | TaskError::InvalidPages(_) | TaskError::InvalidTaskId(_) => {
                StatusCode::BAD_REQUEST
            }
            TaskError::CancelRejected { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            TaskError::WorkerUnavailable(e) if e.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        };
        if status.is_server_error() {
            error!(error = %self, "Document task request failed");
        }
        error_response(status, self.to_string()).into_response()
    }
}

/// Stream a text translation as server-sent events
async fn translate_text(
    State(state): State<AppState>,
    Json(request): Json<TextTranslationRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    state.metrics.record_endpoint_request("/api/translate-text");

    let events = ReceiverStream::new(state.relay.spawn(request))
        .map(|event| Ok::<_, Infallible>(Event::default().data(event.to_json().to_string())));

    Sse::new(events).keep_alive(KeepAlive::default())
}

/// Submit a PDF for translation
///
/// multipart/form-data fields:
/// - `file`: the PDF (required)
/// - `source_lang` / `target_lang`: language codes (default `en` / `ja`)
/// - `pages`: JSON page selection (optional)
async fn translate_pdf(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<SubmittedTask>, Response> {
    state.metrics.record_endpoint_request("/api/translate-pdf");

    let mut file: Option<(String, Bytes)> = None;
    let mut source_lang = "en".to_string();
    let mut target_lang = "ja".to_string();
    let mut pages = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        error_response(StatusCode::BAD_REQUEST, format!("Multipart error: {}", e)).into_response()
    })? {
        let name = field.name().unwrap_or("").to_string();
        let read_error = |e: axum::extract::multipart::MultipartError| {
            error_response(StatusCode::BAD_REQUEST, format!("Read error: {}", e)).into_response()
        };

        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or("document.pdf").to_string();
                let data = field.bytes().await.map_err(read_error)?;
                file = Some((filename, data));
            }
            "source_lang" => source_lang = field.text().await.map_err(read_error)?,
            "target_lang" => target_lang = field.text().await.map_err(read_error)?,
            "pages" => {
                let raw = field.text().await.map_err(read_error)?;
                if !raw.trim().is_empty() {
                    let parsed: serde_json::Value = serde_json::from_str(&raw)
                        .map_err(|e| TaskError::InvalidPages(e.to_string()).into_response())?;
                    pages = Some(parsed);
                }
            }
            _ => {
                warn!(field = %name, "Ignoring unknown multipart field");
            }
        }
    }

    let (filename, bytes) = file.ok_or_else(|| TaskError::MissingFile.into_response())?;
    info!(
        filename = %filename,
        source = %source_lang,
        target = %target_lang,
        "PDF translation request"
    );

    let upload = DocumentUpload {
        filename,
        bytes,
        source_lang,
        target_lang,
        pages,
    };
    state
        .orchestrator
        .submit(upload)
        .await
        .map(Json)
        .map_err(IntoResponse::into_response)
}

async fn pdf_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskStatus>, TaskError> {
    state.metrics.record_endpoint_request("/api/translate-pdf/status");
    state.orchestrator.poll(&task_id).await.map(Json)
}

async fn cancel_pdf(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<serde_json::Value>, TaskError> {
    state.metrics.record_endpoint_request("/api/translate-pdf/cancel");
    state.orchestrator.cancel(&task_id).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

/// Serve a stored PDF as an attachment
async fn download_artifact(
    State(state): State<AppState>,
    Path((task_id, role)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let role = ArtifactRole::parse(&role)
        .ok_or_else(|| error_response(StatusCode::NOT_FOUND, "File not found"))?;

    let path = match state.orchestrator.artifact(&task_id, role) {
        Ok(Some(path)) => path,
        Ok(None) => return Err(error_response(StatusCode::NOT_FOUND, "File not found")),
        Err(e @ ArtifactError::InvalidTaskId(_)) => {
            return Err(error_response(StatusCode::BAD_REQUEST, e.to_string()))
        }
        Err(e) => return Err(error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    };

    let data = tokio::fs::read(&path).await.map_err(|e| {
        error!(path = %path.display(), error = %e, "Failed to read artifact");
        error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to read file")
    })?;

    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("{}_{}.pdf", task_id, role));

    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        data,
    )
        .into_response())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Prometheus metrics endpoint
async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.to_prometheus(),
    )
}

/// Detailed statistics endpoint (JSON)
async fn stats_endpoint(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    serde_json::to_value(state.metrics.snapshot())
        .map(Json)
        .map_err(|e| {
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to serialize metrics: {}", e),
            )
        })
}
