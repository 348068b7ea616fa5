//! HTTP surface of the document QA service.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/upload` | Upload a PDF and add it to the knowledge base |
//! | `POST` | `/chat` | Ask a question about the uploaded documents |
//! | `GET`  | `/` | Liveness/info |
//!
//! # Error Contract
//!
//! Error responses are JSON:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "Only PDF files are allowed." } }
//! ```
//!
//! A query before any upload returns 400 with the message
//! "Knowledge base is empty. Please upload a document first.". Capability
//! and storage failures return 500.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser
//! clients.

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::history::SessionStore;
use crate::rag::{IngestError, QueryError, RagService};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub rag: Arc<RagService>,
    pub sessions: Arc<SessionStore>,
}

/// Build the router with all routes and middleware attached.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_info))
        .route("/upload", post(handle_upload))
        .route("/chat", post(handle_chat))
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server on `bind_addr`. Runs until the process exits.
pub async fn run_server(bind_addr: &str, state: AppState) -> anyhow::Result<()> {
    let router = app(state);

    info!("docchat listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, router).await?;

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

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
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

// ============ GET / ============

#[derive(Serialize)]
struct InfoResponse {
    service: String,
    version: String,
    message: String,
}

async fn handle_info() -> Json<InfoResponse> {
    Json(InfoResponse {
        service: "docchat".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        message: "Upload PDFs to /upload, then ask questions at /chat.".to_string(),
    })
}

// ============ POST /upload ============

#[derive(Serialize)]
struct UploadResponse {
    filename: String,
    num_pages: usize,
    message: String,
}

/// Handler for `POST /upload`.
///
/// Accepts a multipart form with a `file` field that must be a PDF. The
/// upload is spooled to a named temp file which is deleted on every exit
/// path (success or failure) when it drops.
async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut upload: Option<(String, axum::body::Bytes)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("invalid multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(|f| f.to_string())
            .ok_or_else(|| bad_request("file field is missing a filename"))?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| bad_request(format!("failed to read upload: {}", e)))?;
        upload = Some((filename, bytes));
        break;
    }

    let (filename, bytes) =
        upload.ok_or_else(|| bad_request("multipart field 'file' is required"))?;

    if !filename.to_lowercase().ends_with(".pdf") {
        return Err(bad_request("Only PDF files are allowed."));
    }

    let mut temp = tempfile::NamedTempFile::new()
        .map_err(|e| internal_error(format!("could not create temp file: {}", e)))?;
    temp.write_all(&bytes)
        .and_then(|_| temp.flush())
        .map_err(|e| internal_error(format!("could not write temp file: {}", e)))?;

    let report = state
        .rag
        .add_document(temp.path(), &filename)
        .await
        .map_err(|e| match e {
            IngestError::Load(load) => bad_request(load.to_string()),
            IngestError::Internal(err) => {
                error!(filename = %filename, "ingestion failed: {:#}", err);
                internal_error(format!("Error processing file: {}", err))
            }
        })?;

    Ok(Json(UploadResponse {
        filename: report.filename,
        num_pages: report.num_pages,
        message: "File processed and added to knowledge base successfully.".to_string(),
    }))
}

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatRequest {
    query: String,
    #[serde(default = "default_session_id")]
    session_id: String,
}

fn default_session_id() -> String {
    "default_session".to_string()
}

#[derive(Serialize)]
struct ChatResponse {
    answer: String,
    sources: Vec<String>,
}

/// Handler for `POST /chat`.
///
/// Answers the query against the knowledge base using the session's chat
/// history, then appends the completed turn. The append happens only
/// after synthesis succeeds, so a failed or timed-out request leaves the
/// history untouched.
async fn handle_chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    if request.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }

    let history = state.sessions.get(&request.session_id);

    let answer = state
        .rag
        .answer_query(&request.query, &history)
        .await
        .map_err(|e| match e {
            QueryError::EmptyIndex => bad_request(e.to_string()),
            QueryError::Capability(_) | QueryError::Storage(_) => {
                error!(session = %request.session_id, "query failed: {}", e);
                internal_error(format!("Error generating answer: {}", e))
            }
        })?;

    state
        .sessions
        .append(&request.session_id, request.query, answer.answer.clone());

    let mut sources: Vec<String> = answer.sources.into_iter().collect();
    sources.sort();

    Ok(Json(ChatResponse {
        answer: answer.answer,
        sources,
    }))
}
