//! HTTP API server.
//!
//! Exposes the document pipeline and chat sessions as a JSON API with an
//! SSE chat stream.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/documents/process` | Ingest a document; blocks until Indexed or Failed |
//! | `GET`  | `/api/documents` | List assets |
//! | `POST` | `/api/chat/start` | Create a thread bound to an asset |
//! | `POST` | `/api/chat/message` | Send a message; reply streams as SSE |
//! | `GET`  | `/api/chat/history` | Ordered turns of a thread |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! Every error response carries a stable machine-readable kind:
//!
//! ```json
//! { "error": { "kind": "asset_not_ready", "message": "asset not ready: ..." } }
//! ```
//!
//! | kind | status |
//! |------|--------|
//! | `unsupported_format`, `file_unreadable` | 400 |
//! | `file_not_found`, `asset_not_found`, `thread_not_found` | 404 |
//! | `asset_not_ready`, `thread_busy` | 409 |
//! | `embedding_service_error`, `generation_error`, `generation_interrupted` | 502 |
//! | `internal` | 500 |
//!
//! # Streaming
//!
//! `POST /api/chat/message` answers with `text/event-stream`. Each frame
//! is a JSON object: `{"type":"delta","content":...}` fragments, then a
//! final `{"type":"done","sequence_number":...}` marker (or
//! `{"type":"error","kind":...,"message":...}` if the stream was cut
//! short). Closing the connection mid-stream aborts the model call and
//! persists the partial reply as a truncated agent turn.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::sse::{Event, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::StreamExt;
use log::info;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::db;
use crate::embedding::{create_embedder, Embedder};
use crate::error::ServiceError;
use crate::generate::create_chat_model;
use crate::index::VectorIndex;
use crate::ingest;
use crate::migrate;
use crate::models::{Asset, Turn};
use crate::orchestrator::{Orchestrator, StreamEvent};
use crate::registry::AssetRegistry;
use crate::retrieve::Retriever;
use crate::threads::ThreadStore;

/// Shared application state: configuration plus the injected stores and
/// services every handler works against.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    registry: AssetRegistry,
    index: VectorIndex,
    threads: ThreadStore,
    embedder: Arc<dyn Embedder>,
    orchestrator: Orchestrator,
}

/// Build the state and start the server on `[server].bind`. Runs until
/// the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(&config.db.path).await?;
    migrate::run_migrations(&pool).await?;

    let registry = AssetRegistry::new(pool.clone());
    let index = VectorIndex::new(pool.clone());
    let threads = ThreadStore::new(pool.clone());
    let embedder = create_embedder(&config.embedding)?;
    let model = create_chat_model(&config.generation)?;
    let retriever = Retriever::new(
        registry.clone(),
        index.clone(),
        embedder.clone(),
        config.retrieval.k,
    );
    let orchestrator = Orchestrator::new(
        threads.clone(),
        registry.clone(),
        retriever,
        model,
        config.generation.clone(),
    );

    let state = AppState {
        config: Arc::new(config.clone()),
        registry,
        index,
        threads,
        embedder,
        orchestrator,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/documents/process", post(handle_process_document))
        .route("/api/documents", get(handle_list_documents))
        .route("/api/chat/start", post(handle_chat_start))
        .route("/api/chat/message", post(handle_chat_message))
        .route("/api/chat/history", get(handle_chat_history))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    let bind = &config.server.bind;
    info!("listening on http://{}", bind);

    let listener = tokio::net::TcpListener::bind(bind).await?;
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
    /// Stable machine-readable kind; clients branch retries on this.
    kind: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                kind: self.kind.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<ServiceError> for AppError {
    fn from(e: ServiceError) -> Self {
        let status = match &e {
            ServiceError::UnsupportedFormat(_) | ServiceError::FileUnreadable { .. } => {
                StatusCode::BAD_REQUEST
            }
            ServiceError::FileNotFound(_)
            | ServiceError::AssetNotFound(_)
            | ServiceError::ThreadNotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::AssetNotReady(_) | ServiceError::ThreadBusy(_) => StatusCode::CONFLICT,
            ServiceError::EmbeddingService(_)
            | ServiceError::Generation(_)
            | ServiceError::GenerationInterrupted(_) => StatusCode::BAD_GATEWAY,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError {
            status,
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

// ============ POST /api/documents/process ============

#[derive(Deserialize)]
struct ProcessRequest {
    file_path: PathBuf,
}

#[derive(Serialize)]
struct ProcessResponse {
    asset_id: String,
    chunk_count: i64,
    status: &'static str,
}

/// Synchronous ingestion: the response arrives once the asset is Indexed,
/// or the specific stage error once it is Failed.
async fn handle_process_document(
    State(state): State<AppState>,
    Json(req): Json<ProcessRequest>,
) -> Result<Json<ProcessResponse>, AppError> {
    let outcome = ingest::process_document(
        &state.config,
        &state.registry,
        &state.index,
        state.embedder.as_ref(),
        &req.file_path,
    )
    .await?;

    Ok(Json(ProcessResponse {
        asset_id: outcome.asset_id,
        chunk_count: outcome.chunk_count,
        status: outcome.status.as_str(),
    }))
}

// ============ GET /api/documents ============

#[derive(Serialize)]
struct DocumentsResponse {
    documents: Vec<Asset>,
}

async fn handle_list_documents(
    State(state): State<AppState>,
) -> Result<Json<DocumentsResponse>, AppError> {
    let documents = state.registry.list().await?;
    Ok(Json(DocumentsResponse { documents }))
}

// ============ POST /api/chat/start ============

#[derive(Deserialize)]
struct ChatStartRequest {
    asset_id: String,
}

#[derive(Serialize)]
struct ChatStartResponse {
    thread_id: String,
}

async fn handle_chat_start(
    State(state): State<AppState>,
    Json(req): Json<ChatStartRequest>,
) -> Result<Json<ChatStartResponse>, AppError> {
    let thread_id = state.threads.start(&state.registry, &req.asset_id).await?;
    info!("thread {} started on asset {}", thread_id, req.asset_id);
    Ok(Json(ChatStartResponse { thread_id }))
}

// ============ POST /api/chat/message ============

#[derive(Deserialize)]
struct ChatMessageRequest {
    thread_id: String,
    message: String,
}

async fn handle_chat_message(
    State(state): State<AppState>,
    Json(req): Json<ChatMessageRequest>,
) -> Result<impl IntoResponse, AppError> {
    let stream = state
        .orchestrator
        .generate(&req.thread_id, &req.message)
        .await?;

    let events = stream.map(|event| {
        let json = match event {
            StreamEvent::Delta(content) => serde_json::json!({
                "type": "delta",
                "content": content,
            }),
            StreamEvent::Done { sequence_number } => serde_json::json!({
                "type": "done",
                "sequence_number": sequence_number,
            }),
            StreamEvent::Error { kind, message } => serde_json::json!({
                "type": "error",
                "kind": kind,
                "message": message,
            }),
        };
        Ok::<Event, Infallible>(Event::default().data(json.to_string()))
    });

    Ok(Sse::new(events))
}

// ============ GET /api/chat/history ============

#[derive(Deserialize)]
struct HistoryQuery {
    thread_id: String,
}

#[derive(Serialize)]
struct HistoryResponse {
    thread_id: String,
    turns: Vec<Turn>,
}

async fn handle_chat_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, AppError> {
    let turns = state.threads.history(&query.thread_id).await?;
    Ok(Json(HistoryResponse {
        thread_id: query.thread_id,
        turns,
    }))
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
