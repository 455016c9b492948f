//! HTTP server for the question-answering pipeline.
//!
//! A thin JSON layer over [`RagSystem`]. Every query builds its own tool
//! registry, so concurrent requests never share citation state.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/query` | Answer a question, optionally within a session |
//! | `GET`  | `/api/courses` | Catalog overview (course count and titles) |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404, unknown
//! `session_id`), `internal` (500). Language model
//! failures are not errors here: they come back as an apologetic answer.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a browser front end
//! served from another origin can call the API.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::models::Source;
use crate::rag::RagSystem;

/// Shared application state passed to all Axum handlers.
#[derive(Clone)]
struct AppState {
    rag: Arc<RagSystem>,
}

/// All routes with permissive CORS.
pub fn router(rag: Arc<RagSystem>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/query", post(handle_query))
        .route("/api/courses", get(handle_courses))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { rag })
}

/// Bind `bind_addr` and serve until the process is stopped.
pub async fn run_server(rag: Arc<RagSystem>, bind_addr: &str) -> anyhow::Result<()> {
    let app = router(rag);

    tracing::info!("listening on http://{}", bind_addr);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
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

#[derive(Debug)]
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

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
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

// ============ POST /api/query ============

#[derive(Debug, Deserialize)]
struct QueryRequest {
    query: String,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct QueryResponse {
    answer: String,
    sources: Vec<Source>,
    session_id: String,
}

/// Handler for `POST /api/query`.
///
/// A request without `session_id` starts a new session; the id is echoed
/// back so the client can continue the conversation. Ids this server did
/// not issue are rejected with 404.
async fn handle_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }

    let sessions = state.rag.sessions();
    let session_id = match req.session_id.filter(|s| !s.trim().is_empty()) {
        Some(id) if sessions.contains(&id).await => id,
        Some(id) => return Err(not_found(format!("unknown session_id: {}", id))),
        None => sessions.create_session().await,
    };

    let answer = state.rag.answer_query(&req.query, Some(&session_id)).await;

    Ok(Json(QueryResponse {
        answer: answer.answer,
        sources: answer.sources,
        session_id,
    }))
}

// ============ GET /api/courses ============

#[derive(Debug, Serialize)]
struct CoursesResponse {
    total_courses: usize,
    course_titles: Vec<String>,
}

async fn handle_courses(State(state): State<AppState>) -> Result<Json<CoursesResponse>, AppError> {
    let stats = state.rag.get_catalog_stats().await.map_err(|e| {
        tracing::error!("catalog stats failed: {:#}", e);
        internal(e.to_string())
    })?;

    Ok(Json(CoursesResponse {
        total_courses: stats.course_count,
        course_titles: stats.titles,
    }))
}
