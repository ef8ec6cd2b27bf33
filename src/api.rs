//! HTTP surface over the retriever and answer engine.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{error, info, info_span, Instrument};

use crate::rag::{AiStatus, RagEngine};
use crate::retriever::{IndexStats, Retriever};
use crate::utils::now_iso8601;
use crate::vector_db::Document;

const MAX_TOP_K: usize = 20;
const MAX_ARTICLES_LIMIT: usize = 100;

#[derive(Clone)]
pub struct AppState {
    pub retriever: Arc<Retriever>,
    pub rag: Arc<RagEngine>,
    pub pipeline_running: Arc<AtomicBool>,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    ServiceUnavailable(String),
    /// The language model failed; carries whatever was retrieved.
    Generation(Value),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            ApiError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, json!({ "error": msg }))
            }
            ApiError::Generation(body) => (StatusCode::BAD_GATEWAY, body),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_top_k() -> usize {
    5
}

#[derive(Debug, Serialize)]
pub struct AskResponse {
    pub question: String,
    pub answer: String,
    pub sources: Vec<String>,
    pub article_summaries: Vec<String>,
    pub num_documents: usize,
    pub timestamp: String,
    pub index_size: usize,
    pub ai_status: Option<AiStatus>,
    pub note: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub pipeline_running: bool,
    pub index_size: usize,
    pub index_stats: IndexStats,
    pub timestamp: String,
}

#[derive(Debug, Deserialize)]
pub struct ArticlesQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    10
}

#[derive(Debug, Serialize)]
pub struct ArticlesResponse {
    pub count: usize,
    pub articles: Vec<Document>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/articles", get(list_articles))
        .route("/ask", post(ask))
        .with_state(state)
}

async fn root() -> Json<Value> {
    Json(json!({
        "name": "LiveNewsAI",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Real-time RAG system for breaking news",
        "endpoints": {
            "GET /health": "Health check and system status",
            "POST /ask": "Ask a question about the latest news",
            "GET /stats": "Get system statistics",
            "GET /articles": "List recently indexed articles",
        },
    }))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let index_stats = state.retriever.stats();
    Json(HealthResponse {
        status: "healthy",
        pipeline_running: state.pipeline_running.load(Ordering::SeqCst),
        index_size: index_stats.total_documents,
        index_stats,
        timestamp: now_iso8601(),
    })
}

async fn stats(State(state): State<AppState>) -> Json<Value> {
    let stats = state.retriever.stats();
    Json(json!({
        "index_size": stats.total_documents,
        "embedding_dimension": stats.embedding_dimension,
        "embedding_model": stats.embedding_model,
        "pipeline_running": state.pipeline_running.load(Ordering::SeqCst),
        "timestamp": now_iso8601(),
    }))
}

async fn list_articles(
    State(state): State<AppState>,
    Query(query): Query<ArticlesQuery>,
) -> Result<Json<ArticlesResponse>, ApiError> {
    if !(1..=MAX_ARTICLES_LIMIT).contains(&query.limit) {
        return Err(ApiError::BadRequest(format!(
            "limit must be between 1 and {MAX_ARTICLES_LIMIT}"
        )));
    }
    let articles = state.retriever.index().recent(query.limit);
    Ok(Json(ArticlesResponse {
        count: articles.len(),
        articles,
    }))
}

async fn ask(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResponse>, ApiError> {
    let question = request.question.trim().to_string();
    if question.is_empty() {
        return Err(ApiError::BadRequest("Question cannot be empty".to_string()));
    }
    if !(1..=MAX_TOP_K).contains(&request.top_k) {
        return Err(ApiError::BadRequest(format!(
            "top_k must be between 1 and {MAX_TOP_K}"
        )));
    }
    if state.retriever.index().is_empty() {
        return Err(ApiError::ServiceUnavailable(
            "Vector index is empty. Pipeline may still be initializing.".to_string(),
        ));
    }

    let span = info_span!("ask", request_id = %uuid::Uuid::new_v4());
    async move {
        info!("Processing question: {}", question);
        let documents = state.retriever.retrieve(&question, request.top_k).await;
        if documents.is_empty() {
            return Err(ApiError::NotFound("No relevant articles found".to_string()));
        }

        match state.rag.answer_question(&question, &documents).await {
            Ok(result) => {
                info!("Question answered successfully. Sources: {}", result.sources.len());
                Ok(Json(AskResponse {
                    question: result.question,
                    answer: result.answer,
                    sources: result.sources,
                    article_summaries: result.article_summaries,
                    num_documents: result.num_documents,
                    timestamp: result.timestamp,
                    index_size: state.retriever.index().size(),
                    ai_status: result.ai_status,
                    note: result.note,
                }))
            }
            Err(err) => {
                error!("Error processing question: {}", err);
                Err(ApiError::Generation(json!({
                    "error": err.to_string(),
                    "question": err.question,
                    "sources": err.sources,
                    "num_documents": err.num_documents,
                    "timestamp": err.timestamp,
                    "ai_status": AiStatus::Error.as_str(),
                })))
            }
        }
    }
    .instrument(span)
    .await
}
