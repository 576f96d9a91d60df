//! HTTP surface: manual trigger and thin read endpoints

use axum::{
    extract::{Path, Query, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::{
    error::StoreError,
    service::IngestionService,
    summary::RunStatus,
};

/// Default page size of list endpoints.
pub const DEFAULT_LIST_LIMIT: i64 = 50;

/// Upper bound on list endpoint page size.
pub const MAX_LIST_LIMIT: i64 = 500;

/// API error types
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Store(ref e) => {
                tracing::error!("Store error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "A database error occurred".to_string())
            }
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "status": status.as_u16(),
            }
        }));

        (status, body).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub search: Option<String>,
    pub limit: Option<i64>,
}

impl ListParams {
    fn limit(&self) -> Result<i64, ApiError> {
        match self.limit {
            None => Ok(DEFAULT_LIST_LIMIT),
            Some(limit) if (1..=MAX_LIST_LIMIT).contains(&limit) => Ok(limit),
            Some(limit) => Err(ApiError::BadRequest(format!(
                "limit must be between 1 and {MAX_LIST_LIMIT}, got {limit}"
            ))),
        }
    }
}

/// Build the router with all routes and middleware
pub fn router(service: Arc<IngestionService>, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/ingest/run", post(trigger_run))
        .route("/api/v1/ingest/runs", get(list_runs))
        .route("/api/v1/recalls", get(list_recalls))
        .route("/api/v1/recalls/:identifier", get(get_recall))
        .with_state(service)
        .layer(tracing_layer())
        .layer(cors_layer(allowed_origins))
}

/// Create tracing/logging layer
pub fn tracing_layer(
) -> TraceLayer<tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>>
{
    TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(
            DefaultOnResponse::new()
                .level(Level::INFO)
                .latency_unit(tower_http::LatencyUnit::Micros),
        )
}

/// Create CORS layer; `*` or an empty list allows any origin
pub fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::ACCEPT, header::CONTENT_TYPE, header::AUTHORIZATION]);

    if allowed_origins.is_empty() || allowed_origins.iter().any(|o| o == "*") {
        cors.allow_origin(Any)
    } else {
        let origins: Vec<_> = allowed_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        cors.allow_origin(origins)
    }
}

async fn health_check(State(service): State<Arc<IngestionService>>) -> Response {
    match service.store().count().await {
        Ok(recalls) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "store": "connected",
                "recalls": recalls,
                "ingest_running": service.is_running(),
            })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Store health check failed: {:?}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unhealthy", "store": "unavailable" })),
            )
                .into_response()
        }
    }
}

async fn trigger_run(State(service): State<Arc<IngestionService>>) -> Response {
    let summary = service.run_now().await;
    let status = match summary.status {
        RunStatus::AlreadyRunning => StatusCode::CONFLICT,
        RunStatus::Failed => StatusCode::INTERNAL_SERVER_ERROR,
        RunStatus::Completed | RunStatus::Partial | RunStatus::Cancelled => StatusCode::OK,
    };

    (
        status,
        Json(json!({
            "message": summary.to_string(),
            "summary": summary,
        })),
    )
        .into_response()
}

async fn list_runs(
    State(service): State<Arc<IngestionService>>,
    Query(params): Query<ListParams>,
) -> Result<Response, ApiError> {
    let runs = service.store().recent_runs(params.limit()?).await?;
    Ok(Json(json!({ "runs": runs })).into_response())
}

async fn list_recalls(
    State(service): State<Arc<IngestionService>>,
    Query(params): Query<ListParams>,
) -> Result<Response, ApiError> {
    let limit = params.limit()?;
    let store = service.store();

    let recalls = match params.search.as_deref().map(str::trim) {
        Some(term) if !term.is_empty() => store.search(term, limit).await?,
        _ => store.list_recent(limit).await?,
    };
    let total = store.count().await?;

    Ok(Json(json!({
        "recalls": recalls,
        "total": total,
    }))
    .into_response())
}

async fn get_recall(
    State(service): State<Arc<IngestionService>>,
    Path(identifier): Path<String>,
) -> Result<Response, ApiError> {
    match service.store().find(&identifier).await? {
        Some(recall) => Ok(Json(recall).into_response()),
        None => Err(ApiError::NotFound(format!("Recall '{identifier}' not found"))),
    }
}
