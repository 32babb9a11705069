//! HTTP routes: webhook, build API, health.

pub mod api;
pub mod webhook;

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};

use shipyard_pipeline::{BuildExecution, Pipeline};

use crate::config::CiConfig;

/// Shared state for route handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub config: Arc<CiConfig>,
}

/// Body of every non-GET response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: String,
    pub message: String,
}

type ApiResult = (StatusCode, Json<ApiResponse>);

fn success(code: StatusCode, message: impl Into<String>) -> ApiResult {
    (
        code,
        Json(ApiResponse {
            status: "success".to_string(),
            message: message.into(),
        }),
    )
}

fn failure(code: StatusCode, message: impl Into<String>) -> ApiResult {
    (
        code,
        Json(ApiResponse {
            status: "error".to_string(),
            message: message.into(),
        }),
    )
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        // Webhook
        .route("/api/v1/receive", post(webhook_handler))
        // Build API
        .route("/api/v1/builds", get(list_builds_handler))
        .route("/api/v1/builds/trigger", post(trigger_build_handler))
        .route("/api/v1/builds/{id}", get(get_build))
        .with_state(state)
}

async fn health() -> ApiResult {
    success(StatusCode::OK, "ok")
}

// ── Webhook ──

#[derive(Debug, Deserialize)]
pub struct ReceiveQuery {
    pub id: Option<String>,
}

async fn webhook_handler(
    State(state): State<AppState>,
    Query(query): Query<ReceiveQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult {
    let token = webhook::token(query.id, &headers);
    match webhook::handle_webhook(&state, token, &headers, body).await {
        Ok(message) => success(StatusCode::OK, message),
        Err(e) => failure(e.status_code(), e.to_string()),
    }
}

// ── Build API ──

async fn trigger_build_handler(
    State(state): State<AppState>,
    Json(req): Json<api::TriggerRequest>,
) -> ApiResult {
    let definition_id = req.definition_id;
    match api::trigger_build(&state, req).await {
        Ok(Some(message)) => success(StatusCode::ACCEPTED, message),
        Ok(None) => failure(
            StatusCode::NOT_FOUND,
            format!("no build definition with id {definition_id}"),
        ),
        Err(e) => {
            tracing::error!("Trigger build error: {e:#}");
            failure(StatusCode::INTERNAL_SERVER_ERROR, "cannot trigger build")
        }
    }
}

async fn list_builds_handler(
    State(state): State<AppState>,
    Query(query): Query<api::ListBuildsQuery>,
) -> Result<Json<Vec<BuildExecution>>, StatusCode> {
    api::list_builds(&state, query).await.map(Json).map_err(|e| {
        tracing::error!("List builds error: {e:#}");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

async fn get_build(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<BuildExecution>, StatusCode> {
    match api::get_build(&state, id).await {
        Ok(Some(execution)) => Ok(Json(execution)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("Get build error: {e:#}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
