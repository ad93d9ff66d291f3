use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use calmly_core::sync::{PullPage, PushOperation, PushOutcome};
use calmly_core::{EntityType, MemoryRemote, RemoteBackend};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::error::AppError;

const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    store: MemoryRemote,
}

impl AppState {
    pub fn from_config(config: Arc<AppConfig>) -> Self {
        Self::with_store(config, MemoryRemote::default())
    }

    pub fn with_store(config: Arc<AppConfig>, store: MemoryRemote) -> Self {
        Self { config, store }
    }
}

pub fn app_router(state: AppState) -> Router {
    let sync_routes = Router::new()
        .route("/sync/{entity}/push", post(push_changes))
        .route("/sync/{entity}/changes", get(list_changes));

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/v1", sync_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
}

async fn healthz(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    state.store.health().await?;
    Ok(Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
    }))
}

#[derive(Debug, Deserialize)]
struct PushRequest {
    operations: Vec<PushOperation>,
}

#[derive(Debug, Serialize)]
struct PushResponse {
    results: Vec<PushOutcome>,
}

async fn push_changes(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    body: Result<Json<PushRequest>, JsonRejection>,
) -> Result<Json<PushResponse>, AppError> {
    let entity = parse_entity(&entity)?;
    let Json(request) = body.map_err(|rejection| AppError::bad_request(rejection.body_text()))?;

    let count = request.operations.len();
    if count > state.config.max_push_batch {
        return Err(AppError::bad_request(format!(
            "batch of {count} operations exceeds the limit of {}",
            state.config.max_push_batch
        )));
    }

    let results = state.store.push(entity, request.operations).await?;
    let rejected = results
        .iter()
        .filter(|outcome| matches!(outcome, PushOutcome::Rejected { .. }))
        .count();
    tracing::info!(
        entity = entity.as_str(),
        operations = count,
        rejected,
        "Applied push"
    );
    Ok(Json(PushResponse { results }))
}

#[derive(Debug, Deserialize)]
struct ChangesQuery {
    cursor: Option<String>,
    limit: Option<usize>,
}

async fn list_changes(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    Query(query): Query<ChangesQuery>,
) -> Result<Json<PullPage>, AppError> {
    let entity = parse_entity(&entity)?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, state.config.max_page_size);
    let cursor = query.cursor.as_deref().filter(|cursor| !cursor.is_empty());

    let page = state.store.pull(entity, cursor, limit).await?;
    tracing::debug!(
        entity = entity.as_str(),
        records = page.records.len(),
        has_more = page.has_more,
        "Served changes"
    );
    Ok(Json(page))
}

fn parse_entity(raw: &str) -> Result<EntityType, AppError> {
    raw.parse::<EntityType>().map_err(AppError::BadRequest)
}
