//! Worker HTTP surface - health, model inventory, single-deck processing,
//! batch visual analysis and cooperative cancel.
//!
//! Health and inventory must stay responsive while a deck is in flight, so
//! they never touch the processor's job lock.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Serialize;
use std::sync::Arc;

use crate::WorkerState;
use crate::services::dispatch::{
    ProcessPdfRequest, ProcessPdfResponse, VisualBatchRequest, VisualBatchResponse,
};
use crate::services::model_runtime::ModelInfo;
use crate::utils::{ApiError, ApiResult};

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_s: u64,
    pub models_loaded: usize,
}

/// Worker liveness plus a model inventory count.
/// GET /api/health
#[utoipa::path(
    get,
    path = "/api/health",
    responses((status = 200, description = "Worker health", body = HealthResponse)),
    tag = "Worker"
)]
pub async fn health(State(state): State<Arc<WorkerState>>) -> Json<HealthResponse> {
    let models_loaded = match state.runtime.list_models().await {
        Ok(models) => models.len(),
        Err(e) => {
            tracing::warn!("Health check: model runtime unreachable: {}", e);
            0
        },
    };

    Json(HealthResponse {
        status: "ok",
        uptime_s: state.started_at.elapsed().as_secs(),
        models_loaded,
    })
}

/// Installed models on the runtime.
/// GET /api/models
#[utoipa::path(
    get,
    path = "/api/models",
    responses(
        (status = 200, description = "Model inventory", body = Vec<ModelInfo>),
        (status = 503, description = "Model runtime unavailable")
    ),
    tag = "Worker"
)]
pub async fn list_models(State(state): State<Arc<WorkerState>>) -> ApiResult<Json<Vec<ModelInfo>>> {
    let models = state.runtime.list_models().await.map_err(ApiError::from)?;
    Ok(Json(models))
}

/// Pull a model onto the runtime; long-running.
/// POST /api/models/:name
#[utoipa::path(
    post,
    path = "/api/models/{name}",
    params(("name" = String, Path, description = "Model name, e.g. gemma3:12b")),
    responses(
        (status = 200, description = "Model pulled"),
        (status = 503, description = "Model runtime unavailable")
    ),
    tag = "Worker"
)]
pub async fn pull_model(
    State(state): State<Arc<WorkerState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    tracing::info!("Pulling model '{}'", name);
    state.runtime.pull_model(&name).await.map_err(ApiError::from)?;
    Ok(Json(serde_json::json!({ "status": "pulled", "name": name })))
}

/// Remove a model from the runtime.
/// DELETE /api/models/:name
#[utoipa::path(
    delete,
    path = "/api/models/{name}",
    params(("name" = String, Path, description = "Model name")),
    responses(
        (status = 200, description = "Model deleted"),
        (status = 503, description = "Model runtime unavailable")
    ),
    tag = "Worker"
)]
pub async fn delete_model(
    State(state): State<Arc<WorkerState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    tracing::info!("Deleting model '{}'", name);
    state.runtime.delete_model(&name).await.map_err(ApiError::from)?;
    Ok(Json(serde_json::json!({ "status": "deleted", "name": name })))
}

/// Synchronous full-pipeline run for one deck. Serialized with any other
/// deck work; the connection stays open for the duration of the run.
/// POST /api/process-pdf
#[utoipa::path(
    post,
    path = "/api/process-pdf",
    request_body = ProcessPdfRequest,
    responses(
        (status = 200, description = "Deck processed", body = ProcessPdfResponse),
        (status = 500, description = "Pipeline failure; deck marked failed via callback")
    ),
    tag = "Worker"
)]
pub async fn process_pdf(
    State(state): State<Arc<WorkerState>>,
    Json(request): Json<ProcessPdfRequest>,
) -> ApiResult<Json<ProcessPdfResponse>> {
    let results_file_path = state.processor.process_deck(&request).await?;
    Ok(Json(ProcessPdfResponse { success: true, results_file_path: Some(results_file_path) }))
}

/// Start a visual-only batch; returns as soon as the ids are validated.
/// POST /api/run-visual-analysis-batch
#[utoipa::path(
    post,
    path = "/api/run-visual-analysis-batch",
    request_body = VisualBatchRequest,
    responses(
        (status = 202, description = "Batch started", body = VisualBatchResponse),
        (status = 409, description = "A batch is already running")
    ),
    tag = "Worker"
)]
pub async fn run_visual_analysis_batch(
    State(state): State<Arc<WorkerState>>,
    Json(request): Json<VisualBatchRequest>,
) -> ApiResult<(StatusCode, Json<VisualBatchResponse>)> {
    if request.deck_ids.is_empty() {
        return Err(ApiError::invalid_input("deck_ids must not be empty"));
    }

    let response = state.processor.submit_visual_batch(request).await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct CancelResponse {
    pub deck_id: i64,
    pub cancelled: bool,
}

/// Advisory cancel; takes effect after the current page or question.
/// POST /api/decks/:deck_id/cancel
#[utoipa::path(
    post,
    path = "/api/decks/{deck_id}/cancel",
    params(("deck_id" = i64, Path, description = "Deck ID")),
    responses((status = 200, description = "Cancel flag set if the deck was in flight", body = CancelResponse)),
    tag = "Worker"
)]
pub async fn cancel_deck(
    State(state): State<Arc<WorkerState>>,
    Path(deck_id): Path<i64>,
) -> Json<CancelResponse> {
    let cancelled = state.processor.cancel(deck_id);
    if cancelled {
        tracing::info!("Deck {}: cancel requested", deck_id);
    }
    Json(CancelResponse { deck_id, cancelled })
}
