//! Internal callback handlers - the worker reports progress here.
//!
//! Both endpoints sit behind the shared-secret middleware and are idempotent
//! so the worker can retry freely: deck updates are last-write-wins, cache
//! writes are UPSERTs on the unique triple.

use axum::{Json, extract::State};
use serde::Serialize;
use std::sync::Arc;

use crate::OrchestratorState;
use crate::models::ProcessingStatus;
use crate::services::callback::{CacheVisualAnalysisRequest, UpdateDeckResultsRequest};
use crate::services::pipeline::{VisualCachePayload, prompt_hash};
use crate::utils::{ApiError, ApiResult};

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct InternalAck {
    pub ok: bool,
}

/// Terminal per-deck update from the worker.
/// POST /api/internal/update-deck-results
#[utoipa::path(
    post,
    path = "/api/internal/update-deck-results",
    request_body = UpdateDeckResultsRequest,
    responses(
        (status = 200, description = "Deck row updated", body = InternalAck),
        (status = 400, description = "Not a terminal status"),
        (status = 404, description = "Unknown deck")
    ),
    tag = "Internal"
)]
pub async fn update_deck_results(
    State(state): State<Arc<OrchestratorState>>,
    Json(request): Json<UpdateDeckResultsRequest>,
) -> ApiResult<Json<InternalAck>> {
    let status = match request.status.as_str() {
        "completed" => ProcessingStatus::Completed,
        "failed" => ProcessingStatus::Failed,
        other => {
            return Err(ApiError::invalid_input(format!(
                "status must be completed|failed, got '{}'",
                other
            )));
        },
    };

    if status == ProcessingStatus::Completed && request.results_file_path.is_none() {
        return Err(ApiError::invalid_input("completed decks need a results_file_path"));
    }

    state
        .deck_repo
        .apply_result(
            request.deck_id,
            status,
            request.results_file_path.as_deref(),
            request.failure_reason.as_deref(),
            request.failed_pages,
        )
        .await?;

    tracing::info!(
        "Deck {}: terminal status '{}' applied via callback",
        request.deck_id,
        request.status
    );

    Ok(Json(InternalAck { ok: true }))
}

/// Progressive per-deck visual cache write during a batch (or single run).
/// POST /api/internal/cache-visual-analysis
#[utoipa::path(
    post,
    path = "/api/internal/cache-visual-analysis",
    request_body = CacheVisualAnalysisRequest,
    responses(
        (status = 200, description = "Cache row upserted", body = InternalAck)
    ),
    tag = "Internal"
)]
pub async fn cache_visual_analysis(
    State(state): State<Arc<OrchestratorState>>,
    Json(request): Json<CacheVisualAnalysisRequest>,
) -> ApiResult<Json<InternalAck>> {
    let payload = VisualCachePayload { visual_analysis_results: request.visual_results };
    let json = serde_json::to_string(&payload)?;

    state
        .cache_repo
        .upsert(
            request.deck_id,
            &request.vision_model,
            &prompt_hash(&request.prompt_used),
            &json,
        )
        .await?;

    // Promote processing decks; terminal or pending decks are untouched.
    state.deck_repo.mark_visual_complete(request.deck_id).await?;

    tracing::info!(
        "Deck {}: visual analysis cached ({} slides)",
        request.deck_id,
        payload.visual_analysis_results.len()
    );

    Ok(Json(InternalAck { ok: true }))
}
