//! Deck handlers - upload events, dispatch, progress and results.
//!
//! Dispatch never blocks the event loop: the worker call is spawned onto the
//! runtime and progress flows back through the internal callbacks.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

use crate::OrchestratorState;
use crate::models::{ClassificationRecord, DataSource, Deck, ProcessingStatus};
use crate::services::dispatch::{self, ProcessPdfRequest, VisualBatchRequest, VisualBatchResponse};
use crate::services::pipeline::AnalysisResult;
use crate::utils::{ApiError, ApiResult};

#[derive(Debug, Deserialize, Validate, utoipa::ToSchema)]
pub struct CreateDeckRequest {
    #[validate(length(min = 1, max = 64))]
    pub company_id: String,
    #[validate(length(min = 1, max = 256))]
    pub company_name: Option<String>,
    #[validate(length(min = 1, max = 256))]
    pub filename: String,
    /// PDF bytes, base64-encoded by the upload front.
    pub pdf_base64: String,
    pub data_source: Option<DataSource>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct DeckStatusResponse {
    pub deck_id: i64,
    pub processing_status: String,
    pub visual_analysis_completed: bool,
    pub failed_pages: i64,
    pub failure_reason: Option<String>,
    pub results_file_path: Option<String>,
    /// Present once the worker has classified the deck; available to polling
    /// fronts before the result file lands.
    pub classification: Option<ClassificationRecord>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct DispatchResponse {
    pub deck_id: i64,
    pub status: String,
    /// Suggested front-end polling interval in seconds.
    pub poll_interval_s: u64,
}

/// Register an uploaded deck: write the PDF to shared storage, create the row.
/// POST /api/decks
#[utoipa::path(
    post,
    path = "/api/decks",
    request_body = CreateDeckRequest,
    responses(
        (status = 201, description = "Deck registered", body = Deck),
        (status = 400, description = "Invalid upload")
    ),
    tag = "Decks"
)]
pub async fn create_deck(
    State(state): State<Arc<OrchestratorState>>,
    Json(request): Json<CreateDeckRequest>,
) -> ApiResult<(StatusCode, Json<Deck>)> {
    request
        .validate()
        .map_err(|e| ApiError::invalid_input(e.to_string()))?;

    if !request.filename.to_lowercase().ends_with(".pdf") {
        return Err(ApiError::invalid_input("only PDF uploads are accepted"));
    }

    let pdf_bytes = base64::engine::general_purpose::STANDARD
        .decode(request.pdf_base64.trim())
        .map_err(|e| ApiError::invalid_input(format!("pdf_base64: {}", e)))?;
    if pdf_bytes.is_empty() {
        return Err(ApiError::invalid_input("empty PDF payload"));
    }

    let absolute = state.storage.upload_path(&request.company_id, &request.filename)?;

    // PDFs can be megabytes on a network mount; keep the write off the
    // event loop.
    let storage = state.storage.clone();
    let write_path = absolute.clone();
    tokio::task::spawn_blocking(move || storage.write_atomic(&write_path, &pdf_bytes))
        .await
        .map_err(|e| ApiError::internal(format!("upload write task: {}", e)))??;

    let relative = absolute
        .strip_prefix(state.storage.root())
        .map_err(|_| ApiError::internal("upload path escaped storage root"))?
        .to_string_lossy()
        .to_string();

    let company_name = request
        .company_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| request.company_id.clone());

    let deck = state
        .deck_repo
        .create_deck(
            &request.company_id,
            &company_name,
            &request.filename,
            &relative,
            request.data_source.unwrap_or(DataSource::UserUpload),
        )
        .await?;

    tracing::info!("Deck {} registered for company '{}'", deck.id, deck.company_id);
    Ok((StatusCode::CREATED, Json(deck)))
}

/// Dispatch a deck to the worker; returns immediately.
/// POST /api/decks/:id/process
#[utoipa::path(
    post,
    path = "/api/decks/{id}/process",
    params(("id" = i64, Path, description = "Deck ID")),
    responses(
        (status = 202, description = "Dispatched to the worker", body = DispatchResponse),
        (status = 404, description = "Unknown deck"),
        (status = 409, description = "Deck already processing")
    ),
    tag = "Decks"
)]
pub async fn process_deck(
    State(state): State<Arc<OrchestratorState>>,
    Path(deck_id): Path<i64>,
) -> ApiResult<(StatusCode, Json<DispatchResponse>)> {
    let deck = state.deck_repo.get_deck(deck_id).await?;

    if matches!(deck.status(), ProcessingStatus::Processing | ProcessingStatus::VisualComplete) {
        return Err(ApiError::conflict(format!(
            "deck {} is already {}",
            deck_id, deck.processing_status
        )));
    }

    state.deck_repo.mark_processing(deck_id).await?;

    dispatch::dispatch_deck(Arc::clone(&state.dispatcher), ProcessPdfRequest {
        deck_id,
        file_path: deck.file_path.clone(),
        company_id: deck.company_id.clone(),
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(DispatchResponse {
            deck_id,
            status: "dispatched".to_string(),
            poll_interval_s: state.batch_poll_interval_s,
        }),
    ))
}

/// Deck progress for polling fronts.
/// GET /api/decks/:id/status
#[utoipa::path(
    get,
    path = "/api/decks/{id}/status",
    params(("id" = i64, Path, description = "Deck ID")),
    responses(
        (status = 200, description = "Deck status", body = DeckStatusResponse),
        (status = 404, description = "Unknown deck")
    ),
    tag = "Decks"
)]
pub async fn get_deck_status(
    State(state): State<Arc<OrchestratorState>>,
    Path(deck_id): Path<i64>,
) -> ApiResult<Json<DeckStatusResponse>> {
    let deck = state.deck_repo.get_deck(deck_id).await?;

    let visual_analysis_completed = matches!(
        deck.status(),
        ProcessingStatus::VisualComplete | ProcessingStatus::Completed
    ) || !state.cache_repo.cached_deck_ids(&[deck_id]).await?.is_empty();

    let classification = state.classification_repo.get(deck_id).await?;

    Ok(Json(DeckStatusResponse {
        deck_id: deck.id,
        processing_status: deck.processing_status,
        visual_analysis_completed,
        failed_pages: deck.failed_pages,
        failure_reason: deck.failure_reason,
        results_file_path: deck.results_file_path,
        classification,
    }))
}

/// Full analysis result of a completed deck, read from shared storage.
/// GET /api/decks/:id/results
#[utoipa::path(
    get,
    path = "/api/decks/{id}/results",
    params(("id" = i64, Path, description = "Deck ID")),
    responses(
        (status = 200, description = "Analysis result", body = AnalysisResult),
        (status = 404, description = "Deck not completed or result file missing")
    ),
    tag = "Decks"
)]
pub async fn get_deck_results(
    State(state): State<Arc<OrchestratorState>>,
    Path(deck_id): Path<i64>,
) -> ApiResult<Json<AnalysisResult>> {
    let deck = state.deck_repo.get_deck(deck_id).await?;

    let relative = match (deck.status(), deck.results_file_path.as_deref()) {
        (ProcessingStatus::Completed, Some(path)) => path.to_string(),
        _ => {
            return Err(ApiError::not_found(format!(
                "deck {} has no results (status '{}')",
                deck_id, deck.processing_status
            )));
        },
    };

    let absolute = state.storage.resolve(&relative)?;
    let bytes = tokio::fs::read(&absolute)
        .await
        .map_err(|e| ApiError::storage_error(format!("read {:?}: {}", absolute, e)))?;
    let result: AnalysisResult = serde_json::from_slice(&bytes)?;

    Ok(Json(result))
}

/// List decks, optionally for one company.
/// GET /api/decks
#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ListDecksQuery {
    pub company_id: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/decks",
    params(ListDecksQuery),
    responses((status = 200, description = "Decks", body = Vec<Deck>)),
    tag = "Decks"
)]
pub async fn list_decks(
    State(state): State<Arc<OrchestratorState>>,
    Query(query): Query<ListDecksQuery>,
) -> ApiResult<Json<Vec<Deck>>> {
    let decks = state.deck_repo.list_decks(query.company_id.as_deref()).await?;
    Ok(Json(decks))
}

// ============================================================================
// Batch visual analysis
// ============================================================================

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct VisualCacheSampleQuery {
    /// Comma-separated deck ids.
    pub ids: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct VisualCacheSampleResponse {
    pub requested: usize,
    pub cached_count: usize,
    pub cached_ids: Vec<i64>,
}

/// Which of the given decks already have cached visual analysis. During a
/// batch the cached count only ever grows.
/// GET /api/decks/visual-cache/sample?ids=1,2,3
#[utoipa::path(
    get,
    path = "/api/decks/visual-cache/sample",
    params(VisualCacheSampleQuery),
    responses((status = 200, description = "Cache sample", body = VisualCacheSampleResponse)),
    tag = "Decks"
)]
pub async fn visual_cache_sample(
    State(state): State<Arc<OrchestratorState>>,
    Query(query): Query<VisualCacheSampleQuery>,
) -> ApiResult<Json<VisualCacheSampleResponse>> {
    let ids: Vec<i64> = query
        .ids
        .split(',')
        .filter_map(|part| part.trim().parse().ok())
        .collect();
    if ids.is_empty() {
        return Err(ApiError::invalid_input("ids must be a comma-separated list of deck ids"));
    }

    let cached_ids = state.cache_repo.cached_deck_ids(&ids).await?;
    Ok(Json(VisualCacheSampleResponse {
        requested: ids.len(),
        cached_count: cached_ids.len(),
        cached_ids,
    }))
}

/// Forward a visual-only batch to the worker.
/// POST /api/decks/run-visual-batch
#[utoipa::path(
    post,
    path = "/api/decks/run-visual-batch",
    request_body = VisualBatchRequest,
    responses(
        (status = 202, description = "Batch accepted", body = VisualBatchResponse),
        (status = 409, description = "A batch is already running")
    ),
    tag = "Decks"
)]
pub async fn run_visual_batch(
    State(state): State<Arc<OrchestratorState>>,
    Json(request): Json<VisualBatchRequest>,
) -> ApiResult<(StatusCode, Json<VisualBatchResponse>)> {
    if request.deck_ids.is_empty() {
        return Err(ApiError::invalid_input("deck_ids must not be empty"));
    }

    let response = state.dispatcher.run_visual_batch(&request).await?;

    // Accepted decks move to processing so the progressive callbacks can
    // promote them to visual_complete as they finish.
    for deck_id in &response.accepted_ids {
        if let Err(e) = state.deck_repo.mark_processing(*deck_id).await {
            tracing::warn!("Batch: could not mark deck {} processing: {}", deck_id, e);
        }
    }

    Ok((StatusCode::ACCEPTED, Json(response)))
}
