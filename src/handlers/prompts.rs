//! Prompt registry handlers - live-editable pipeline prompts.

use axum::{
    Json,
    extract::{Path, State},
};
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

use crate::OrchestratorState;
use crate::models::PipelinePrompt;
use crate::utils::{ApiError, ApiResult};

/// List all prompt stages.
/// GET /api/prompts
#[utoipa::path(
    get,
    path = "/api/prompts",
    responses((status = 200, description = "All prompt stages", body = Vec<PipelinePrompt>)),
    tag = "Prompts"
)]
pub async fn list_prompts(
    State(state): State<Arc<OrchestratorState>>,
) -> ApiResult<Json<Vec<PipelinePrompt>>> {
    let prompts = state.prompt_registry.list_prompts().await?;
    Ok(Json(prompts))
}

/// Get one prompt stage.
/// GET /api/prompts/:stage
#[utoipa::path(
    get,
    path = "/api/prompts/{stage}",
    params(("stage" = String, Path, description = "Stage name")),
    responses(
        (status = 200, description = "Prompt", body = PipelinePrompt),
        (status = 404, description = "Unknown stage")
    ),
    tag = "Prompts"
)]
pub async fn get_prompt(
    State(state): State<Arc<OrchestratorState>>,
    Path(stage): Path<String>,
) -> ApiResult<Json<PipelinePrompt>> {
    let prompt = state.prompt_registry.get_prompt_row(&stage).await?;
    Ok(Json(prompt))
}

#[derive(Debug, Deserialize, Validate, utoipa::ToSchema)]
pub struct UpdatePromptRequest {
    #[validate(length(min = 1))]
    pub prompt_text: String,
}

/// Replace the live text of a stage; takes effect on the next deck.
/// PUT /api/prompts/:stage
#[utoipa::path(
    put,
    path = "/api/prompts/{stage}",
    params(("stage" = String, Path, description = "Stage name")),
    request_body = UpdatePromptRequest,
    responses(
        (status = 200, description = "Updated prompt", body = PipelinePrompt),
        (status = 404, description = "Unknown stage")
    ),
    tag = "Prompts"
)]
pub async fn update_prompt(
    State(state): State<Arc<OrchestratorState>>,
    Path(stage): Path<String>,
    Json(request): Json<UpdatePromptRequest>,
) -> ApiResult<Json<PipelinePrompt>> {
    request
        .validate()
        .map_err(|e| ApiError::invalid_input(e.to_string()))?;

    let prompt = state
        .prompt_registry
        .update_prompt(&stage, &request.prompt_text)
        .await?;
    tracing::info!("Prompt stage '{}' updated", stage);
    Ok(Json(prompt))
}

/// Restore a stage to its stored default text.
/// POST /api/prompts/:stage/reset
#[utoipa::path(
    post,
    path = "/api/prompts/{stage}/reset",
    params(("stage" = String, Path, description = "Stage name")),
    responses(
        (status = 200, description = "Prompt restored to default", body = PipelinePrompt),
        (status = 404, description = "Unknown stage")
    ),
    tag = "Prompts"
)]
pub async fn reset_prompt(
    State(state): State<Arc<OrchestratorState>>,
    Path(stage): Path<String>,
) -> ApiResult<Json<PipelinePrompt>> {
    let prompt = state.prompt_registry.reset_prompt(&stage).await?;
    tracing::info!("Prompt stage '{}' reset to default", stage);
    Ok(Json(prompt))
}
