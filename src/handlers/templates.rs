//! Template registry handlers - sectors, templates and model configuration.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use std::sync::Arc;

use crate::OrchestratorState;
use crate::models::{HealthcareSector, ModelConfig, ModelKind, Template, TemplateDetail};
use crate::utils::{ApiError, ApiResult};

/// The eight healthcare sectors.
/// GET /api/sectors
#[utoipa::path(
    get,
    path = "/api/sectors",
    responses((status = 200, description = "All sectors", body = Vec<HealthcareSector>)),
    tag = "Templates"
)]
pub async fn list_sectors(
    State(state): State<Arc<OrchestratorState>>,
) -> ApiResult<Json<Vec<HealthcareSector>>> {
    let sectors = state.template_registry.list_sectors().await?;
    Ok(Json(sectors))
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ListTemplatesQuery {
    pub sector_id: Option<i64>,
}

/// List templates, optionally restricted to one sector.
/// GET /api/templates
#[utoipa::path(
    get,
    path = "/api/templates",
    params(ListTemplatesQuery),
    responses((status = 200, description = "Templates", body = Vec<Template>)),
    tag = "Templates"
)]
pub async fn list_templates(
    State(state): State<Arc<OrchestratorState>>,
    Query(query): Query<ListTemplatesQuery>,
) -> ApiResult<Json<Vec<Template>>> {
    let templates = state.template_registry.list_templates(query.sector_id).await?;
    Ok(Json(templates))
}

/// One template with chapters and questions in execution order.
/// GET /api/templates/:id
#[utoipa::path(
    get,
    path = "/api/templates/{id}",
    params(("id" = i64, Path, description = "Template ID")),
    responses(
        (status = 200, description = "Template detail", body = TemplateDetail),
        (status = 404, description = "Unknown template")
    ),
    tag = "Templates"
)]
pub async fn get_template(
    State(state): State<Arc<OrchestratorState>>,
    Path(template_id): Path<i64>,
) -> ApiResult<Json<TemplateDetail>> {
    let detail = state.template_registry.get_template(template_id).await?;
    Ok(Json(detail))
}

fn parse_kind(kind: &str) -> ApiResult<ModelKind> {
    ModelKind::parse(kind)
        .ok_or_else(|| ApiError::invalid_input(format!("unknown model kind '{}'", kind)))
}

/// Active model for a slot (vision|text|scoring|science).
/// GET /api/model-configs/:kind
#[utoipa::path(
    get,
    path = "/api/model-configs/{kind}",
    params(("kind" = String, Path, description = "vision | text | scoring | science")),
    responses(
        (status = 200, description = "Model name", body = String),
        (status = 400, description = "Unknown kind")
    ),
    tag = "Templates"
)]
pub async fn get_model_config(
    State(state): State<Arc<OrchestratorState>>,
    Path(kind): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let kind = parse_kind(&kind)?;
    let model_name = state.template_registry.get_model(kind).await?;
    Ok(Json(serde_json::json!({ "kind": kind.as_str(), "model_name": model_name })))
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct SetModelConfigRequest {
    pub model_name: String,
}

/// Point a slot at a different model.
/// PUT /api/model-configs/:kind
#[utoipa::path(
    put,
    path = "/api/model-configs/{kind}",
    params(("kind" = String, Path, description = "vision | text | scoring | science")),
    request_body = SetModelConfigRequest,
    responses(
        (status = 200, description = "Updated config", body = ModelConfig),
        (status = 400, description = "Unknown kind or empty model name")
    ),
    tag = "Templates"
)]
pub async fn set_model_config(
    State(state): State<Arc<OrchestratorState>>,
    Path(kind): Path<String>,
    Json(request): Json<SetModelConfigRequest>,
) -> ApiResult<Json<ModelConfig>> {
    let kind = parse_kind(&kind)?;
    let model_name = request.model_name.trim();
    if model_name.is_empty() {
        return Err(ApiError::invalid_input("model_name must not be empty"));
    }

    let config = state.template_registry.set_model(kind, model_name).await?;
    tracing::info!("Model config '{}' set to '{}'", config.kind, config.model_name);
    Ok(Json(config))
}
