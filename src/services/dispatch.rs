//! Orchestrator-to-worker dispatch.
//!
//! Deck processing runs for minutes, so the orchestrator never awaits the
//! worker inside a request handler: `dispatch_deck` spawns the call onto the
//! runtime and the worker reports the outcome through its callbacks. The
//! HTTP response duplicates what the callback already delivered.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::utils::{ApiError, ApiResult};

/// Wall-clock budget for one deck: ~30 pages of vision calls plus scoring.
const PROCESS_TIMEOUT: Duration = Duration::from_secs(15 * 60);

const BATCH_SUBMIT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ProcessPdfRequest {
    pub deck_id: i64,
    /// PDF path relative to the shared storage root.
    pub file_path: String,
    pub company_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ProcessPdfResponse {
    pub success: bool,
    pub results_file_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct VisualBatchRequest {
    pub deck_ids: Vec<i64>,
    /// Defaults to the configured vision model when omitted.
    pub vision_model: Option<String>,
    /// Defaults to the image_analysis prompt stage when omitted.
    pub image_prompt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct VisualBatchResponse {
    pub batch_id: String,
    pub accepted_ids: Vec<i64>,
}

/// HTTP client for the worker node.
pub struct WorkerDispatcher {
    base_url: String,
    http_client: Client,
}

impl WorkerDispatcher {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http_client = Client::builder()
            .build()
            .expect("Failed to create HTTP client");

        let base_url: String = base_url.into();
        Self { base_url: base_url.trim_end_matches('/').to_string(), http_client }
    }

    /// Synchronous full-pipeline run on the worker; multi-minute call.
    pub async fn process_pdf(&self, request: &ProcessPdfRequest) -> ApiResult<ProcessPdfResponse> {
        let response = self
            .http_client
            .post(format!("{}/api/process-pdf", self.base_url))
            .timeout(PROCESS_TIMEOUT)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ApiError::ModelTimeout(PROCESS_TIMEOUT.as_secs())
                } else {
                    ApiError::ModelUnavailable(format!("worker unreachable: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::internal(format!("worker {}: {}", status, text)));
        }

        response
            .json()
            .await
            .map_err(|e| ApiError::ParseFailure(format!("worker response: {}", e)))
    }

    /// Submit a visual-only batch; returns as soon as the worker accepts it.
    pub async fn run_visual_batch(
        &self,
        request: &VisualBatchRequest,
    ) -> ApiResult<VisualBatchResponse> {
        let response = self
            .http_client
            .post(format!("{}/api/run-visual-analysis-batch", self.base_url))
            .timeout(BATCH_SUBMIT_TIMEOUT)
            .json(request)
            .send()
            .await
            .map_err(|e| ApiError::ModelUnavailable(format!("worker unreachable: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::CONFLICT {
            return Err(ApiError::conflict("a visual batch is already running"));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::internal(format!("worker {}: {}", status, text)));
        }

        response
            .json()
            .await
            .map_err(|e| ApiError::ParseFailure(format!("worker response: {}", e)))
    }

    pub async fn health(&self) -> ApiResult<serde_json::Value> {
        let response = self
            .http_client
            .get(format!("{}/api/health", self.base_url))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| ApiError::ModelUnavailable(format!("worker unreachable: {}", e)))?;

        response
            .json()
            .await
            .map_err(|e| ApiError::ParseFailure(format!("worker health: {}", e)))
    }
}

/// Fire-and-forget dispatch: the handler returns immediately and the worker
/// callbacks carry the real outcome. Logging is the only follow-up here.
pub fn dispatch_deck(dispatcher: Arc<WorkerDispatcher>, request: ProcessPdfRequest) {
    tokio::spawn(async move {
        let deck_id = request.deck_id;
        match dispatcher.process_pdf(&request).await {
            Ok(response) if response.success => {
                tracing::info!(
                    "Deck {} dispatch finished: results at {:?}",
                    deck_id,
                    response.results_file_path
                );
            },
            Ok(_) => {
                tracing::warn!("Deck {} dispatch finished with failure status", deck_id);
            },
            Err(e) => {
                tracing::error!("Deck {} dispatch error: {}", deck_id, e);
            },
        }
    });
}
