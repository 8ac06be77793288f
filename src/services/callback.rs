//! Worker-to-orchestrator callbacks.
//!
//! The worker reports progress over HTTP: a progressive per-deck cache
//! callback during visual analysis and a terminal result callback per deck.
//! All callbacks are idempotent on the orchestrator side, so retrying is
//! always safe. After the final retry the result file on shared storage
//! remains the source of truth and the reconciler repairs the deck row.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;

use super::pipeline::result::SlideDescription;
use crate::utils::{ApiError, ApiResult};

/// Header carrying the node-to-node shared secret.
pub const INTERNAL_SECRET_HEADER: &str = "X-Internal-Secret";

const CALLBACK_TIMEOUT: Duration = Duration::from_secs(30);

/// Retries after the first attempt, with exponential backoff from 1s.
const CALLBACK_RETRIES: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct UpdateDeckResultsRequest {
    pub deck_id: i64,
    pub results_file_path: Option<String>,
    /// "completed" or "failed".
    pub status: String,
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub failed_pages: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct CacheVisualAnalysisRequest {
    pub deck_id: i64,
    pub visual_results: Vec<SlideDescription>,
    pub vision_model: String,
    /// Full prompt text; the orchestrator hashes it for the cache triple.
    pub prompt_used: String,
}

/// HTTP client for the orchestrator's internal endpoints.
pub struct OrchestratorCallback {
    base_url: String,
    shared_secret: String,
    http_client: Client,
}

impl OrchestratorCallback {
    pub fn new(base_url: impl Into<String>, shared_secret: impl Into<String>) -> Self {
        let http_client = Client::builder()
            .timeout(CALLBACK_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");

        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            shared_secret: shared_secret.into(),
            http_client,
        }
    }

    /// Terminal per-deck update; last-write-wins on the orchestrator.
    pub async fn update_deck_results(&self, request: &UpdateDeckResultsRequest) -> ApiResult<()> {
        self.post_with_retry("/api/internal/update-deck-results", request).await
    }

    /// Progressive per-deck cache callback; UPSERT on the orchestrator.
    pub async fn cache_visual_analysis(
        &self,
        request: &CacheVisualAnalysisRequest,
    ) -> ApiResult<()> {
        self.post_with_retry("/api/internal/cache-visual-analysis", request).await
    }

    async fn post_with_retry<T: Serialize>(&self, path: &str, body: &T) -> ApiResult<()> {
        let url = format!("{}{}", self.base_url, path);

        let mut last_error = None;
        for attempt in 0..=CALLBACK_RETRIES {
            match self.post_once(&url, body).await {
                Ok(()) => return Ok(()),
                // 4xx rejections are permanent; retrying cannot help.
                Err(e) if matches!(e.kind(), "invalid_input" | "unauthorized" | "not_found") => {
                    tracing::error!("Callback {} rejected: {}", path, e);
                    return Err(e);
                },
                Err(e) => {
                    tracing::warn!(
                        "Callback {} failed (attempt {}/{}): {}",
                        path,
                        attempt + 1,
                        CALLBACK_RETRIES + 1,
                        e
                    );
                    last_error = Some(e);
                    if attempt < CALLBACK_RETRIES {
                        sleep(Duration::from_secs(1 << attempt)).await;
                    }
                },
            }
        }

        Err(last_error.unwrap_or_else(|| ApiError::internal("callback failed")))
    }

    async fn post_once<T: Serialize>(&self, url: &str, body: &T) -> ApiResult<()> {
        let response = self
            .http_client
            .post(url)
            .header(INTERNAL_SECRET_HEADER, &self.shared_secret)
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::internal(format!("callback send: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let text = response.text().await.unwrap_or_default();
        let message = format!("callback {}: {}", status, text);
        match status.as_u16() {
            401 => Err(ApiError::unauthorized(message)),
            404 => Err(ApiError::not_found(message)),
            400..=499 => Err(ApiError::invalid_input(message)),
            _ => Err(ApiError::internal(message)),
        }
    }
}
