//! Model runtime adapter - HTTP client for the local model server.
//!
//! Uniform call surface over an Ollama-compatible runtime: inventory
//! management plus vision and text generation. The worker is the only node
//! that talks to the runtime.

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-call options.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Context window; classification and scoring default to 32768.
    pub num_ctx: u32,
    pub temperature: f32,
    pub timeout: Duration,
    /// Ask the runtime to emit strict JSON.
    pub format_json: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            num_ctx: 32768,
            temperature: 0.2,
            timeout: Duration::from_secs(60),
            format_json: false,
        }
    }
}

impl RuntimeOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_num_ctx(mut self, num_ctx: u32) -> Self {
        self.num_ctx = num_ctx;
        self
    }

    pub fn json(mut self) -> Self {
        self.format_json = true;
        self
    }
}

/// Installed model as reported by the runtime.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub modified_at: Option<String>,
    #[serde(default)]
    pub digest: Option<String>,
}

/// Model runtime errors, mapped to stable kinds.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("Model runtime unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Model call timed out after {0}s")]
    ModelTimeout(u64),

    #[error("Bad request to model runtime: {0}")]
    BadRequest(String),

    #[error("Model runtime internal error: {0}")]
    Internal(String),
}

impl RuntimeError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ModelUnavailable(_) | Self::ModelTimeout(_))
    }
}

impl From<RuntimeError> for crate::utils::ApiError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::ModelUnavailable(m) => Self::ModelUnavailable(m),
            RuntimeError::ModelTimeout(s) => Self::ModelTimeout(s),
            RuntimeError::BadRequest(m) => Self::InvalidInput(m),
            RuntimeError::Internal(m) => Self::Internal(m),
        }
    }
}

/// Uniform surface over the local model server.
///
/// The seam exists so the pipeline can run against a deterministic stub in
/// tests; `OllamaRuntime` is the production implementation.
#[async_trait]
pub trait ModelRuntime: Send + Sync {
    async fn list_models(&self) -> Result<Vec<ModelInfo>, RuntimeError>;

    async fn pull_model(&self, name: &str) -> Result<(), RuntimeError>;

    async fn delete_model(&self, name: &str) -> Result<(), RuntimeError>;

    /// Describe an image with a vision model.
    async fn analyze_image(
        &self,
        model: &str,
        prompt: &str,
        image_bytes: &[u8],
        options: &RuntimeOptions,
    ) -> Result<String, RuntimeError>;

    /// Plain text completion.
    async fn complete(
        &self,
        model: &str,
        prompt: &str,
        options: &RuntimeOptions,
    ) -> Result<String, RuntimeError>;
}

/// HTTP implementation over an Ollama-compatible server.
pub struct OllamaRuntime {
    base_url: String,
    http_client: Client,
}

impl OllamaRuntime {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http_client = Client::builder()
            .build()
            .expect("Failed to create HTTP client");

        let base_url: String = base_url.into();
        Self { base_url: base_url.trim_end_matches('/').to_string(), http_client }
    }

    fn map_send_error(e: reqwest::Error, timeout: Duration) -> RuntimeError {
        if e.is_timeout() {
            RuntimeError::ModelTimeout(timeout.as_secs())
        } else if e.is_connect() {
            RuntimeError::ModelUnavailable(e.to_string())
        } else {
            RuntimeError::Internal(e.to_string())
        }
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, RuntimeError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
        if status == reqwest::StatusCode::NOT_FOUND {
            Err(RuntimeError::ModelUnavailable(format!("model not found: {}", body)))
        } else if status.is_client_error() {
            Err(RuntimeError::BadRequest(format!("{}: {}", status, body)))
        } else {
            Err(RuntimeError::Internal(format!("{}: {}", status, body)))
        }
    }

    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        images: Option<Vec<String>>,
        options: &RuntimeOptions,
    ) -> Result<String, RuntimeError> {
        let request = GenerateRequest {
            model: model.to_string(),
            prompt: prompt.to_string(),
            images,
            stream: false,
            format: options.format_json.then(|| "json".to_string()),
            options: GenerateOptions {
                num_ctx: options.num_ctx,
                temperature: options.temperature,
            },
        };

        tracing::debug!("Model runtime generate: model={} num_ctx={}", model, options.num_ctx);

        let response = self
            .http_client
            .post(format!("{}/api/generate", self.base_url))
            .timeout(options.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| Self::map_send_error(e, options.timeout))?;

        let response = Self::check_status(response).await?;
        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| RuntimeError::Internal(format!("malformed runtime response: {}", e)))?;

        Ok(body.response)
    }
}

#[async_trait]
impl ModelRuntime for OllamaRuntime {
    async fn list_models(&self) -> Result<Vec<ModelInfo>, RuntimeError> {
        let timeout = Duration::from_secs(10);
        let response = self
            .http_client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Self::map_send_error(e, timeout))?;

        let response = Self::check_status(response).await?;
        let body: TagsResponse = response
            .json()
            .await
            .map_err(|e| RuntimeError::Internal(format!("malformed tags response: {}", e)))?;

        Ok(body.models)
    }

    async fn pull_model(&self, name: &str) -> Result<(), RuntimeError> {
        // Model pulls download gigabytes; give them the full five minutes.
        let timeout = Duration::from_secs(300);
        let response = self
            .http_client
            .post(format!("{}/api/pull", self.base_url))
            .timeout(timeout)
            .json(&serde_json::json!({ "name": name, "stream": false }))
            .send()
            .await
            .map_err(|e| Self::map_send_error(e, timeout))?;

        Self::check_status(response).await.map(|_| ())
    }

    async fn delete_model(&self, name: &str) -> Result<(), RuntimeError> {
        let timeout = Duration::from_secs(30);
        let response = self
            .http_client
            .delete(format!("{}/api/delete", self.base_url))
            .timeout(timeout)
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await
            .map_err(|e| Self::map_send_error(e, timeout))?;

        Self::check_status(response).await.map(|_| ())
    }

    async fn analyze_image(
        &self,
        model: &str,
        prompt: &str,
        image_bytes: &[u8],
        options: &RuntimeOptions,
    ) -> Result<String, RuntimeError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(image_bytes);
        self.generate(model, prompt, Some(vec![encoded]), options).await
    }

    async fn complete(
        &self,
        model: &str,
        prompt: &str,
        options: &RuntimeOptions,
    ) -> Result<String, RuntimeError> {
        self.generate(model, prompt, None, options).await
    }
}

// ============================================================================
// Runtime API Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    images: Option<Vec<String>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<String>,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    num_ctx: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
}
