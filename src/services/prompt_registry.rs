//! Prompt registry - DB-backed read-through for pipeline prompts.
//!
//! Prompts are read at every use and never cached in memory, so an operator
//! edit lands on the very next deck. Unknown stage names are NotFound; there
//! is no built-in fallback text other than the stored default.

use sqlx::SqlitePool;

use crate::models::PipelinePrompt;
use crate::utils::{ApiError, ApiResult};

pub struct PromptRegistry {
    pool: SqlitePool,
}

impl PromptRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Current text for a stage.
    pub async fn get_prompt(&self, stage_name: &str) -> ApiResult<String> {
        let prompt = self.get_prompt_row(stage_name).await?;
        Ok(prompt.prompt_text)
    }

    pub async fn get_prompt_row(&self, stage_name: &str) -> ApiResult<PipelinePrompt> {
        sqlx::query_as::<_, PipelinePrompt>(
            "SELECT * FROM pipeline_prompts WHERE stage_name = ?",
        )
        .bind(stage_name)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("prompt stage '{}'", stage_name)))
    }

    pub async fn list_prompts(&self) -> ApiResult<Vec<PipelinePrompt>> {
        let prompts = sqlx::query_as::<_, PipelinePrompt>(
            "SELECT * FROM pipeline_prompts ORDER BY stage_name ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(prompts)
    }

    /// Replace the live text for a stage.
    pub async fn update_prompt(&self, stage_name: &str, prompt_text: &str) -> ApiResult<PipelinePrompt> {
        let result = sqlx::query(
            "UPDATE pipeline_prompts SET prompt_text = ?, updated_at = CURRENT_TIMESTAMP WHERE stage_name = ?",
        )
        .bind(prompt_text)
        .bind(stage_name)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ApiError::not_found(format!("prompt stage '{}'", stage_name)));
        }

        self.get_prompt_row(stage_name).await
    }

    /// Restore the stored default text verbatim.
    pub async fn reset_prompt(&self, stage_name: &str) -> ApiResult<PipelinePrompt> {
        let result = sqlx::query(
            "UPDATE pipeline_prompts SET prompt_text = default_prompt_text, updated_at = CURRENT_TIMESTAMP WHERE stage_name = ?",
        )
        .bind(stage_name)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ApiError::not_found(format!("prompt stage '{}'", stage_name)));
        }

        self.get_prompt_row(stage_name).await
    }
}
