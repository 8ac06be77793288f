//! Repositories for deck rows and their derived artifacts: the
//! visual-analysis cache and classification records.
//!
//! The orchestrator owns deck-row writes (directly or via internal
//! callbacks); the worker writes cache rows and classification records.

use sqlx::SqlitePool;

use crate::models::{ClassificationRecord, DataSource, Deck, ProcessingStatus, Project, VisualCacheEntry};
use crate::utils::{ApiError, ApiResult};

// ============================================================================
// Decks and projects
// ============================================================================

pub struct DeckRepository {
    pool: SqlitePool,
}

impl DeckRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Register an uploaded deck, creating the owning project if needed.
    pub async fn create_deck(
        &self,
        company_id: &str,
        company_name: &str,
        filename: &str,
        file_path: &str,
        data_source: DataSource,
    ) -> ApiResult<Deck> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"INSERT INTO projects (company_id, company_name) VALUES (?, ?)
               ON CONFLICT(company_id) DO NOTHING"#,
        )
        .bind(company_id)
        .bind(company_name)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query(
            r#"INSERT INTO decks (company_id, filename, file_path, data_source, processing_status)
               VALUES (?, ?, ?, ?, 'pending')"#,
        )
        .bind(company_id)
        .bind(filename)
        .bind(file_path)
        .bind(data_source.as_str())
        .execute(&mut *tx)
        .await?;

        let id = result.last_insert_rowid();
        tx.commit().await?;

        self.get_deck(id).await
    }

    pub async fn get_deck(&self, deck_id: i64) -> ApiResult<Deck> {
        sqlx::query_as::<_, Deck>("SELECT * FROM decks WHERE id = ?")
            .bind(deck_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("deck {}", deck_id)))
    }

    pub async fn list_decks(&self, company_id: Option<&str>) -> ApiResult<Vec<Deck>> {
        let decks = match company_id {
            Some(company_id) => {
                sqlx::query_as::<_, Deck>(
                    "SELECT * FROM decks WHERE company_id = ? ORDER BY id ASC",
                )
                .bind(company_id)
                .fetch_all(&self.pool)
                .await?
            },
            None => {
                sqlx::query_as::<_, Deck>("SELECT * FROM decks ORDER BY id ASC")
                    .fetch_all(&self.pool)
                    .await?
            },
        };
        Ok(decks)
    }

    pub async fn get_project(&self, company_id: &str) -> ApiResult<Project> {
        sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE company_id = ?")
            .bind(company_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("project '{}'", company_id)))
    }

    /// Move a deck into `processing` ahead of dispatch.
    pub async fn mark_processing(&self, deck_id: i64) -> ApiResult<()> {
        let result = sqlx::query(
            r#"UPDATE decks SET processing_status = 'processing',
               results_file_path = NULL, failure_reason = NULL, failed_pages = 0
               WHERE id = ?"#,
        )
        .bind(deck_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ApiError::not_found(format!("deck {}", deck_id)));
        }
        Ok(())
    }

    /// Promote `processing` to `visual_complete`; a no-op in any other state
    /// so late or duplicate callbacks cannot regress a terminal deck.
    pub async fn mark_visual_complete(&self, deck_id: i64) -> ApiResult<()> {
        sqlx::query(
            r#"UPDATE decks SET processing_status = 'visual_complete'
               WHERE id = ? AND processing_status = 'processing'"#,
        )
        .bind(deck_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Terminal update from the worker callback; last-write-wins per deck.
    /// `results_file_path` is persisted only for completed decks.
    pub async fn apply_result(
        &self,
        deck_id: i64,
        status: ProcessingStatus,
        results_file_path: Option<&str>,
        failure_reason: Option<&str>,
        failed_pages: i64,
    ) -> ApiResult<()> {
        if !status.is_terminal() {
            return Err(ApiError::invalid_input(format!(
                "status '{}' is not terminal",
                status.as_str()
            )));
        }

        let results = match status {
            ProcessingStatus::Completed => results_file_path,
            _ => None,
        };

        let result = sqlx::query(
            r#"UPDATE decks SET processing_status = ?, results_file_path = ?,
               failure_reason = ?, failed_pages = ?
               WHERE id = ?"#,
        )
        .bind(status.as_str())
        .bind(results)
        .bind(failure_reason)
        .bind(failed_pages)
        .bind(deck_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ApiError::not_found(format!("deck {}", deck_id)));
        }
        Ok(())
    }
}

// ============================================================================
// Visual-analysis cache
// ============================================================================

pub struct VisualCacheRepository {
    pool: SqlitePool,
}

impl VisualCacheRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// UPSERT on the unique (deck_id, vision_model, prompt_hash) triple.
    pub async fn upsert(
        &self,
        deck_id: i64,
        vision_model: &str,
        prompt_hash: &str,
        analysis_result_json: &str,
    ) -> ApiResult<()> {
        sqlx::query(
            r#"INSERT INTO visual_analysis_cache
               (deck_id, vision_model, prompt_hash, analysis_result_json)
               VALUES (?, ?, ?, ?)
               ON CONFLICT(deck_id, vision_model, prompt_hash) DO UPDATE SET
               analysis_result_json = excluded.analysis_result_json"#,
        )
        .bind(deck_id)
        .bind(vision_model)
        .bind(prompt_hash)
        .bind(analysis_result_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(
        &self,
        deck_id: i64,
        vision_model: &str,
        prompt_hash: &str,
    ) -> ApiResult<Option<VisualCacheEntry>> {
        let entry = sqlx::query_as::<_, VisualCacheEntry>(
            r#"SELECT * FROM visual_analysis_cache
               WHERE deck_id = ? AND vision_model = ? AND prompt_hash = ?"#,
        )
        .bind(deck_id)
        .bind(vision_model)
        .bind(prompt_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(entry)
    }

    /// Deck ids from `deck_ids` that have at least one cache row. Front-ends
    /// poll this during a batch; the count is monotonically non-decreasing.
    pub async fn cached_deck_ids(&self, deck_ids: &[i64]) -> ApiResult<Vec<i64>> {
        let mut cached = Vec::new();
        for deck_id in deck_ids {
            let present: Option<i64> = sqlx::query_scalar(
                "SELECT 1 FROM visual_analysis_cache WHERE deck_id = ? LIMIT 1",
            )
            .bind(deck_id)
            .fetch_optional(&self.pool)
            .await?;
            if present.is_some() {
                cached.push(*deck_id);
            }
        }
        Ok(cached)
    }
}

// ============================================================================
// Classification records
// ============================================================================

pub struct ClassificationRepository {
    pool: SqlitePool,
}

impl ClassificationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// One record per deck; re-runs overwrite.
    pub async fn upsert(
        &self,
        deck_id: i64,
        sector_id: i64,
        confidence: f64,
        reasoning: &str,
        template_id: Option<i64>,
    ) -> ApiResult<()> {
        sqlx::query(
            r#"INSERT INTO classification_records
               (deck_id, sector_id, confidence, reasoning, template_id)
               VALUES (?, ?, ?, ?, ?)
               ON CONFLICT(deck_id) DO UPDATE SET
               sector_id = excluded.sector_id,
               confidence = excluded.confidence,
               reasoning = excluded.reasoning,
               template_id = excluded.template_id"#,
        )
        .bind(deck_id)
        .bind(sector_id)
        .bind(confidence)
        .bind(reasoning)
        .bind(template_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, deck_id: i64) -> ApiResult<Option<ClassificationRecord>> {
        let record = sqlx::query_as::<_, ClassificationRecord>(
            "SELECT * FROM classification_records WHERE deck_id = ?",
        )
        .bind(deck_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }
}
