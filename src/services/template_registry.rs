//! Template registry - sectors, templates with their chapters and questions,
//! and the model configuration slots.

use sqlx::SqlitePool;

use crate::models::{
    Chapter, ChapterDetail, HealthcareSector, ModelConfig, ModelKind, Question, Template,
    TemplateDetail, TemplatePolicy,
};
use crate::utils::{ApiError, ApiResult};

pub struct TemplateRegistry {
    pool: SqlitePool,
}

impl TemplateRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn list_sectors(&self) -> ApiResult<Vec<HealthcareSector>> {
        let sectors = sqlx::query_as::<_, HealthcareSector>(
            "SELECT * FROM healthcare_sectors ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(sectors)
    }

    pub async fn get_sector(&self, sector_id: i64) -> ApiResult<HealthcareSector> {
        sqlx::query_as::<_, HealthcareSector>("SELECT * FROM healthcare_sectors WHERE id = ?")
            .bind(sector_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("sector {}", sector_id)))
    }

    pub async fn list_templates(&self, sector_id: Option<i64>) -> ApiResult<Vec<Template>> {
        let templates = match sector_id {
            Some(sector_id) => {
                sqlx::query_as::<_, Template>(
                    "SELECT * FROM templates WHERE sector_id = ? ORDER BY id ASC",
                )
                .bind(sector_id)
                .fetch_all(&self.pool)
                .await?
            },
            None => {
                sqlx::query_as::<_, Template>("SELECT * FROM templates ORDER BY id ASC")
                    .fetch_all(&self.pool)
                    .await?
            },
        };
        Ok(templates)
    }

    /// Full template with chapters and questions, both in order_index order.
    pub async fn get_template(&self, template_id: i64) -> ApiResult<TemplateDetail> {
        let template = sqlx::query_as::<_, Template>("SELECT * FROM templates WHERE id = ?")
            .bind(template_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("template {}", template_id)))?;

        let chapters = sqlx::query_as::<_, Chapter>(
            "SELECT * FROM chapters WHERE template_id = ? ORDER BY order_index ASC",
        )
        .bind(template_id)
        .fetch_all(&self.pool)
        .await?;

        let mut details = Vec::with_capacity(chapters.len());
        for chapter in chapters {
            let questions = sqlx::query_as::<_, Question>(
                "SELECT * FROM questions WHERE chapter_id = ? ORDER BY order_index ASC",
            )
            .bind(chapter.id)
            .fetch_all(&self.pool)
            .await?;
            details.push(ChapterDetail { chapter, questions });
        }

        Ok(TemplateDetail { template, chapters: details })
    }

    /// Resolve the template to execute for a run.
    ///
    /// Under `single_template` the cross-sector default is returned.
    /// Under `sector_classified` the active default of the given sector wins;
    /// a sector without its own default falls back to the cross-sector one.
    pub async fn get_active_template(
        &self,
        policy: TemplatePolicy,
        sector_id: Option<i64>,
    ) -> ApiResult<TemplateDetail> {
        let template = match policy {
            TemplatePolicy::SingleTemplate => self.global_default().await?,
            TemplatePolicy::SectorClassified => {
                let sector_default = match sector_id {
                    Some(sector_id) => {
                        sqlx::query_as::<_, Template>(
                            "SELECT * FROM templates WHERE sector_id = ? AND is_default = TRUE ORDER BY version DESC LIMIT 1",
                        )
                        .bind(sector_id)
                        .fetch_optional(&self.pool)
                        .await?
                    },
                    None => None,
                };
                match sector_default {
                    Some(t) => t,
                    None => self.global_default().await?,
                }
            },
        };

        self.get_template(template.id).await
    }

    async fn global_default(&self) -> ApiResult<Template> {
        sqlx::query_as::<_, Template>(
            "SELECT * FROM templates WHERE sector_id IS NULL AND is_default = TRUE ORDER BY version DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("no default template configured"))
    }

    /// Active model name for a slot.
    pub async fn get_model(&self, kind: ModelKind) -> ApiResult<String> {
        let config = sqlx::query_as::<_, ModelConfig>("SELECT * FROM model_configs WHERE kind = ?")
            .bind(kind.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("model config '{}'", kind.as_str())))?;
        Ok(config.model_name)
    }

    pub async fn set_model(&self, kind: ModelKind, model_name: &str) -> ApiResult<ModelConfig> {
        sqlx::query(
            r#"INSERT INTO model_configs (kind, model_name) VALUES (?, ?)
               ON CONFLICT(kind) DO UPDATE SET
               model_name = excluded.model_name,
               updated_at = CURRENT_TIMESTAMP"#,
        )
        .bind(kind.as_str())
        .bind(model_name)
        .execute(&self.pool)
        .await?;

        let config = sqlx::query_as::<_, ModelConfig>("SELECT * FROM model_configs WHERE kind = ?")
            .bind(kind.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_pool;

    async fn registry() -> TemplateRegistry {
        let pool = create_pool("sqlite::memory:").await.expect("pool");
        TemplateRegistry::new(pool)
    }

    #[tokio::test]
    async fn eight_sectors_are_seeded() {
        let registry = registry().await;
        let sectors = registry.list_sectors().await.unwrap();
        assert_eq!(sectors.len(), 8);
        assert!(sectors.iter().any(|s| s.display_name == "Digital Therapeutics & Mental Health"));
    }

    #[tokio::test]
    async fn standard_template_has_seven_chapters_of_four() {
        let registry = registry().await;
        let detail = registry
            .get_active_template(TemplatePolicy::SingleTemplate, None)
            .await
            .unwrap();

        assert_eq!(detail.chapters.len(), 7);
        for chapter in &detail.chapters {
            assert_eq!(chapter.questions.len(), 4, "chapter {}", chapter.chapter.name);
        }
    }

    #[tokio::test]
    async fn sector_default_wins_under_sector_classified_policy() {
        let registry = registry().await;
        let biotech = registry
            .list_sectors()
            .await
            .unwrap()
            .into_iter()
            .find(|s| s.name == "biotech_pharma")
            .unwrap();

        let detail = registry
            .get_active_template(TemplatePolicy::SectorClassified, Some(biotech.id))
            .await
            .unwrap();
        assert_eq!(detail.template.sector_id, Some(biotech.id));
        assert_eq!(detail.template.specialized_kinds().len(), 3);

        // A sector without its own default falls back to the global template.
        let telemedicine = registry
            .list_sectors()
            .await
            .unwrap()
            .into_iter()
            .find(|s| s.name == "telemedicine")
            .unwrap();
        let fallback = registry
            .get_active_template(TemplatePolicy::SectorClassified, Some(telemedicine.id))
            .await
            .unwrap();
        assert_eq!(fallback.template.sector_id, None);
    }

    #[tokio::test]
    async fn model_config_upsert_is_idempotent() {
        let registry = registry().await;

        registry.set_model(ModelKind::Vision, "llava:13b").await.unwrap();
        registry.set_model(ModelKind::Vision, "llava:13b").await.unwrap();

        assert_eq!(registry.get_model(ModelKind::Vision).await.unwrap(), "llava:13b");

        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM model_configs WHERE kind = 'vision'")
                .fetch_one(&registry.pool)
                .await
                .unwrap();
        assert_eq!(count, 1);
    }
}
