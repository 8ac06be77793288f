//! Analysis templates: weighted chapters and questions, optionally scoped to
//! a sector. Templates are immutable in place; edits create new rows with an
//! incremented version.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Template selection policy for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TemplatePolicy {
    /// Always use the configured global template.
    SingleTemplate,
    /// Use the active default template of the classified sector.
    SectorClassified,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct Template {
    pub id: i64,
    pub sector_id: Option<i64>,
    pub name: String,
    pub description: String,
    pub version: i64,
    pub is_default: bool,
    /// JSON array of specialized-analysis kinds declared on this template.
    pub specialized_analyses: String,
    pub created_at: DateTime<Utc>,
}

impl Template {
    pub fn specialized_kinds(&self) -> Vec<String> {
        serde_json::from_str(&self.specialized_analyses).unwrap_or_default()
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct Chapter {
    pub id: i64,
    pub template_id: i64,
    pub name: String,
    pub description: String,
    pub order_index: i64,
    pub weight: f64,
}

impl Chapter {
    /// Stable key used in the result file's chapter_analysis map.
    pub fn chapter_key(&self) -> String {
        self.name.to_lowercase().split_whitespace().collect::<Vec<_>>().join("_")
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct Question {
    pub id: i64,
    pub chapter_id: i64,
    pub question_text: String,
    pub scoring_criteria: String,
    pub healthcare_focus: Option<String>,
    pub weight: f64,
    pub order_index: i64,
}

/// A template with its chapters and questions, both in order_index order.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TemplateDetail {
    pub template: Template,
    pub chapters: Vec<ChapterDetail>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChapterDetail {
    pub chapter: Chapter,
    pub questions: Vec<Question>,
}
