//! Pipeline prompts and model configuration rows.
//!
//! Prompts are read from the store at every use; there is no in-memory cache,
//! so a live edit takes effect on the next deck.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Known prompt stage names. Stages are rows, not variants, so operators can
/// add per-sector stages without a code change; these constants cover the
/// stages the pipeline itself consumes.
pub mod stages {
    pub const IMAGE_ANALYSIS: &str = "image_analysis";
    pub const OFFERING_EXTRACTION: &str = "offering_extraction";
    pub const STARTUP_NAME_EXTRACTION: &str = "startup_name_extraction";
    pub const SECTOR_CLASSIFICATION: &str = "sector_classification";
    pub const QUESTION_ANALYSIS: &str = "question_analysis";
    pub const SCORING_ANALYSIS: &str = "scoring_analysis";
    pub const RECOMMENDATIONS_EXTRACTION: &str = "recommendations_extraction";
    pub const KEY_POINTS_EXTRACTION: &str = "key_points_extraction";
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct PipelinePrompt {
    pub id: i64,
    pub stage_name: String,
    pub prompt_text: String,
    pub default_prompt_text: String,
    pub updated_at: DateTime<Utc>,
}

/// Which model slot a configuration row fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Vision,
    Text,
    Scoring,
    Science,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vision => "vision",
            Self::Text => "text",
            Self::Scoring => "scoring",
            Self::Science => "science",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "vision" => Some(Self::Vision),
            "text" => Some(Self::Text),
            "scoring" => Some(Self::Scoring),
            "science" => Some(Self::Science),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct ModelConfig {
    pub id: i64,
    pub kind: String,
    pub model_name: String,
    pub updated_at: DateTime<Utc>,
}
