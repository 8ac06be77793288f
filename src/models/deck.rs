//! Deck and project rows plus the visual-analysis cache entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Where a deck came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    UserUpload,
    DojoExperiment,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserUpload => "user_upload",
            Self::DojoExperiment => "dojo_experiment",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "dojo_experiment" => Self::DojoExperiment,
            _ => Self::UserUpload,
        }
    }
}

/// Deck processing lifecycle.
///
/// pending -> processing -> visual_complete -> completed | failed.
/// Exactly one terminal state after any processing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    VisualComplete,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::VisualComplete => "visual_complete",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse_status(s: &str) -> Self {
        match s {
            "pending" => Self::Pending,
            "processing" => Self::Processing,
            "visual_complete" => Self::VisualComplete,
            "completed" => Self::Completed,
            _ => Self::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// A pitch deck and its processing state.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct Deck {
    pub id: i64,
    pub company_id: String,
    pub filename: String,
    /// Path of the PDF relative to the shared storage root.
    pub file_path: String,
    pub data_source: String,
    pub processing_status: String,
    pub results_file_path: Option<String>,
    pub failure_reason: Option<String>,
    pub failed_pages: i64,
    pub created_at: DateTime<Utc>,
}

impl Deck {
    pub fn status(&self) -> ProcessingStatus {
        ProcessingStatus::parse_status(&self.processing_status)
    }

    /// Slug used for the slide image directory: filename minus extension,
    /// whitespace folded to '-'.
    pub fn deck_slug(&self) -> String {
        deck_slug(&self.filename)
    }
}

/// Derive the slide-directory slug from a PDF filename.
pub fn deck_slug(filename: &str) -> String {
    let stem = filename.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(filename);
    stem.split_whitespace().collect::<Vec<_>>().join("-")
}

/// Project row; access-control key for the orchestrator.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct Project {
    pub id: i64,
    pub company_id: String,
    pub company_name: String,
    pub created_at: DateTime<Utc>,
}

/// Visual-analysis cache row, UNIQUE on (deck_id, vision_model, prompt_hash).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct VisualCacheEntry {
    pub id: i64,
    pub deck_id: i64,
    pub vision_model: String,
    pub prompt_hash: String,
    pub analysis_result_json: String,
    pub created_at: DateTime<Utc>,
}
