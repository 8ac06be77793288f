//! The analysis result file - the authoritative artifact of a deck run.
//!
//! One typed representation, one serializer. The worker writes it atomically
//! to `results/job_{deck_id}_{epoch}_results.json`; the orchestrator only
//! ever reads it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

/// One slide's rendered image and description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SlideDescription {
    pub page_number: i64,
    /// Relative to the project directory: `analysis/<deck_slug>/slide_N.jpg`.
    pub slide_image_path: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProcessingMetadata {
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub vision_model: String,
    pub text_model: String,
    pub scoring_model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Classification {
    /// Sector display name.
    pub sector: String,
    pub sector_id: i64,
    pub confidence: f64,
    pub reasoning: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QuestionResult {
    pub question_text: String,
    /// Integer score in [0, 7]; 0 when scoring failed.
    pub score: i64,
    pub response: String,
    pub scoring_response: String,
    pub healthcare_focus: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChapterResult {
    pub name: String,
    pub description: String,
    /// Weighted mean of question scores, rounded to one decimal place.
    pub weighted_score: f64,
    pub total_questions: i64,
    pub questions: Vec<QuestionResult>,
}

/// Full analyzed output of one deck; schema is the external contract.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AnalysisResult {
    pub deck_id: i64,
    pub company_id: String,
    pub deck_name: String,
    pub model_version: String,
    pub confidence_score: f64,
    pub processing_metadata: ProcessingMetadata,
    pub company_offering: String,
    pub classification: Classification,
    pub visual_analysis_results: Vec<SlideDescription>,
    pub chapter_analysis: BTreeMap<String, ChapterResult>,
    /// Legacy consumers read chapter scores from this flat map.
    pub report_scores: BTreeMap<String, f64>,
    pub overall_score: f64,
    pub specialized_analysis: BTreeMap<String, String>,
    pub recommendations: Vec<String>,
    pub key_points: Vec<String>,
}

impl AnalysisResult {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Shape of `analysis_result_json` in the visual-analysis cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualCachePayload {
    pub visual_analysis_results: Vec<SlideDescription>,
}

/// Round to one decimal place for rollup serialization; internal math stays
/// at full precision.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
