//! Template executor - answers and scores every question of the selected
//! template against the deck text, then rolls weighted scores up to chapter
//! and deck level.
//!
//! The deck text is the sole grounding; prompts never direct the model to
//! outside knowledge. Chapters run in order_index order, questions within
//! them likewise. A question that cannot be scored contributes 0 and never
//! aborts its chapter.

use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;

use super::result::{ChapterResult, QuestionResult, round1};
use super::session::DeckSession;
use crate::models::TemplateDetail;
use crate::services::model_runtime::{ModelRuntime, RuntimeOptions};
use crate::utils::{ApiError, ApiResult};

/// Per-question call timeout (response and scoring calls alike).
const QUESTION_TIMEOUT: Duration = Duration::from_secs(60);

/// Scoring runs at a fixed low temperature.
const SCORING_TEMPERATURE: f32 = 0.1;

/// Per-question lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionState {
    Pending,
    Responded,
    Scored,
    ScoringFailed,
}

/// Everything the executor needs besides the template and session.
pub struct ExecutorContext<'a> {
    pub runtime: &'a dyn ModelRuntime,
    pub text_model: &'a str,
    pub scoring_model: &'a str,
    /// `question_analysis` prompt template.
    pub question_prompt: &'a str,
    /// `scoring_analysis` prompt template.
    pub scoring_prompt: &'a str,
    pub num_ctx: u32,
}

/// Executed template with full-precision internal scores.
#[derive(Debug, Clone)]
pub struct TemplateOutcome {
    /// (chapter_key, rounded result) in chapter order.
    pub chapters: Vec<(String, ChapterResult)>,
    /// Weighted mean of full-precision chapter scores, rounded to 1 decimal.
    pub overall_score: f64,
}

static SCORE_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)score\s*[:\-]?\s*(\d+)").unwrap());
static SCORE_FRACTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s*/\s*7").unwrap());
static SCORE_BOLD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*\s*(\d+)\s*\*\*").unwrap());
static SCORE_BARE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(\d+)\s*$").unwrap());

/// Extract an integer score in [0, 7] from model output.
///
/// Accepts "Score: 5", "5/7", "**5**" and integer-only strings. Returns None
/// for anything else, including out-of-range integers and spelled-out
/// numbers; the caller records 0 in that case.
pub fn parse_score(raw: &str) -> Option<i64> {
    for pattern in [&SCORE_LABEL, &SCORE_FRACTION, &SCORE_BOLD, &SCORE_BARE] {
        if let Some(caps) = pattern.captures(raw) {
            if let Ok(value) = caps[1].parse::<i64>() {
                if (0..=7).contains(&value) {
                    return Some(value);
                }
                return None;
            }
        }
    }
    None
}

/// Weighted mean; 0 when the weights sum to nothing.
fn weighted_mean(pairs: &[(f64, f64)]) -> f64 {
    let total_weight: f64 = pairs.iter().map(|(w, _)| w).sum();
    if total_weight <= 0.0 {
        return 0.0;
    }
    pairs.iter().map(|(w, s)| w * s).sum::<f64>() / total_weight
}

/// Execute the template against the session's deck text.
pub async fn execute_template(
    ctx: &ExecutorContext<'_>,
    template: &TemplateDetail,
    session: &DeckSession,
) -> ApiResult<TemplateOutcome> {
    let pitch_deck_text = session.pitch_deck_text();

    let mut chapters = Vec::with_capacity(template.chapters.len());
    let mut chapter_scores: Vec<(f64, f64)> = Vec::with_capacity(template.chapters.len());

    for chapter_detail in &template.chapters {
        let chapter = &chapter_detail.chapter;
        let mut questions = Vec::with_capacity(chapter_detail.questions.len());
        let mut question_scores: Vec<(f64, f64)> = Vec::with_capacity(chapter_detail.questions.len());

        for question in &chapter_detail.questions {
            if session.cancelled() {
                return Err(ApiError::conflict("deck processing cancelled"));
            }

            let (result, state) = answer_and_score(ctx, question, &pitch_deck_text).await;
            tracing::debug!(
                "Deck {} chapter '{}' question {}: state {:?}, score {}",
                session.deck_id,
                chapter.name,
                question.order_index,
                state,
                result.score
            );

            question_scores.push((question.weight, result.score as f64));
            questions.push(result);
        }

        let chapter_score = weighted_mean(&question_scores);
        chapter_scores.push((chapter.weight, chapter_score));

        chapters.push((chapter.chapter_key(), ChapterResult {
            name: chapter.name.clone(),
            description: chapter.description.clone(),
            weighted_score: round1(chapter_score),
            total_questions: questions.len() as i64,
            questions,
        }));
    }

    let overall = weighted_mean(&chapter_scores);

    Ok(TemplateOutcome { chapters, overall_score: round1(overall) })
}

/// Two-call pattern: free-text response, then a scoring call over it.
async fn answer_and_score(
    ctx: &ExecutorContext<'_>,
    question: &crate::models::Question,
    pitch_deck_text: &str,
) -> (QuestionResult, QuestionState) {
    let response_prompt = ctx
        .question_prompt
        .replace("{question_text}", &question.question_text)
        .replace("{pitch_deck_text}", pitch_deck_text);

    let response_options = RuntimeOptions::default()
        .with_timeout(QUESTION_TIMEOUT)
        .with_num_ctx(ctx.num_ctx);

    let response = match ctx
        .runtime
        .complete(ctx.text_model, &response_prompt, &response_options)
        .await
    {
        Ok(text) => text.trim().to_string(),
        Err(e) => {
            tracing::warn!("Question response call failed: {}", e);
            return (
                QuestionResult {
                    question_text: question.question_text.clone(),
                    score: 0,
                    response: String::new(),
                    scoring_response: format!("response call failed: {}", e),
                    healthcare_focus: question.healthcare_focus.clone(),
                },
                QuestionState::ScoringFailed,
            );
        },
    };
    tracing::trace!("Question {}: {:?}", question.id, QuestionState::Responded);

    let scoring_prompt = ctx
        .scoring_prompt
        .replace("{question_text}", &question.question_text)
        .replace("{scoring_criteria}", &question.scoring_criteria)
        .replace("{response}", &response)
        .replace("{pitch_deck_text}", pitch_deck_text);

    let mut scoring_options = RuntimeOptions::default()
        .with_timeout(QUESTION_TIMEOUT)
        .with_num_ctx(ctx.num_ctx);
    scoring_options.temperature = SCORING_TEMPERATURE;

    let (score, scoring_response, state) = match ctx
        .runtime
        .complete(ctx.scoring_model, &scoring_prompt, &scoring_options)
        .await
    {
        Ok(raw) => {
            let raw = raw.trim().to_string();
            match parse_score(&raw) {
                Some(score) => (score, raw, QuestionState::Scored),
                // Unparseable score: record 0 and keep the raw output.
                None => (0, raw, QuestionState::ScoringFailed),
            }
        },
        Err(e) => {
            tracing::warn!("Scoring call failed: {}", e);
            (0, format!("scoring call failed: {}", e), QuestionState::ScoringFailed)
        },
    };

    (
        QuestionResult {
            question_text: question.question_text.clone(),
            score,
            response,
            scoring_response,
            healthcare_focus: question.healthcare_focus.clone(),
        },
        state,
    )
}
