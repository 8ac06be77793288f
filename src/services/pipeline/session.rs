//! Per-deck analysis session.
//!
//! A session is constructed at job start and dropped at job end; state reset
//! between decks is a property of construction, never of in-place mutation.
//! Cross-deck contamination is the highest-severity defect in this pipeline.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::classifier::ClassificationOutcome;
use super::result::{ChapterResult, SlideDescription};
use crate::models::TemplateDetail;
use crate::models::deck::deck_slug;

/// Mutable state for exactly one deck run.
#[derive(Debug)]
pub struct DeckSession {
    pub deck_id: i64,
    pub company_id: String,
    pub filename: String,
    pub deck_slug: String,
    pub started_at: DateTime<Utc>,

    pub visual_analysis_results: Vec<SlideDescription>,
    pub company_offering: String,
    pub startup_name: Option<String>,
    pub classification_result: Option<ClassificationOutcome>,
    pub template_config: Option<TemplateDetail>,
    pub chapter_results: BTreeMap<String, ChapterResult>,
    pub specialized_results: BTreeMap<String, String>,
    pub recommendations: Vec<String>,
    pub key_points: Vec<String>,
    pub failed_pages: i64,

    cancel_flag: Arc<AtomicBool>,
}

impl DeckSession {
    pub fn new(
        deck_id: i64,
        company_id: impl Into<String>,
        filename: impl Into<String>,
        cancel_flag: Arc<AtomicBool>,
    ) -> Self {
        let filename = filename.into();
        let slug = deck_slug(&filename);
        Self {
            deck_id,
            company_id: company_id.into(),
            filename,
            deck_slug: slug,
            started_at: Utc::now(),
            visual_analysis_results: Vec::new(),
            company_offering: String::new(),
            startup_name: None,
            classification_result: None,
            template_config: None,
            chapter_results: BTreeMap::new(),
            specialized_results: BTreeMap::new(),
            recommendations: Vec::new(),
            key_points: Vec::new(),
            failed_pages: 0,
            cancel_flag,
        }
    }

    /// Checked between pages and between questions.
    pub fn cancelled(&self) -> bool {
        self.cancel_flag.load(Ordering::Relaxed)
    }

    /// Deck text used as the sole grounding for every text-model call:
    /// the offering line followed by blank-line-separated slide descriptions.
    pub fn pitch_deck_text(&self) -> String {
        build_pitch_deck_text(&self.company_offering, &self.visual_analysis_results)
    }
}

pub fn build_pitch_deck_text(company_offering: &str, slides: &[SlideDescription]) -> String {
    let mut parts = Vec::with_capacity(slides.len() + 1);
    if !company_offering.is_empty() {
        parts.push(company_offering.to_string());
    }
    for slide in slides {
        parts.push(slide.description.clone());
    }
    parts.join("\n\n")
}

/// Descriptions only, for stages that run before the offering exists.
pub fn slide_text(slides: &[SlideDescription]) -> String {
    slides
        .iter()
        .map(|s| s.description.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slide(page: i64, description: &str) -> SlideDescription {
        SlideDescription {
            page_number: page,
            slide_image_path: format!("analysis/deck/slide_{}.jpg", page),
            description: description.to_string(),
        }
    }

    #[test]
    fn fresh_session_has_no_carryover_state() {
        let session = DeckSession::new(1, "acme", "Deck B.pdf", Arc::new(AtomicBool::new(false)));
        assert!(session.visual_analysis_results.is_empty());
        assert!(session.company_offering.is_empty());
        assert!(session.classification_result.is_none());
        assert!(session.template_config.is_none());
        assert!(session.chapter_results.is_empty());
        assert_eq!(session.failed_pages, 0);
        assert_eq!(session.deck_slug, "Deck-B");
    }

    #[test]
    fn pitch_deck_text_leads_with_offering() {
        let mut session =
            DeckSession::new(1, "acme", "a.pdf", Arc::new(AtomicBool::new(false)));
        session.company_offering = "We sell telehealth.".to_string();
        session.visual_analysis_results = vec![slide(1, "Title"), slide(2, "Market")];

        assert_eq!(session.pitch_deck_text(), "We sell telehealth.\n\nTitle\n\nMarket");
    }

    #[test]
    fn cancel_flag_is_observed() {
        let flag = Arc::new(AtomicBool::new(false));
        let session = DeckSession::new(1, "acme", "a.pdf", flag.clone());
        assert!(!session.cancelled());
        flag.store(true, Ordering::Relaxed);
        assert!(session.cancelled());
    }
}
