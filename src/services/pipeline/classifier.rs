//! Sector classifier - AI-first classification of the company offering into
//! one of the eight healthcare sectors, with keyword hits as supportive
//! context and as the fallback when the model response is unusable.

use serde::Deserialize;
use std::time::Duration;

use crate::models::HealthcareSector;
use crate::services::model_runtime::{ModelRuntime, RuntimeOptions};
use crate::utils::ApiResult;

/// Classifier call timeout.
const CLASSIFY_TIMEOUT: Duration = Duration::from_secs(60);

/// Outcome of classifying one deck.
#[derive(Debug, Clone)]
pub struct ClassificationOutcome {
    pub sector_id: i64,
    pub sector_display_name: String,
    pub confidence: f64,
    pub reasoning: String,
    /// True when neither the model nor the keywords produced a confident
    /// answer; the sector is the model's best guess.
    pub low_confidence: bool,
}

/// Structured response requested from the text model.
#[derive(Debug, Deserialize)]
struct ModelVerdict {
    sector_id: i64,
    confidence: f64,
    #[serde(default)]
    reasoning: String,
}

/// Per-sector keyword hit counts against the lowercased offering.
pub fn keyword_hits(sectors: &[HealthcareSector], company_offering: &str) -> Vec<(i64, usize)> {
    let offering_lower = company_offering.to_lowercase();
    sectors
        .iter()
        .map(|s| (s.id, s.keyword_hits(&offering_lower)))
        .collect()
}

/// Highest-hit sector with at least one hit; ties break to the lowest id.
pub fn keyword_fallback<'a>(
    sectors: &'a [HealthcareSector],
    hits: &[(i64, usize)],
) -> Option<&'a HealthcareSector> {
    let mut best: Option<(i64, usize)> = None;
    for &(sector_id, count) in hits {
        if count == 0 {
            continue;
        }
        best = match best {
            None => Some((sector_id, count)),
            Some((best_id, best_count)) => {
                if count > best_count || (count == best_count && sector_id < best_id) {
                    Some((sector_id, count))
                } else {
                    Some((best_id, best_count))
                }
            },
        };
    }
    best.and_then(|(id, _)| sectors.iter().find(|s| s.id == id))
}

/// Render the classification prompt: the full sector list always, keyword
/// counts only as optional supportive context.
pub fn build_prompt(
    prompt_template: &str,
    company_offering: &str,
    sectors: &[HealthcareSector],
    hits: &[(i64, usize)],
) -> String {
    let sector_list = sectors
        .iter()
        .map(|s| format!("{}. {} - {}", s.id, s.display_name, s.description))
        .collect::<Vec<_>>()
        .join("\n");

    let hinted: Vec<String> = hits
        .iter()
        .filter(|(_, count)| *count > 0)
        .filter_map(|(id, count)| {
            sectors
                .iter()
                .find(|s| s.id == *id)
                .map(|s| format!("If relevant: sector {} has {} keyword matches.", s.display_name, count))
        })
        .collect();

    let keyword_context = if hinted.is_empty() {
        String::new()
    } else {
        format!(
            "Keyword matches are supportive context only, never decisive.\n{}\n\n",
            hinted.join("\n")
        )
    };

    prompt_template
        .replace("{company_offering}", company_offering)
        .replace("{sector_list}", &sector_list)
        .replace("{keyword_context}", &keyword_context)
}

fn parse_verdict(raw: &str, sectors: &[HealthcareSector]) -> Option<ModelVerdict> {
    let verdict: ModelVerdict = serde_json::from_str(raw.trim()).ok()?;
    if !(0.0..=1.0).contains(&verdict.confidence) {
        return None;
    }
    sectors.iter().any(|s| s.id == verdict.sector_id).then_some(verdict)
}

/// Classify a company offering into one sector.
///
/// Never errors on model misbehavior: a response that cannot be parsed, or
/// one below the sector's confidence threshold, falls back to the top
/// keyword sector when one exists, otherwise to a low-confidence outcome.
pub async fn classify(
    runtime: &dyn ModelRuntime,
    text_model: &str,
    company_offering: &str,
    sectors: &[HealthcareSector],
    classifier_prompt: &str,
    num_ctx: u32,
) -> ApiResult<ClassificationOutcome> {
    let hits = keyword_hits(sectors, company_offering);
    let prompt = build_prompt(classifier_prompt, company_offering, sectors, &hits);

    let options = RuntimeOptions::default()
        .with_timeout(CLASSIFY_TIMEOUT)
        .with_num_ctx(num_ctx)
        .json();

    let raw = match runtime.complete(text_model, &prompt, &options).await {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!("Classifier model call failed ({}), using keyword fallback", e);
            String::new()
        },
    };

    let verdict = parse_verdict(&raw, sectors)
        .and_then(|v| sectors.iter().find(|s| s.id == v.sector_id).map(|s| (v, s)));

    match verdict {
        Some((v, sector)) => {
            if v.confidence >= sector.confidence_threshold {
                return Ok(ClassificationOutcome {
                    sector_id: sector.id,
                    sector_display_name: sector.display_name.clone(),
                    confidence: v.confidence,
                    reasoning: v.reasoning,
                    low_confidence: false,
                });
            }

            // Confident enough keywords override a hesitant model.
            if let Some(fallback) = keyword_fallback(sectors, &hits) {
                tracing::info!(
                    "Classifier confidence {:.2} below threshold {:.2}; keyword fallback to '{}'",
                    v.confidence,
                    sector.confidence_threshold,
                    fallback.display_name
                );
                return Ok(ClassificationOutcome {
                    sector_id: fallback.id,
                    sector_display_name: fallback.display_name.clone(),
                    confidence: v.confidence,
                    reasoning: format!("keyword fallback; model said: {}", v.reasoning),
                    low_confidence: false,
                });
            }

            Ok(ClassificationOutcome {
                sector_id: sector.id,
                sector_display_name: sector.display_name.clone(),
                confidence: v.confidence,
                reasoning: v.reasoning,
                low_confidence: true,
            })
        },
        None => {
            if let Some(fallback) = keyword_fallback(sectors, &hits) {
                tracing::warn!(
                    "Classifier response unparseable; keyword fallback to '{}'",
                    fallback.display_name
                );
                return Ok(ClassificationOutcome {
                    sector_id: fallback.id,
                    sector_display_name: fallback.display_name.clone(),
                    confidence: 0.0,
                    reasoning: "classifier response unparseable; highest keyword match".to_string(),
                    low_confidence: false,
                });
            }

            // No parseable verdict and no keyword signal: lowest sector id,
            // flagged low confidence, so the deck still completes.
            let sector = sectors
                .iter()
                .min_by_key(|s| s.id)
                .ok_or_else(|| crate::utils::ApiError::internal("no sectors configured"))?;
            Ok(ClassificationOutcome {
                sector_id: sector.id,
                sector_display_name: sector.display_name.clone(),
                confidence: 0.0,
                reasoning: "classifier response unparseable; no keyword signal".to_string(),
                low_confidence: true,
            })
        },
    }
}
