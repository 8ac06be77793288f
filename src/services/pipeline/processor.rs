//! Deck processor - owns the end-to-end run of one deck on the worker and
//! the visual-only batch mode with progressive callbacks.
//!
//! Serial execution: one process-pdf job at a time, one batch at a time.
//! Every deck gets a freshly constructed session; nothing survives between
//! decks except the database and the filesystem.

use chrono::Utc;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

use super::classifier;
use super::executor::{self, ExecutorContext};
use super::offering;
use super::result::{
    AnalysisResult, Classification, ProcessingMetadata, VisualCachePayload,
};
use super::session::DeckSession;
use super::specialized::run_specialized_analyses;
use super::visual::{PdfRenderer, VisualAnalyzer, prompt_hash};
use crate::models::{ModelKind, TemplatePolicy, stages};
use crate::services::callback::{
    CacheVisualAnalysisRequest, OrchestratorCallback, UpdateDeckResultsRequest,
};
use crate::services::deck_repository::{
    ClassificationRepository, DeckRepository, VisualCacheRepository,
};
use crate::services::dispatch::{ProcessPdfRequest, VisualBatchRequest, VisualBatchResponse};
use crate::services::model_runtime::{ModelRuntime, RuntimeOptions};
use crate::services::prompt_registry::PromptRegistry;
use crate::services::storage::SharedStorage;
use crate::services::template_registry::TemplateRegistry;
use crate::utils::{ApiError, ApiResult};

/// Typed failure reasons surfaced to the UI through the deck row.
mod failure {
    pub const VISUAL: &str = "visual_analysis_failed";
    pub const CLASSIFICATION: &str = "classification_failed";
    pub const TEMPLATE: &str = "template_execution_failed";
    pub const STORAGE: &str = "storage_failed";
    pub const CANCELLED: &str = "cancelled";
    pub const INTERNAL: &str = "internal_error";
}

pub struct DeckProcessor {
    deck_repo: DeckRepository,
    cache_repo: VisualCacheRepository,
    classification_repo: ClassificationRepository,
    prompts: PromptRegistry,
    templates: TemplateRegistry,
    runtime: Arc<dyn ModelRuntime>,
    renderer: Arc<dyn PdfRenderer>,
    storage: SharedStorage,
    callback: OrchestratorCallback,
    policy: TemplatePolicy,
    default_num_ctx: u32,

    /// Serializes deck work; health and inventory endpoints never take it.
    job_lock: tokio::sync::Mutex<()>,
    batch_running: AtomicBool,
    cancel_flags: DashMap<i64, Arc<AtomicBool>>,
}

impl DeckProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: sqlx::SqlitePool,
        runtime: Arc<dyn ModelRuntime>,
        renderer: Arc<dyn PdfRenderer>,
        storage: SharedStorage,
        callback: OrchestratorCallback,
        policy: TemplatePolicy,
        default_num_ctx: u32,
    ) -> Self {
        Self {
            deck_repo: DeckRepository::new(pool.clone()),
            cache_repo: VisualCacheRepository::new(pool.clone()),
            classification_repo: ClassificationRepository::new(pool.clone()),
            prompts: PromptRegistry::new(pool.clone()),
            templates: TemplateRegistry::new(pool),
            runtime,
            renderer,
            storage,
            callback,
            policy,
            default_num_ctx,
            job_lock: tokio::sync::Mutex::new(()),
            batch_running: AtomicBool::new(false),
            cancel_flags: DashMap::new(),
        }
    }

    /// Advisory cooperative cancel; takes effect between pages/questions.
    pub fn cancel(&self, deck_id: i64) -> bool {
        match self.cancel_flags.get(&deck_id) {
            Some(flag) => {
                flag.store(true, Ordering::Relaxed);
                true
            },
            None => false,
        }
    }

    fn register_cancel_flag(&self, deck_id: i64) -> Arc<AtomicBool> {
        let flag = Arc::new(AtomicBool::new(false));
        self.cancel_flags.insert(deck_id, flag.clone());
        flag
    }

    /// Full synchronous pipeline for one deck. Serialized by the job lock;
    /// the terminal outcome is reported via callback either way.
    pub async fn process_deck(&self, request: &ProcessPdfRequest) -> ApiResult<String> {
        let _guard = self.job_lock.lock().await;

        let filename = request
            .file_path
            .rsplit('/')
            .next()
            .unwrap_or(request.file_path.as_str())
            .to_string();

        let cancel_flag = self.register_cancel_flag(request.deck_id);
        let mut session =
            DeckSession::new(request.deck_id, request.company_id.clone(), filename, cancel_flag);

        tracing::info!(
            "Deck {}: starting full pipeline for {:?} (company {})",
            request.deck_id,
            request.file_path,
            request.company_id
        );

        let outcome = self.run_deck(&mut session, &request.file_path).await;
        self.cancel_flags.remove(&request.deck_id);

        match outcome {
            Ok(results_file_path) => {
                let update = UpdateDeckResultsRequest {
                    deck_id: request.deck_id,
                    results_file_path: Some(results_file_path.clone()),
                    status: "completed".to_string(),
                    failure_reason: None,
                    failed_pages: session.failed_pages,
                };
                if let Err(e) = self.callback.update_deck_results(&update).await {
                    // The result file on shared storage remains the source of
                    // truth; the orchestrator's reconciler repairs the row.
                    tracing::error!(
                        "Deck {}: completed but result callback failed: {}",
                        request.deck_id,
                        e
                    );
                }
                Ok(results_file_path)
            },
            Err((reason, error)) => {
                tracing::error!("Deck {}: failed ({}): {}", request.deck_id, reason, error);
                let update = UpdateDeckResultsRequest {
                    deck_id: request.deck_id,
                    results_file_path: None,
                    status: "failed".to_string(),
                    failure_reason: Some(reason.to_string()),
                    failed_pages: session.failed_pages,
                };
                if let Err(e) = self.callback.update_deck_results(&update).await {
                    tracing::error!(
                        "Deck {}: failure callback also failed: {}",
                        request.deck_id,
                        e
                    );
                }
                Err(error)
            },
        }
    }

    async fn run_deck(
        &self,
        session: &mut DeckSession,
        file_path: &str,
    ) -> Result<String, (&'static str, ApiError)> {
        let pdf_path = self
            .storage
            .resolve(file_path)
            .map_err(|e| (failure::STORAGE, e))?;

        let vision_model = self
            .templates
            .get_model(ModelKind::Vision)
            .await
            .map_err(|e| (failure::INTERNAL, e))?;
        let text_model = self
            .templates
            .get_model(ModelKind::Text)
            .await
            .map_err(|e| (failure::INTERNAL, e))?;
        let scoring_model = self
            .templates
            .get_model(ModelKind::Scoring)
            .await
            .map_err(|e| (failure::INTERNAL, e))?;
        let science_model = self
            .templates
            .get_model(ModelKind::Science)
            .await
            .map_err(|e| (failure::INTERNAL, e))?;

        // --- Visual stage -------------------------------------------------
        let image_prompt = self
            .prompts
            .get_prompt(stages::IMAGE_ANALYSIS)
            .await
            .map_err(|e| (failure::INTERNAL, e))?;
        let image_prompt_hash = prompt_hash(&image_prompt);

        let cached = self
            .cache_repo
            .get(session.deck_id, &vision_model, &image_prompt_hash)
            .await
            .map_err(|e| (failure::VISUAL, e))?;

        match cached {
            Some(entry) => {
                let payload: VisualCachePayload = serde_json::from_str(&entry.analysis_result_json)
                    .map_err(|e| (failure::VISUAL, ApiError::from(e)))?;
                tracing::info!(
                    "Deck {}: visual analysis cache hit ({} slides)",
                    session.deck_id,
                    payload.visual_analysis_results.len()
                );
                session.visual_analysis_results = payload.visual_analysis_results;
            },
            None => {
                let analyzer =
                    VisualAnalyzer::new(self.runtime.as_ref(), self.renderer.as_ref(), &self.storage);
                analyzer
                    .analyze(session, &pdf_path, &vision_model, &image_prompt)
                    .await
                    .map_err(|e| match e.kind() {
                        "conflict" => (failure::CANCELLED, e),
                        "storage_error" => (failure::STORAGE, e),
                        _ => (failure::VISUAL, e),
                    })?;

                self.store_and_announce_visual(session, &vision_model, &image_prompt).await?;
            },
        }

        // --- Offering and classification ---------------------------------
        self.extract_offering_stage(session, &text_model).await;

        let sectors = self
            .templates
            .list_sectors()
            .await
            .map_err(|e| (failure::CLASSIFICATION, e))?;
        let classifier_prompt = self
            .prompts
            .get_prompt(stages::SECTOR_CLASSIFICATION)
            .await
            .map_err(|e| (failure::CLASSIFICATION, e))?;

        let classification = classifier::classify(
            self.runtime.as_ref(),
            &text_model,
            &session.company_offering,
            &sectors,
            &classifier_prompt,
            self.default_num_ctx,
        )
        .await
        .map_err(|e| (failure::CLASSIFICATION, e))?;

        let template = self
            .templates
            .get_active_template(self.policy, Some(classification.sector_id))
            .await
            .map_err(|e| (failure::CLASSIFICATION, e))?;

        self.classification_repo
            .upsert(
                session.deck_id,
                classification.sector_id,
                classification.confidence,
                &classification.reasoning,
                Some(template.template.id),
            )
            .await
            .map_err(|e| (failure::CLASSIFICATION, e))?;

        tracing::info!(
            "Deck {}: classified as '{}' (confidence {:.2}), template '{}'",
            session.deck_id,
            classification.sector_display_name,
            classification.confidence,
            template.template.name
        );

        session.classification_result = Some(classification);
        session.template_config = Some(template);

        // --- Template execution ------------------------------------------
        let question_prompt = self
            .prompts
            .get_prompt(stages::QUESTION_ANALYSIS)
            .await
            .map_err(|e| (failure::TEMPLATE, e))?;
        let scoring_prompt = self
            .prompts
            .get_prompt(stages::SCORING_ANALYSIS)
            .await
            .map_err(|e| (failure::TEMPLATE, e))?;

        let ctx = ExecutorContext {
            runtime: self.runtime.as_ref(),
            text_model: &text_model,
            scoring_model: &scoring_model,
            question_prompt: &question_prompt,
            scoring_prompt: &scoring_prompt,
            num_ctx: self.default_num_ctx,
        };

        let template_ref = session
            .template_config
            .as_ref()
            .ok_or_else(|| (failure::INTERNAL, ApiError::internal("template missing")))?;

        let template_outcome = executor::execute_template(&ctx, template_ref, session)
            .await
            .map_err(|e| match e.kind() {
                "conflict" => (failure::CANCELLED, e),
                _ => (failure::TEMPLATE, e),
            })?;

        // --- Specialized analyses and closing extractions -----------------
        let declared_kinds = template_ref.template.specialized_kinds();
        let pitch_deck_text = session.pitch_deck_text();

        session.specialized_results = run_specialized_analyses(
            self.runtime.as_ref(),
            &science_model,
            &self.prompts,
            &declared_kinds,
            &pitch_deck_text,
            self.default_num_ctx,
        )
        .await
        .map_err(|e| (failure::TEMPLATE, e))?;

        session.recommendations = self
            .extract_list(stages::RECOMMENDATIONS_EXTRACTION, &text_model, &pitch_deck_text)
            .await;
        session.key_points = self
            .extract_list(stages::KEY_POINTS_EXTRACTION, &text_model, &pitch_deck_text)
            .await;

        // --- Result file --------------------------------------------------
        let completed_at = Utc::now();
        let classification = session
            .classification_result
            .as_ref()
            .ok_or_else(|| (failure::INTERNAL, ApiError::internal("classification missing")))?;

        let mut chapter_analysis = BTreeMap::new();
        let mut report_scores = BTreeMap::new();
        for (key, chapter) in &template_outcome.chapters {
            report_scores.insert(key.clone(), chapter.weighted_score);
            chapter_analysis.insert(key.clone(), chapter.clone());
        }

        let result = AnalysisResult {
            deck_id: session.deck_id,
            company_id: session.company_id.clone(),
            deck_name: session
                .startup_name
                .clone()
                .unwrap_or_else(|| session.deck_slug.clone()),
            model_version: text_model.clone(),
            confidence_score: classification.confidence,
            processing_metadata: ProcessingMetadata {
                started_at: session.started_at,
                completed_at,
                vision_model: vision_model.clone(),
                text_model: text_model.clone(),
                scoring_model: scoring_model.clone(),
            },
            company_offering: session.company_offering.clone(),
            classification: Classification {
                sector: classification.sector_display_name.clone(),
                sector_id: classification.sector_id,
                confidence: classification.confidence,
                reasoning: classification.reasoning.clone(),
            },
            visual_analysis_results: session.visual_analysis_results.clone(),
            chapter_analysis,
            report_scores,
            overall_score: template_outcome.overall_score,
            specialized_analysis: session.specialized_results.clone(),
            recommendations: session.recommendations.clone(),
            key_points: session.key_points.clone(),
        };

        let json = result
            .to_json()
            .map_err(|e| (failure::INTERNAL, ApiError::from(e)))?;

        let epoch = completed_at.timestamp();
        let absolute = self.storage.result_path(session.deck_id, epoch);
        self.storage
            .write_atomic(&absolute, json.as_bytes())
            .map_err(|e| (failure::STORAGE, e))?;

        let relative = SharedStorage::result_relative_path(session.deck_id, epoch);
        tracing::info!("Deck {}: result file written to {}", session.deck_id, relative);
        Ok(relative)
    }

    /// Offering and startup name; model misbehavior never fails the deck.
    async fn extract_offering_stage(&self, session: &mut DeckSession, text_model: &str) {
        let offering_prompt = match self.prompts.get_prompt(stages::OFFERING_EXTRACTION).await {
            Ok(p) => p,
            Err(e) => {
                tracing::error!("Deck {}: offering prompt unavailable: {}", session.deck_id, e);
                return;
            },
        };

        match offering::extract_offering(
            self.runtime.as_ref(),
            text_model,
            &session.visual_analysis_results,
            &offering_prompt,
        )
        .await
        {
            Ok(offering_text) => session.company_offering = offering_text,
            Err(e) => {
                tracing::error!("Deck {}: offering extraction failed: {}", session.deck_id, e);
            },
        }

        if let Ok(name_prompt) = self.prompts.get_prompt(stages::STARTUP_NAME_EXTRACTION).await {
            match offering::extract_startup_name(
                self.runtime.as_ref(),
                text_model,
                &session.visual_analysis_results,
                &name_prompt,
            )
            .await
            {
                Ok(name) => session.startup_name = name,
                Err(e) => {
                    tracing::warn!("Deck {}: name extraction failed: {}", session.deck_id, e);
                },
            }
        }
    }

    /// Cache the visual results and post the progressive callback.
    async fn store_and_announce_visual(
        &self,
        session: &DeckSession,
        vision_model: &str,
        image_prompt: &str,
    ) -> Result<(), (&'static str, ApiError)> {
        let payload = VisualCachePayload {
            visual_analysis_results: session.visual_analysis_results.clone(),
        };
        let json = serde_json::to_string(&payload)
            .map_err(|e| (failure::INTERNAL, ApiError::from(e)))?;

        self.cache_repo
            .upsert(session.deck_id, vision_model, &prompt_hash(image_prompt), &json)
            .await
            .map_err(|e| (failure::VISUAL, e))?;

        let request = CacheVisualAnalysisRequest {
            deck_id: session.deck_id,
            visual_results: session.visual_analysis_results.clone(),
            vision_model: vision_model.to_string(),
            prompt_used: image_prompt.to_string(),
        };
        if let Err(e) = self.callback.cache_visual_analysis(&request).await {
            // Progress reporting only; the cache row is already durable.
            tracing::warn!("Deck {}: cache callback failed: {}", session.deck_id, e);
        }

        Ok(())
    }

    /// One-line-per-item extraction for recommendations and key points.
    async fn extract_list(&self, stage: &str, text_model: &str, pitch_deck_text: &str) -> Vec<String> {
        let prompt = match self.prompts.get_prompt(stage).await {
            Ok(p) => p.replace("{pitch_deck_text}", pitch_deck_text),
            Err(e) => {
                tracing::warn!("Prompt stage '{}' unavailable: {}", stage, e);
                return Vec::new();
            },
        };

        match self
            .runtime
            .complete(text_model, &prompt, &RuntimeOptions::default())
            .await
        {
            Ok(raw) => split_list_output(&raw),
            Err(e) => {
                tracing::warn!("List extraction '{}' failed: {}", stage, e);
                Vec::new()
            },
        }
    }

    // ----------------------------------------------------------------------
    // Batch visual analysis
    // ----------------------------------------------------------------------

    /// Accept a visual-only batch and run it in the background. Decks start
    /// in submission order; a callback is posted after each deck completes,
    /// never at batch end.
    pub async fn submit_visual_batch(
        self: &Arc<Self>,
        request: VisualBatchRequest,
    ) -> ApiResult<VisualBatchResponse> {
        if self.batch_running.swap(true, Ordering::SeqCst) {
            return Err(ApiError::conflict("a visual batch is already running"));
        }

        let prepared = async {
            let vision_model = match request.vision_model {
                Some(ref m) if !m.trim().is_empty() => m.trim().to_string(),
                _ => self.templates.get_model(ModelKind::Vision).await?,
            };
            let image_prompt = match request.image_prompt {
                Some(ref p) if !p.trim().is_empty() => p.trim().to_string(),
                _ => self.prompts.get_prompt(stages::IMAGE_ANALYSIS).await?,
            };

            let mut accepted = Vec::new();
            for deck_id in &request.deck_ids {
                match self.deck_repo.get_deck(*deck_id).await {
                    Ok(deck) => accepted.push(deck),
                    Err(e) => {
                        tracing::warn!("Batch: skipping deck {}: {}", deck_id, e);
                    },
                }
            }
            Ok::<_, ApiError>((vision_model, image_prompt, accepted))
        }
        .await;

        let (vision_model, image_prompt, decks) = match prepared {
            Ok(p) => p,
            Err(e) => {
                self.batch_running.store(false, Ordering::SeqCst);
                return Err(e);
            },
        };

        let batch_id = Uuid::new_v4().to_string();
        let accepted_ids: Vec<i64> = decks.iter().map(|d| d.id).collect();
        tracing::info!(
            "Batch {}: accepted {} of {} decks",
            batch_id,
            accepted_ids.len(),
            request.deck_ids.len()
        );

        let this = Arc::clone(self);
        let task_batch_id = batch_id.clone();
        tokio::spawn(async move {
            this.run_visual_batch(&task_batch_id, decks, &vision_model, &image_prompt)
                .await;
            this.batch_running.store(false, Ordering::SeqCst);
        });

        Ok(VisualBatchResponse { batch_id, accepted_ids })
    }

    async fn run_visual_batch(
        &self,
        batch_id: &str,
        decks: Vec<crate::models::Deck>,
        vision_model: &str,
        image_prompt: &str,
    ) {
        let image_prompt_hash = prompt_hash(image_prompt);

        for deck in decks {
            // Serialize against any concurrent process-pdf job.
            let _guard = self.job_lock.lock().await;

            let cancel_flag = self.register_cancel_flag(deck.id);
            let mut session =
                DeckSession::new(deck.id, deck.company_id.clone(), deck.filename.clone(), cancel_flag);

            let outcome = self
                .run_visual_only(&mut session, &deck, vision_model, image_prompt, &image_prompt_hash)
                .await;
            self.cancel_flags.remove(&deck.id);

            match outcome {
                Ok(()) => {
                    tracing::info!(
                        "Batch {}: deck {} visual analysis complete ({} slides, {} failed pages)",
                        batch_id,
                        deck.id,
                        session.visual_analysis_results.len(),
                        session.failed_pages
                    );
                },
                Err(e) => {
                    tracing::error!("Batch {}: deck {} failed: {}", batch_id, deck.id, e);
                },
            }
        }

        tracing::info!("Batch {}: finished", batch_id);
    }

    async fn run_visual_only(
        &self,
        session: &mut DeckSession,
        deck: &crate::models::Deck,
        vision_model: &str,
        image_prompt: &str,
        image_prompt_hash: &str,
    ) -> ApiResult<()> {
        if let Some(entry) = self
            .cache_repo
            .get(deck.id, vision_model, image_prompt_hash)
            .await?
        {
            let payload: VisualCachePayload = serde_json::from_str(&entry.analysis_result_json)?;
            session.visual_analysis_results = payload.visual_analysis_results;
            tracing::info!("Batch: deck {} already cached, re-announcing", deck.id);
        } else {
            let pdf_path = self.storage.resolve(&deck.file_path)?;
            let analyzer =
                VisualAnalyzer::new(self.runtime.as_ref(), self.renderer.as_ref(), &self.storage);
            analyzer
                .analyze(session, &pdf_path, vision_model, image_prompt)
                .await?;
        }

        self.store_and_announce_visual(session, vision_model, image_prompt)
            .await
            .map_err(|(_, e)| e)
    }
}

/// Split model list output into clean items: one per line, bullets and
/// numbering stripped, empties dropped.
pub fn split_list_output(raw: &str) -> Vec<String> {
    raw.lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(['-', '*', '•'])
                .trim_start_matches(|c: char| c.is_ascii_digit())
                .trim_start_matches(['.', ')'])
                .trim()
        })
        .filter(|line| !line.is_empty())
        .map(|line| line.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_list_output_strips_bullets_and_numbering() {
        let raw = "- Hire a medical director\n2. Run a pilot\n\n* Tighten the ask\n";
        assert_eq!(split_list_output(raw), vec![
            "Hire a medical director".to_string(),
            "Run a pilot".to_string(),
            "Tighten the ask".to_string(),
        ]);
    }

    #[test]
    fn split_list_output_empty_input() {
        assert!(split_list_output("").is_empty());
        assert!(split_list_output("\n\n").is_empty());
    }
}
