// Full worker pipeline against the stub runtime, with real internal
// callbacks updating the deck row over HTTP.

use axum::{Router, body::Body, http::Request, routing::get};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tower::ServiceExt;

use super::common::*;
use crate::handlers;
use crate::models::ProcessingStatus;
use crate::services::deck_repository::{ClassificationRepository, DeckRepository};
use crate::services::dispatch::ProcessPdfRequest;
use crate::services::pipeline::AnalysisResult;
use crate::services::storage::SharedStorage;

#[tokio::test]
async fn baseline_seven_page_deck_completes_with_uniform_scores() {
    let pool = create_test_db().await;
    configure_stub_models(&pool).await;

    let dir = tempfile::tempdir().unwrap();
    let storage = SharedStorage::new(dir.path());

    let state = orchestrator_state(pool.clone(), storage.clone());
    let orchestrator_url = spawn_internal_server(state.clone()).await;

    let runtime = Arc::new(StubRuntime::default());
    let renderer = Arc::new(StubPdfRenderer::new(storage.clone(), 7));
    let processor = build_processor(
        pool.clone(),
        storage.clone(),
        runtime,
        renderer,
        &orchestrator_url,
    );

    let deck = seed_deck(&pool, &storage, "ismaning", "DeckA.pdf").await;

    let results_path = processor
        .process_deck(&ProcessPdfRequest {
            deck_id: deck.id,
            file_path: deck.file_path.clone(),
            company_id: deck.company_id.clone(),
        })
        .await
        .unwrap();

    // Deck row reached terminal completed with the results path, via callback.
    let repo = DeckRepository::new(pool.clone());
    let updated = repo.get_deck(deck.id).await.unwrap();
    assert_eq!(updated.status(), ProcessingStatus::Completed);
    assert_eq!(updated.results_file_path.as_deref(), Some(results_path.as_str()));
    assert_eq!(updated.failed_pages, 0);

    // Seven slide images exist with 1-based names.
    for n in 1..=7 {
        assert!(storage.slide_path("ismaning", "DeckA", n).unwrap().exists());
    }
    assert!(!storage.slide_path("ismaning", "DeckA", 8).unwrap().exists());

    // The result file parses into the typed schema.
    let bytes = std::fs::read(storage.resolve(&results_path).unwrap()).unwrap();
    let result: AnalysisResult = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(result.deck_id, deck.id);
    assert_eq!(result.company_id, "ismaning");
    assert_eq!(result.deck_name, "Acme Health");
    assert_eq!(result.visual_analysis_results.len(), 7);
    assert_eq!(result.classification.sector_id, 1);
    assert_eq!(result.confidence_score, 0.86);

    // Stub scores every question 5: every chapter and the deck itself land
    // exactly on 5.0, and report_scores mirrors chapter_analysis.
    assert_eq!(result.overall_score, 5.0);
    assert_eq!(result.chapter_analysis.len(), 7);
    for (key, chapter) in &result.chapter_analysis {
        assert_eq!(chapter.weighted_score, 5.0, "chapter {}", key);
        assert_eq!(chapter.total_questions, 4);
        assert_eq!(result.report_scores[key], 5.0);
        for question in &chapter.questions {
            assert_eq!(question.score, 5);
        }
    }

    // Overall equals the weighted mean of chapter scores exactly.
    let mean: f64 = result.report_scores.values().sum::<f64>() / result.report_scores.len() as f64;
    assert!((result.overall_score - mean).abs() < 1e-6);

    assert_eq!(result.recommendations.len(), 2);
    assert_eq!(result.key_points.len(), 2);

    // Classification was persisted with the selected template.
    let record = ClassificationRepository::new(pool.clone())
        .get(deck.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.sector_id, 1);
    assert!(record.template_id.is_some());

    // The orchestrator's status endpoint serves that record straight from
    // the store, alongside the terminal deck state.
    let status_app = Router::new()
        .route("/api/decks/:id/status", get(handlers::decks::get_deck_status))
        .with_state(state);
    let response = status_app
        .oneshot(
            Request::builder()
                .uri(format!("/api/decks/{}/status", deck.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let status: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(status["processing_status"], "completed");
    assert_eq!(status["visual_analysis_completed"], true);
    assert_eq!(status["classification"]["sector_id"], 1);
    assert_eq!(status["classification"]["confidence"], 0.86);
}

#[tokio::test]
async fn page_failure_keeps_deck_completing_with_empty_description() {
    let pool = create_test_db().await;
    configure_stub_models(&pool).await;

    let dir = tempfile::tempdir().unwrap();
    let storage = SharedStorage::new(dir.path());

    let state = orchestrator_state(pool.clone(), storage.clone());
    let orchestrator_url = spawn_internal_server(state).await;

    let runtime = Arc::new(StubRuntime { fail_vision_page: Some(3), ..Default::default() });
    let renderer = Arc::new(StubPdfRenderer::new(storage.clone(), 5));
    let processor = build_processor(
        pool.clone(),
        storage.clone(),
        runtime.clone(),
        renderer,
        &orchestrator_url,
    );

    let deck = seed_deck(&pool, &storage, "ismaning", "Flaky.pdf").await;

    let results_path = processor
        .process_deck(&ProcessPdfRequest {
            deck_id: deck.id,
            file_path: deck.file_path.clone(),
            company_id: deck.company_id.clone(),
        })
        .await
        .unwrap();

    let updated = DeckRepository::new(pool.clone()).get_deck(deck.id).await.unwrap();
    assert_eq!(updated.status(), ProcessingStatus::Completed);
    assert_eq!(updated.failed_pages, 1);

    let bytes = std::fs::read(storage.resolve(&results_path).unwrap()).unwrap();
    let result: AnalysisResult = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(result.visual_analysis_results.len(), 5);
    assert_eq!(result.visual_analysis_results[2].description, "");
    assert_eq!(result.visual_analysis_results[0].description, "Description of page 1");
    assert_eq!(result.visual_analysis_results[4].description, "Description of page 5");

    // Page 3 was attempted three times (initial + two retries).
    assert_eq!(runtime.vision_calls.load(Ordering::Relaxed), 4 + 3);
}

#[tokio::test]
async fn back_to_back_decks_share_no_state() {
    let pool = create_test_db().await;
    configure_stub_models(&pool).await;

    let dir = tempfile::tempdir().unwrap();
    let storage = SharedStorage::new(dir.path());

    let state = orchestrator_state(pool.clone(), storage.clone());
    let orchestrator_url = spawn_internal_server(state).await;

    let runtime = Arc::new(StubRuntime::default());
    let renderer = Arc::new(
        StubPdfRenderer::new(storage.clone(), 7)
            .with_pages("DeckA.pdf", 7)
            .with_pages("DeckB.pdf", 3),
    );
    let processor = build_processor(
        pool.clone(),
        storage.clone(),
        runtime,
        renderer,
        &orchestrator_url,
    );

    let deck_a = seed_deck(&pool, &storage, "ismaning", "DeckA.pdf").await;
    let deck_b = seed_deck(&pool, &storage, "othertown", "DeckB.pdf").await;

    let path_a = processor
        .process_deck(&ProcessPdfRequest {
            deck_id: deck_a.id,
            file_path: deck_a.file_path.clone(),
            company_id: deck_a.company_id.clone(),
        })
        .await
        .unwrap();
    let path_b = processor
        .process_deck(&ProcessPdfRequest {
            deck_id: deck_b.id,
            file_path: deck_b.file_path.clone(),
            company_id: deck_b.company_id.clone(),
        })
        .await
        .unwrap();

    let result_a: AnalysisResult =
        serde_json::from_slice(&std::fs::read(storage.resolve(&path_a).unwrap()).unwrap()).unwrap();
    let result_b: AnalysisResult =
        serde_json::from_slice(&std::fs::read(storage.resolve(&path_b).unwrap()).unwrap()).unwrap();

    // Deck B's state is derived solely from its own three slides.
    assert_eq!(result_b.visual_analysis_results.len(), 3);
    assert_eq!(result_b.company_offering, "Digital therapeutic offering built from 3 slides.");
    assert_eq!(result_a.visual_analysis_results.len(), 7);
    assert_eq!(result_a.company_offering, "Digital therapeutic offering built from 7 slides.");

    for slide in &result_b.visual_analysis_results {
        assert!(slide.slide_image_path.starts_with("analysis/DeckB/"));
    }

    // No slide of A leaks into B's project directory.
    assert!(storage.slide_path("othertown", "DeckB", 3).unwrap().exists());
    assert!(!storage.slide_path("othertown", "DeckB", 4).unwrap().exists());
}

#[tokio::test]
async fn identical_rerun_hits_the_cache_and_matches_exactly() {
    let pool = create_test_db().await;
    configure_stub_models(&pool).await;

    let dir = tempfile::tempdir().unwrap();
    let storage = SharedStorage::new(dir.path());

    let state = orchestrator_state(pool.clone(), storage.clone());
    let orchestrator_url = spawn_internal_server(state).await;

    let runtime = Arc::new(StubRuntime::default());
    let renderer = Arc::new(StubPdfRenderer::new(storage.clone(), 4));
    let processor = build_processor(
        pool.clone(),
        storage.clone(),
        runtime.clone(),
        renderer,
        &orchestrator_url,
    );

    let deck = seed_deck(&pool, &storage, "ismaning", "Repeat.pdf").await;
    let request = ProcessPdfRequest {
        deck_id: deck.id,
        file_path: deck.file_path.clone(),
        company_id: deck.company_id.clone(),
    };

    let path_first = processor.process_deck(&request).await.unwrap();
    let calls_after_first = runtime.vision_calls.load(Ordering::Relaxed);

    let repo = DeckRepository::new(pool.clone());
    repo.mark_processing(deck.id).await.unwrap();
    let path_second = processor.process_deck(&request).await.unwrap();

    // Second run served the visual stage from the cache: no new vision calls.
    assert_eq!(runtime.vision_calls.load(Ordering::Relaxed), calls_after_first);

    let first: AnalysisResult = serde_json::from_slice(
        &std::fs::read(storage.resolve(&path_first).unwrap()).unwrap(),
    )
    .unwrap();
    let second: AnalysisResult = serde_json::from_slice(
        &std::fs::read(storage.resolve(&path_second).unwrap()).unwrap(),
    )
    .unwrap();
    assert_eq!(first.visual_analysis_results, second.visual_analysis_results);
}
