// Batch visual analysis: per-deck progressive callbacks, monotonic cache
// growth, out-of-band observation through the orchestrator's sample data.

use std::sync::Arc;
use std::time::Duration;

use super::common::*;
use crate::models::ProcessingStatus;
use crate::services::deck_repository::{DeckRepository, VisualCacheRepository};
use crate::services::dispatch::VisualBatchRequest;
use crate::services::storage::SharedStorage;

async fn wait_for_cached(cache: &VisualCacheRepository, ids: &[i64], want: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let cached = cache.cached_deck_ids(ids).await.unwrap();
        if cached.len() >= want {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "batch did not cache {} decks in time (got {})",
            want,
            cached.len()
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn batch_caches_every_deck_progressively() {
    let pool = create_test_db().await;
    configure_stub_models(&pool).await;

    let dir = tempfile::tempdir().unwrap();
    let storage = SharedStorage::new(dir.path());

    let state = orchestrator_state(pool.clone(), storage.clone());
    let orchestrator_url = spawn_internal_server(state).await;

    let runtime = Arc::new(StubRuntime::default());
    let renderer = Arc::new(StubPdfRenderer::new(storage.clone(), 2));
    let processor = build_processor(
        pool.clone(),
        storage.clone(),
        runtime,
        renderer,
        &orchestrator_url,
    );

    let mut ids = Vec::new();
    for i in 0..10 {
        let deck = seed_deck(&pool, &storage, "batchco", &format!("Deck{}.pdf", i)).await;
        ids.push(deck.id);
    }

    let response = processor
        .submit_visual_batch(VisualBatchRequest {
            deck_ids: ids.clone(),
            vision_model: None,
            image_prompt: None,
        })
        .await
        .unwrap();
    assert_eq!(response.accepted_ids, ids);
    assert!(!response.batch_id.is_empty());

    // The cached count is monotonic; observe it growing to completion.
    let cache = VisualCacheRepository::new(pool.clone());
    let mut last_count = 0usize;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let cached = cache.cached_deck_ids(&ids).await.unwrap();
        assert!(cached.len() >= last_count, "cached count regressed");
        last_count = cached.len();
        if last_count == ids.len() {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "batch stalled at {}", last_count);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // Exactly one cache row per deck and every deck promoted by callback.
    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM visual_analysis_cache")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rows, 10);

    let repo = DeckRepository::new(pool.clone());
    for id in &ids {
        let deck = repo.get_deck(*id).await.unwrap();
        assert_eq!(deck.status(), ProcessingStatus::VisualComplete, "deck {}", id);
    }
}

#[tokio::test]
async fn second_batch_submission_conflicts_while_running() {
    let pool = create_test_db().await;
    configure_stub_models(&pool).await;

    let dir = tempfile::tempdir().unwrap();
    let storage = SharedStorage::new(dir.path());

    let state = orchestrator_state(pool.clone(), storage.clone());
    let orchestrator_url = spawn_internal_server(state).await;

    let runtime = Arc::new(StubRuntime::default());
    let renderer = Arc::new(StubPdfRenderer::new(storage.clone(), 30));
    let processor = build_processor(
        pool.clone(),
        storage.clone(),
        runtime,
        renderer,
        &orchestrator_url,
    );

    let mut ids = Vec::new();
    for i in 0..4 {
        let deck = seed_deck(&pool, &storage, "busyco", &format!("Busy{}.pdf", i)).await;
        ids.push(deck.id);
    }

    let first = processor
        .submit_visual_batch(VisualBatchRequest {
            deck_ids: ids.clone(),
            vision_model: None,
            image_prompt: None,
        })
        .await;
    assert!(first.is_ok());

    let second = processor
        .submit_visual_batch(VisualBatchRequest {
            deck_ids: ids.clone(),
            vision_model: None,
            image_prompt: None,
        })
        .await;
    match second {
        Err(e) => assert_eq!(e.kind(), "conflict"),
        Ok(_) => {
            // The first batch may already have drained on a fast machine;
            // in that case a second submission is legitimately accepted.
            let cache = VisualCacheRepository::new(pool.clone());
            let cached = cache.cached_deck_ids(&ids).await.unwrap();
            assert_eq!(cached.len(), ids.len());
        },
    }

    // Either way the batch eventually caches everything exactly once.
    let cache = VisualCacheRepository::new(pool.clone());
    wait_for_cached(&cache, &ids, ids.len()).await;
}
