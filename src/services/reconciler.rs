//! Results reconciler.
//!
//! Callback delivery can fail even after retries; the result file on shared
//! storage then remains the source of truth. This scheduled task scans the
//! results directory and repairs deck rows that never received their
//! terminal callback. Runs on the orchestrator.
//! Uses the ScheduledExecutor framework for periodic execution.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

use crate::models::ProcessingStatus;
use crate::services::deck_repository::DeckRepository;
use crate::services::storage::SharedStorage;
use crate::utils::scheduled_executor::{ScheduledExecutor, ScheduledTask};

/// Leave very fresh files alone; their callback may still be in flight.
const MIN_FILE_AGE: Duration = Duration::from_secs(10 * 60);

pub struct ResultsReconciler {
    deck_repo: DeckRepository,
    storage: SharedStorage,
    shutdown: Arc<AtomicBool>,
}

impl ResultsReconciler {
    pub fn new(pool: sqlx::SqlitePool, storage: SharedStorage) -> Self {
        Self {
            deck_repo: DeckRepository::new(pool),
            storage,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Parse `job_{deck_id}_{epoch}_results.json`.
    fn parse_result_filename(name: &str) -> Option<(i64, i64)> {
        let stem = name.strip_prefix("job_")?.strip_suffix("_results.json")?;
        let (deck_id, epoch) = stem.split_once('_')?;
        Some((deck_id.parse().ok()?, epoch.parse().ok()?))
    }

    async fn execute(&self) -> Result<(), anyhow::Error> {
        let results_dir = self.storage.results_dir();
        if !results_dir.exists() {
            return Ok(());
        }

        let mut repaired = 0usize;
        for entry in std::fs::read_dir(&results_dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else { continue };
            let Some((deck_id, epoch)) = Self::parse_result_filename(name) else { continue };

            if !self.file_is_settled(&entry.path()) {
                continue;
            }

            match self.reconcile_deck(deck_id, epoch).await {
                Ok(true) => repaired += 1,
                Ok(false) => {},
                Err(e) => warn!("Reconciler: deck {}: {}", deck_id, e),
            }
        }

        if repaired > 0 {
            info!("Reconciler: repaired {} deck row(s) from result files", repaired);
        }

        Ok(())
    }

    fn file_is_settled(&self, path: &Path) -> bool {
        let Ok(metadata) = std::fs::metadata(path) else { return false };
        let Ok(modified) = metadata.modified() else { return false };
        match modified.elapsed() {
            Ok(age) => age >= MIN_FILE_AGE,
            Err(_) => false,
        }
    }

    /// Repair one deck row; true when a write happened. A later run of the
    /// same deck overwrites this via the normal callback (last-write-wins).
    async fn reconcile_deck(&self, deck_id: i64, epoch: i64) -> Result<bool, anyhow::Error> {
        let deck = match self.deck_repo.get_deck(deck_id).await {
            Ok(deck) => deck,
            // Result files may outlive their deck rows.
            Err(_) => return Ok(false),
        };

        if deck.status().is_terminal() {
            return Ok(false);
        }

        let relative = SharedStorage::result_relative_path(deck_id, epoch);
        info!(
            "Reconciler: deck {} is '{}' but {} exists; marking completed",
            deck_id, deck.processing_status, relative
        );

        self.deck_repo
            .apply_result(
                deck_id,
                ProcessingStatus::Completed,
                Some(&relative),
                None,
                deck.failed_pages,
            )
            .await?;
        Ok(true)
    }
}

impl ScheduledTask for ResultsReconciler {
    fn run(&self) -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send + '_>> {
        Box::pin(async move { self.execute().await })
    }

    fn should_terminate(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

/// Create and start the reconciler; returns the shutdown handle.
pub fn start_results_reconciler(
    pool: sqlx::SqlitePool,
    storage: SharedStorage,
    interval_secs: u64,
) -> Arc<AtomicBool> {
    let task = ResultsReconciler::new(pool, storage);
    let shutdown_handle = task.shutdown_handle();

    let executor = ScheduledExecutor::new("results-reconciler", Duration::from_secs(interval_secs));

    tokio::spawn(async move {
        executor.start(task).await;
    });

    info!("Results reconciler started with interval: {}s", interval_secs);

    shutdown_handle
}
