//! Deckard Library
//!
//! Core modules for the Deckard pitch-deck review pipeline. Two binaries are
//! built from this crate: the orchestrator (owns the relational store and
//! the shared filesystem layout, serves external traffic) and the GPU worker
//! (owns model execution, writes slide images, caches and result files).

use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Instant;

pub mod config;
pub mod db;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use services::model_runtime::{ModelRuntime, OllamaRuntime};
pub use services::pipeline::DeckProcessor;
pub use services::{
    ClassificationRepository, DeckRepository, PromptRegistry, SharedStorage, TemplateRegistry,
    VisualCacheRepository, WorkerDispatcher,
};
pub use utils::{ApiError, ApiResult};

/// Orchestrator shared state.
///
/// Rust's type system is the DI container: every service is a plain struct
/// behind an Arc, cloned cheaply into handlers.
#[derive(Clone)]
pub struct OrchestratorState {
    pub db: SqlitePool,
    pub storage: SharedStorage,

    pub deck_repo: Arc<DeckRepository>,
    pub cache_repo: Arc<VisualCacheRepository>,
    pub classification_repo: Arc<ClassificationRepository>,
    pub prompt_registry: Arc<PromptRegistry>,
    pub template_registry: Arc<TemplateRegistry>,
    pub dispatcher: Arc<WorkerDispatcher>,

    /// UI polling hint, exposed but not consumed here.
    pub batch_poll_interval_s: u64,
}

/// GPU worker shared state.
#[derive(Clone)]
pub struct WorkerState {
    pub processor: Arc<DeckProcessor>,
    pub runtime: Arc<dyn ModelRuntime>,
    pub started_at: Instant,
}

#[cfg(test)]
mod tests;
