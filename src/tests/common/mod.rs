// Common test utilities: in-memory database, deterministic model runtime,
// stub PDF renderer and a real orchestrator internal-callback server.

use async_trait::async_trait;
use axum::{Router, middleware as axum_middleware, routing::post};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::OrchestratorState;
use crate::handlers;
use crate::middleware::{InternalAuthState, internal_auth_middleware};
use crate::models::{DataSource, Deck, ModelKind, TemplatePolicy};
use crate::services::callback::OrchestratorCallback;
use crate::services::deck_repository::{
    ClassificationRepository, DeckRepository, VisualCacheRepository,
};
use crate::services::model_runtime::{ModelInfo, ModelRuntime, RuntimeError, RuntimeOptions};
use crate::services::pipeline::visual::PdfRenderer;
use crate::services::pipeline::DeckProcessor;
use crate::services::prompt_registry::PromptRegistry;
use crate::services::storage::SharedStorage;
use crate::services::template_registry::TemplateRegistry;
use crate::services::WorkerDispatcher;
use crate::utils::ApiResult;

pub const TEST_SECRET: &str = "test-internal-secret";

/// In-memory database with all migrations applied.
pub async fn create_test_db() -> SqlitePool {
    crate::db::create_pool("sqlite::memory:")
        .await
        .expect("Failed to create test database")
}

/// Point every model slot at the stub runtime's model names.
pub async fn configure_stub_models(pool: &SqlitePool) {
    let registry = TemplateRegistry::new(pool.clone());
    registry.set_model(ModelKind::Vision, "stub-vision").await.unwrap();
    registry.set_model(ModelKind::Text, "stub-text").await.unwrap();
    registry.set_model(ModelKind::Scoring, "stub-scorer").await.unwrap();
    registry.set_model(ModelKind::Science, "stub-science").await.unwrap();
}

/// Deterministic model runtime. Dispatches on model name and prompt markers;
/// every answer is a pure function of its inputs so identical decks produce
/// identical results.
pub struct StubRuntime {
    /// Page whose vision call always times out (after retries).
    pub fail_vision_page: Option<i64>,
    /// Scoring output; "Score: 5" by default.
    pub scoring_output: String,
    /// JSON verdict for classification calls.
    pub classification_output: String,
    pub vision_calls: AtomicU32,
}

impl Default for StubRuntime {
    fn default() -> Self {
        Self {
            fail_vision_page: None,
            scoring_output: "Score: 5".to_string(),
            classification_output:
                r#"{"sector_id": 1, "confidence": 0.86, "reasoning": "Clear digital therapeutics positioning."}"#
                    .to_string(),
            vision_calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl ModelRuntime for StubRuntime {
    async fn list_models(&self) -> Result<Vec<ModelInfo>, RuntimeError> {
        Ok(vec![ModelInfo {
            name: "stub-vision".to_string(),
            size: 0,
            modified_at: None,
            digest: None,
        }])
    }

    async fn pull_model(&self, _name: &str) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn delete_model(&self, _name: &str) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn analyze_image(
        &self,
        _model: &str,
        _prompt: &str,
        image_bytes: &[u8],
        _options: &RuntimeOptions,
    ) -> Result<String, RuntimeError> {
        self.vision_calls.fetch_add(1, Ordering::Relaxed);
        let tag = String::from_utf8_lossy(image_bytes).to_string();
        let page: i64 = tag.trim_start_matches("jpeg-").parse().unwrap_or(0);
        if Some(page) == self.fail_vision_page {
            return Err(RuntimeError::ModelTimeout(120));
        }
        Ok(format!("Description of page {}", page))
    }

    async fn complete(
        &self,
        model: &str,
        prompt: &str,
        options: &RuntimeOptions,
    ) -> Result<String, RuntimeError> {
        if model == "stub-scorer" {
            return Ok(self.scoring_output.clone());
        }
        if model == "stub-science" {
            return Ok("Summary of the scientific position.".to_string());
        }
        if options.format_json {
            return Ok(self.classification_output.clone());
        }
        if prompt.contains("write a single paragraph") {
            // Offering extraction: derive from the deck text so isolation
            // failures between decks are visible in the output.
            let slide_count = prompt.matches("Description of page").count();
            return Ok(format!("Digital therapeutic offering built from {} slides.", slide_count));
        }
        if prompt.contains("extract the name of the startup") {
            return Ok("Acme Health".to_string());
        }
        if prompt.contains("concrete recommendations") {
            return Ok("- Hire a medical director\n- Run a reimbursement pilot".to_string());
        }
        if prompt.contains("takeaways an investor") {
            return Ok("- Strong clinical evidence\n- Early revenue".to_string());
        }
        // Question analysis and anything else.
        Ok("The deck covers this on slide 2.".to_string())
    }
}

/// Stub renderer writing `jpeg-N` placeholder slide files; page count is
/// looked up by PDF file name.
pub struct StubPdfRenderer {
    storage: SharedStorage,
    pages_by_name: HashMap<String, usize>,
    pub default_pages: usize,
}

impl StubPdfRenderer {
    pub fn new(storage: SharedStorage, default_pages: usize) -> Self {
        Self { storage, pages_by_name: HashMap::new(), default_pages }
    }

    pub fn with_pages(mut self, filename: &str, pages: usize) -> Self {
        self.pages_by_name.insert(filename.to_string(), pages);
        self
    }
}

impl PdfRenderer for StubPdfRenderer {
    fn render_pages(&self, pdf_path: &Path, output_dir: &Path) -> ApiResult<Vec<PathBuf>> {
        let name = pdf_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        let pages = self
            .pages_by_name
            .get(name)
            .copied()
            .unwrap_or(self.default_pages);

        let mut paths = Vec::new();
        for n in 1..=pages {
            let path = output_dir.join(format!("slide_{}.jpg", n));
            self.storage.write_atomic(&path, format!("jpeg-{}", n).as_bytes())?;
            paths.push(path);
        }
        Ok(paths)
    }
}

/// Orchestrator state over a pool and storage root, with a dispatcher that
/// points nowhere (tests drive the worker side directly).
pub fn orchestrator_state(pool: SqlitePool, storage: SharedStorage) -> Arc<OrchestratorState> {
    Arc::new(OrchestratorState {
        db: pool.clone(),
        storage,
        deck_repo: Arc::new(DeckRepository::new(pool.clone())),
        cache_repo: Arc::new(VisualCacheRepository::new(pool.clone())),
        classification_repo: Arc::new(ClassificationRepository::new(pool.clone())),
        prompt_registry: Arc::new(PromptRegistry::new(pool.clone())),
        template_registry: Arc::new(TemplateRegistry::new(pool)),
        dispatcher: Arc::new(WorkerDispatcher::new("http://127.0.0.1:9")),
        batch_poll_interval_s: 5,
    })
}

/// Serve the orchestrator's internal callback routes on an ephemeral port.
/// Returns the base URL the worker should call back to.
pub async fn spawn_internal_server(state: Arc<OrchestratorState>) -> String {
    let auth = InternalAuthState { shared_secret: TEST_SECRET.to_string() };
    let app = Router::new()
        .route(
            "/api/internal/update-deck-results",
            post(handlers::internal::update_deck_results),
        )
        .route(
            "/api/internal/cache-visual-analysis",
            post(handlers::internal::cache_visual_analysis),
        )
        .with_state(state)
        .layer(axum_middleware::from_fn_with_state(auth, internal_auth_middleware));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind internal server");
    let addr = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    format!("http://{}", addr)
}

/// Worker-side processor wired to the stub runtime/renderer and a live
/// internal-callback server.
pub fn build_processor(
    pool: SqlitePool,
    storage: SharedStorage,
    runtime: Arc<StubRuntime>,
    renderer: Arc<StubPdfRenderer>,
    orchestrator_url: &str,
) -> Arc<DeckProcessor> {
    let callback = OrchestratorCallback::new(orchestrator_url, TEST_SECRET);
    Arc::new(DeckProcessor::new(
        pool,
        runtime,
        renderer,
        storage,
        callback,
        TemplatePolicy::SectorClassified,
        32768,
    ))
}

/// Register a deck with a PDF already sitting in shared storage.
pub async fn seed_deck(
    pool: &SqlitePool,
    storage: &SharedStorage,
    company_id: &str,
    filename: &str,
) -> Deck {
    let repo = DeckRepository::new(pool.clone());

    let absolute = storage.upload_path(company_id, filename).unwrap();
    storage.write_atomic(&absolute, b"%PDF-stub").unwrap();
    let relative = absolute
        .strip_prefix(storage.root())
        .unwrap()
        .to_string_lossy()
        .to_string();

    let deck = repo
        .create_deck(company_id, company_id, filename, &relative, DataSource::UserUpload)
        .await
        .unwrap();
    repo.mark_processing(deck.id).await.unwrap();
    deck
}
