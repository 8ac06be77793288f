use axum::{
    Router,
    middleware as axum_middleware,
    routing::{get, post, put},
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use deckard::config::Config;
use deckard::db;
use deckard::services::{
    self, ClassificationRepository, DeckRepository, PromptRegistry, SharedStorage,
    TemplateRegistry, VisualCacheRepository, WorkerDispatcher,
};
use deckard::{OrchestratorState, handlers, middleware, models};

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::decks::create_deck,
        handlers::decks::list_decks,
        handlers::decks::process_deck,
        handlers::decks::get_deck_status,
        handlers::decks::get_deck_results,
        handlers::decks::visual_cache_sample,
        handlers::decks::run_visual_batch,

        handlers::prompts::list_prompts,
        handlers::prompts::get_prompt,
        handlers::prompts::update_prompt,
        handlers::prompts::reset_prompt,

        handlers::templates::list_sectors,
        handlers::templates::list_templates,
        handlers::templates::get_template,
        handlers::templates::get_model_config,
        handlers::templates::set_model_config,

        handlers::internal::update_deck_results,
        handlers::internal::cache_visual_analysis,
    ),
    components(
        schemas(
            models::Deck,
            models::Project,
            models::DataSource,
            models::ProcessingStatus,
            models::HealthcareSector,
            models::ClassificationRecord,
            models::Template,
            models::TemplateDetail,
            models::ChapterDetail,
            models::Chapter,
            models::Question,
            models::TemplatePolicy,
            models::PipelinePrompt,
            models::ModelConfig,
            models::ModelKind,
            handlers::decks::CreateDeckRequest,
            handlers::decks::DeckStatusResponse,
            handlers::decks::DispatchResponse,
            handlers::decks::VisualCacheSampleResponse,
            handlers::prompts::UpdatePromptRequest,
            handlers::templates::SetModelConfigRequest,
            handlers::internal::InternalAck,
            services::CacheVisualAnalysisRequest,
            services::UpdateDeckResultsRequest,
            services::ProcessPdfRequest,
            services::ProcessPdfResponse,
            services::VisualBatchRequest,
            services::VisualBatchResponse,
            deckard::services::pipeline::AnalysisResult,
            deckard::services::pipeline::SlideDescription,
            deckard::services::pipeline::ChapterResult,
            deckard::services::pipeline::QuestionResult,
            deckard::services::pipeline::Classification,
            deckard::services::pipeline::ProcessingMetadata,
        )
    ),
    tags(
        (name = "Decks", description = "Deck upload, dispatch and results"),
        (name = "Prompts", description = "Pipeline prompt registry"),
        (name = "Templates", description = "Sectors, templates and model configuration"),
        (name = "Internal", description = "Worker callback endpoints"),
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let config = Config::load()?;

    let log_filter = tracing_subscriber::EnvFilter::new(&config.logging.level);
    let registry = tracing_subscriber::registry().with(log_filter);

    let _log_guard = if let Some(log_file) = &config.logging.file {
        let log_path = std::path::Path::new(log_file);
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let log_dir = log_path.parent().and_then(|p| p.to_str()).unwrap_or("logs");
        let file_name = log_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("orchestrator.log");
        let file_prefix = file_name.strip_suffix(".log").unwrap_or(file_name);

        let file_appender = tracing_appender::rolling::daily(log_dir, file_prefix);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
            .with(tracing_subscriber::fmt::layer())
            .init();
        Some(guard)
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
        None
    };

    tracing::info!("Deckard orchestrator starting up");

    let pool = db::create_pool(&config.database.url).await?;
    tracing::info!("Database pool created and migrations applied");

    let storage = SharedStorage::new(config.storage.mount_path.clone());
    let dispatcher = Arc::new(WorkerDispatcher::new(config.worker_base_url()));

    let app_state = Arc::new(OrchestratorState {
        db: pool.clone(),
        storage: storage.clone(),
        deck_repo: Arc::new(DeckRepository::new(pool.clone())),
        cache_repo: Arc::new(VisualCacheRepository::new(pool.clone())),
        classification_repo: Arc::new(ClassificationRepository::new(pool.clone())),
        prompt_registry: Arc::new(PromptRegistry::new(pool.clone())),
        template_registry: Arc::new(TemplateRegistry::new(pool.clone())),
        dispatcher,
        batch_poll_interval_s: config.internal.batch_poll_interval_s,
    });

    // Repairs deck rows whose terminal callback was lost; the result file on
    // shared storage is the source of truth.
    let _reconciler_handle =
        services::start_results_reconciler(pool.clone(), storage.clone(), 300);

    let api_routes = Router::new()
        .route("/api/decks", post(handlers::decks::create_deck).get(handlers::decks::list_decks))
        .route("/api/decks/run-visual-batch", post(handlers::decks::run_visual_batch))
        .route("/api/decks/visual-cache/sample", get(handlers::decks::visual_cache_sample))
        .route("/api/decks/:id/process", post(handlers::decks::process_deck))
        .route("/api/decks/:id/status", get(handlers::decks::get_deck_status))
        .route("/api/decks/:id/results", get(handlers::decks::get_deck_results))
        .route("/api/prompts", get(handlers::prompts::list_prompts))
        .route(
            "/api/prompts/:stage",
            get(handlers::prompts::get_prompt).put(handlers::prompts::update_prompt),
        )
        .route("/api/prompts/:stage/reset", post(handlers::prompts::reset_prompt))
        .route("/api/sectors", get(handlers::templates::list_sectors))
        .route("/api/templates", get(handlers::templates::list_templates))
        .route("/api/templates/:id", get(handlers::templates::get_template))
        .route(
            "/api/model-configs/:kind",
            get(handlers::templates::get_model_config).put(handlers::templates::set_model_config),
        )
        .with_state(Arc::clone(&app_state));

    let internal_auth = middleware::InternalAuthState {
        shared_secret: config.internal.shared_secret.clone(),
    };
    let internal_routes = Router::new()
        .route(
            "/api/internal/update-deck-results",
            post(handlers::internal::update_deck_results),
        )
        .route(
            "/api/internal/cache-visual-analysis",
            post(handlers::internal::cache_visual_analysis),
        )
        .with_state(Arc::clone(&app_state))
        .layer(axum_middleware::from_fn_with_state(
            internal_auth,
            middleware::internal_auth_middleware,
        ));

    let health_routes = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check));

    let app = Router::new()
        .merge(SwaggerUi::new("/api-docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_routes)
        .merge(internal_routes)
        .merge(health_routes)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Orchestrator listening on http://{}", addr);
    tracing::info!("API documentation available at http://{}/api-docs", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}

async fn ready_check() -> &'static str {
    "READY"
}
