use axum::{
    Json, Router,
    routing::{get, post},
};
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;

use deckard::config::Config;
use deckard::db;
use deckard::models::TemplatePolicy;
use deckard::services::callback::OrchestratorCallback;
use deckard::services::pipeline::{DeckProcessor, PdfiumRenderer};
use deckard::services::{OllamaRuntime, SharedStorage};
use deckard::{WorkerState, handlers};

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::worker::health,
        handlers::worker::list_models,
        handlers::worker::pull_model,
        handlers::worker::delete_model,
        handlers::worker::process_pdf,
        handlers::worker::run_visual_analysis_batch,
        handlers::worker::cancel_deck,
    ),
    components(
        schemas(
            handlers::worker::HealthResponse,
            handlers::worker::CancelResponse,
            deckard::services::ModelInfo,
            deckard::services::ProcessPdfRequest,
            deckard::services::ProcessPdfResponse,
            deckard::services::VisualBatchRequest,
            deckard::services::VisualBatchResponse,
        )
    ),
    tags(
        (name = "Worker", description = "GPU worker: health, models, deck processing"),
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
            .unwrap_or("worker.log");
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

    tracing::info!("Deckard GPU worker starting up");

    let pool = db::create_pool(&config.database.url).await?;
    tracing::info!("Database pool created (read access to registries, write to cache)");

    let storage = SharedStorage::new(config.storage.mount_path.clone());
    let runtime = Arc::new(OllamaRuntime::new(config.model_runtime.url.clone()));
    let renderer = Arc::new(PdfiumRenderer::new(storage.clone()));
    let callback = OrchestratorCallback::new(
        config.internal.orchestrator_url.clone(),
        config.internal.shared_secret.clone(),
    );

    let policy = match config.model_runtime.template_policy.as_str() {
        "single_template" => TemplatePolicy::SingleTemplate,
        _ => TemplatePolicy::SectorClassified,
    };
    tracing::info!("Template policy: {:?}", policy);

    let processor = Arc::new(DeckProcessor::new(
        pool,
        runtime.clone(),
        renderer,
        storage,
        callback,
        policy,
        config.model_runtime.default_num_ctx,
    ));

    let state = Arc::new(WorkerState {
        processor,
        runtime,
        started_at: Instant::now(),
    });

    let app = Router::new()
        .route("/api/health", get(handlers::worker::health))
        .route("/api/models", get(handlers::worker::list_models))
        .route(
            "/api/models/:name",
            post(handlers::worker::pull_model).delete(handlers::worker::delete_model),
        )
        .route("/api/process-pdf", post(handlers::worker::process_pdf))
        .route(
            "/api/run-visual-analysis-batch",
            post(handlers::worker::run_visual_analysis_batch),
        )
        .route("/api/decks/:deck_id/cancel", post(handlers::worker::cancel_deck))
        .route("/api-docs/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.server.host, config.worker.http_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Worker listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
