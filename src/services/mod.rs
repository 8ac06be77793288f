pub mod callback;
pub mod deck_repository;
pub mod dispatch;
pub mod model_runtime;
pub mod pipeline;
pub mod prompt_registry;
pub mod reconciler;
pub mod storage;
pub mod template_registry;

pub use callback::{
    CacheVisualAnalysisRequest, INTERNAL_SECRET_HEADER, OrchestratorCallback,
    UpdateDeckResultsRequest,
};
pub use deck_repository::{ClassificationRepository, DeckRepository, VisualCacheRepository};
pub use dispatch::{
    ProcessPdfRequest, ProcessPdfResponse, VisualBatchRequest, VisualBatchResponse,
    WorkerDispatcher, dispatch_deck,
};
pub use model_runtime::{ModelInfo, ModelRuntime, OllamaRuntime, RuntimeError, RuntimeOptions};
pub use pipeline::{DeckProcessor, PdfRenderer, PdfiumRenderer};
pub use prompt_registry::PromptRegistry;
pub use reconciler::start_results_reconciler;
pub use storage::SharedStorage;
pub use template_registry::TemplateRegistry;
