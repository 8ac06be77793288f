//! The analysis pipeline.
//!
//! Stages in dependency order: visual analysis (PDF to slide images to
//! per-slide descriptions), offering extraction, sector classification,
//! template execution, specialized analyses, result-file serialization.
//! `DeckProcessor` drives a full run per deck on the worker node.

pub mod classifier;
pub mod executor;
pub mod offering;
pub mod processor;
pub mod result;
pub mod session;
pub mod specialized;
pub mod visual;

pub use classifier::ClassificationOutcome;
pub use executor::{ExecutorContext, TemplateOutcome, parse_score};
pub use processor::DeckProcessor;
pub use result::{
    AnalysisResult, ChapterResult, Classification, ProcessingMetadata, QuestionResult,
    SlideDescription, VisualCachePayload,
};
pub use session::DeckSession;
pub use visual::{PdfRenderer, PdfiumRenderer, VisualAnalyzer, prompt_hash};
