pub mod deck;
pub mod prompt;
pub mod sector;
pub mod template;

pub use deck::{DataSource, Deck, ProcessingStatus, Project, VisualCacheEntry};
pub use prompt::{ModelConfig, ModelKind, PipelinePrompt, stages};
pub use sector::{ClassificationRecord, HealthcareSector};
pub use template::{Chapter, ChapterDetail, Question, Template, TemplateDetail, TemplatePolicy};
