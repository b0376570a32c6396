//! 回复流水线：分类 → 生成 + 安全自纠 → 排程

pub mod classifier;
pub mod composer;
pub mod ingest;
pub mod prompts;
pub mod safety;
pub mod scheduler;
pub mod schema;

pub use classifier::Classifier;
pub use composer::{ComposeOutcome, ReplyComposer, MAX_ATTEMPTS};
pub use ingest::{IngestPipeline, IngestReport, IngestSettings};
pub use prompts::Persona;
pub use safety::SafetyReviewer;
pub use scheduler::Scheduler;
pub use schema::{SafetyVerdict, SchemaError, Verdict};
