//! Memory subsystem for the stepwise agent runtime.
//!
//! [`Memory`] is bounded working memory for a single run; [`KnowledgeStore`]
//! layers a persisted, tag-indexed knowledge base on top of it.

pub mod knowledge;
pub mod memory;

pub use knowledge::{
    KnowledgeItem, KnowledgeStore, DEFAULT_MAX_AGE_DAYS, DEFAULT_MAX_ITEMS, KNOWLEDGE_TEXT_LIMIT,
};
pub use memory::{
    Memory, StepKind, StepRecord, ToolTelemetry, DEFAULT_HISTORY_LENGTH, DEFAULT_TIMELINE_LENGTH,
};
