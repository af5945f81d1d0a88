//! Prompt construction for the stepwise agent runtime.
//!
//! Templates are immutable configuration ([`TemplateSet`]); the
//! [`PromptBuilder`] renders them under per-section and global character
//! budgets so an oversized memory can never produce an oversized prompt.

pub mod builder;
pub mod template;

pub use builder::{PromptBuilder, DEFAULT_MAX_PROMPT_CHARS, DEFAULT_SECTION_LIMIT};
pub use template::{PromptTemplate, TemplateSet, TEMPLATE_INIT, TEMPLATE_THINKING};
