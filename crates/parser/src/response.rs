//! The normalized result of parsing one model response.

use stepwise_core::Action;

/// Everything the parser recognized in a model response.
///
/// All fields are optional; the agent loop decides what an absent field
/// means for the current phase.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedResponse {
    pub plan: Option<String>,
    pub thought: Option<String>,
    pub summary: Option<String>,
    pub state: Option<String>,
    pub final_answer: Option<String>,
    /// Tool invocations, already normalized to canonical `tool`/`args`.
    pub actions: Vec<Action>,
    /// Key/value pairs the model asked memory to store.
    pub store_results: serde_json::Map<String, serde_json::Value>,
    /// Stored-result keys the model asked to load into the next prompt.
    pub retrieve_results: Vec<String>,
    /// Stored-result keys the model asked to forget.
    pub delete_results: Vec<String>,
}

impl ParsedResponse {
    /// True when nothing at all was recognized.
    pub fn is_empty(&self) -> bool {
        self.plan.is_none()
            && self.thought.is_none()
            && self.summary.is_none()
            && self.state.is_none()
            && self.final_answer.is_none()
            && self.actions.is_empty()
            && self.store_results.is_empty()
            && self.retrieve_results.is_empty()
            && self.delete_results.is_empty()
    }

    /// True when the response carries any memory directive.
    pub fn has_memory_directives(&self) -> bool {
        !self.store_results.is_empty()
            || !self.retrieve_results.is_empty()
            || !self.delete_results.is_empty()
    }
}
