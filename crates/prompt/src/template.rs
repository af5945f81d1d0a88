//! Prompt template documents.
//!
//! Templates are configuration, not runtime state: a [`TemplateSet`] is
//! built once (from TOML or the built-in defaults) and never mutated
//! afterwards, so two renders of the same template can never disagree
//! about its text.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use stepwise_core::error::{Error, Result};

/// One immutable prompt template. `{name}` placeholders in `system` and
/// `body` are substituted at render time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub id: String,
    pub system: String,
    pub body: String,
}

/// Template id used for the first, plan-producing call.
pub const TEMPLATE_INIT: &str = "init";
/// Template id used for every subsequent thinking call.
pub const TEMPLATE_THINKING: &str = "thinking";

/// An immutable collection of templates, keyed by id.
#[derive(Debug, Clone)]
pub struct TemplateSet {
    templates: BTreeMap<String, PromptTemplate>,
}

#[derive(Debug, Deserialize)]
struct TemplateDocument {
    #[serde(default)]
    templates: Vec<PromptTemplate>,
}

impl TemplateSet {
    /// The built-in init and thinking templates.
    pub fn builtin() -> Self {
        let mut templates = BTreeMap::new();
        for t in [
            PromptTemplate {
                id: TEMPLATE_INIT.to_string(),
                system: BUILTIN_SYSTEM.to_string(),
                body: BUILTIN_INIT_BODY.to_string(),
            },
            PromptTemplate {
                id: TEMPLATE_THINKING.to_string(),
                system: BUILTIN_SYSTEM.to_string(),
                body: BUILTIN_THINKING_BODY.to_string(),
            },
        ] {
            templates.insert(t.id.clone(), t);
        }
        Self { templates }
    }

    /// Parse a template document. Later entries override the built-ins
    /// and earlier entries with the same id.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let doc: TemplateDocument = toml::from_str(raw).map_err(|e| Error::Config {
            message: format!("invalid template document: {e}"),
        })?;
        let mut set = Self::builtin();
        for t in doc.templates {
            set.templates.insert(t.id.clone(), t);
        }
        Ok(set)
    }

    pub fn get(&self, id: &str) -> Option<&PromptTemplate> {
        self.templates.get(id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.templates.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for TemplateSet {
    fn default() -> Self {
        Self::builtin()
    }
}

const BUILTIN_SYSTEM: &str = "\
You are a methodical reasoning agent. You work in discrete steps, use \
only the tools listed in the catalog, and always reply with a single \
JSON object containing the fields the instructions ask for.";

const BUILTIN_INIT_BODY: &str = "\
Objective:
{objective}

Available tools:
{tools}

Produce a plan for achieving the objective. Reply with a JSON object \
containing:
- \"Plan\": a numbered plan as a single string
- \"Thought\": your reasoning about the first step
- \"State\": a short label for where you are (e.g. \"planning\")";

const BUILTIN_THINKING_BODY: &str = "\
Objective:
{objective}

Plan (fixed for this run):
{plan}

Current state: {state}

Progress summaries:
{summaries}

Recent events:
{recent_events}

Results from your last actions:
{results}

Stored results you can retrieve by key:
{stored_results}

Knowledge base:
{knowledge_digest}

Long-term notes:
{notes}

Tool usage so far:
{tool_stats}

Available tools:
{tools}

Decide the next step. Reply with a JSON object containing any of:
- \"Thought\": your reasoning
- \"Actions\": a list of {\"tool\": name, \"args\": {...}} objects to run
- \"StoreResults\": an object of key/value pairs to remember
- \"RetrieveResults\": a list of keys to load into the next prompt
- \"DeleteResults\": a list of keys to forget
- \"Summary\": one sentence on what this step achieved
- \"State\": a short label for where you are
- \"Final_Answer\": the complete answer, only when the objective is done";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_set_has_both_phases() {
        let set = TemplateSet::builtin();
        assert!(set.get(TEMPLATE_INIT).is_some());
        assert!(set.get(TEMPLATE_THINKING).is_some());
        assert!(set.get("nonexistent").is_none());
    }

    #[test]
    fn toml_templates_override_builtins() {
        let raw = r#"
            [[templates]]
            id = "init"
            system = "Custom system."
            body = "Do {objective} now."

            [[templates]]
            id = "review"
            system = "Reviewer."
            body = "Check {results}."
        "#;
        let set = TemplateSet::from_toml_str(raw).unwrap();
        assert_eq!(set.get("init").unwrap().system, "Custom system.");
        assert!(set.get("review").is_some());
        // Untouched built-ins remain available.
        assert!(set.get(TEMPLATE_THINKING).is_some());
    }

    #[test]
    fn invalid_toml_is_a_config_error() {
        let err = TemplateSet::from_toml_str("templates = 3").unwrap_err();
        assert!(err.to_string().contains("template document"));
    }
}
