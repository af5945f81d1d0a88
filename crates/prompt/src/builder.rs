//! Budget-enforcing prompt assembly.
//!
//! Every section is clipped to its own character limit before
//! substitution, then the assembled prompt is forced under a global
//! ceiling by repeatedly halving the most expendable sections. The
//! builder never fails on an oversized prompt; a prompt that still will
//! not fit after the halving passes is hard-clipped with a marker.

use crate::template::TemplateSet;
use std::collections::BTreeMap;
use stepwise_core::error::{Error, Result};
use tracing::{debug, warn};

/// Global character ceiling applied after substitution.
pub const DEFAULT_MAX_PROMPT_CHARS: usize = 12_000;
/// Limit applied to sections without an explicit entry in the table.
pub const DEFAULT_SECTION_LIMIT: usize = 1_500;

/// Sections eligible for halving when the assembled prompt is over the
/// ceiling, most expendable first. The objective, tool catalog, and
/// current state are never shrunk below their per-section limits.
const SHRINK_ORDER: [&str; 7] = [
    "results",
    "stored_results",
    "knowledge_digest",
    "recent_events",
    "notes",
    "summaries",
    "plan",
];

/// Halving passes before giving up and hard-clipping.
const MAX_SHRINK_PASSES: usize = 6;

const HARD_CLIP_MARKER: &str = "… [prompt truncated]";

/// Renders templates with per-section and global character budgets.
///
/// Construction fixes the template set and the limit table; rendering is
/// a pure function of its inputs.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    templates: TemplateSet,
    max_chars: usize,
    section_limits: BTreeMap<String, usize>,
}

impl PromptBuilder {
    pub fn new(templates: TemplateSet) -> Self {
        let mut section_limits = BTreeMap::new();
        for (name, limit) in [
            ("objective", 800),
            ("plan", 1_200),
            ("state", 300),
            ("summaries", 2_000),
            ("recent_events", 1_500),
            ("results", 2_500),
            ("stored_results", 1_500),
            ("knowledge_digest", 1_500),
            ("notes", 800),
            ("tool_stats", 600),
            ("tools", 2_500),
        ] {
            section_limits.insert(name.to_string(), limit);
        }
        Self {
            templates,
            max_chars: DEFAULT_MAX_PROMPT_CHARS,
            section_limits,
        }
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars.max(100);
        self
    }

    /// Override the limit for one section.
    pub fn with_section_limit(mut self, section: &str, limit: usize) -> Self {
        self.section_limits.insert(section.to_string(), limit.max(1));
        self
    }

    pub fn templates(&self) -> &TemplateSet {
        &self.templates
    }

    /// Render `template_id` with the given sections.
    ///
    /// Section values are stringified (JSON for non-strings), clipped to
    /// their per-section limits, substituted into the template, and the
    /// result is forced under the global ceiling. `extra_vars` are plain
    /// substitutions that bypass per-section clipping (they still count
    /// toward the ceiling). Deterministic: equal inputs produce equal
    /// output.
    pub fn render(
        &self,
        template_id: &str,
        sections: &BTreeMap<String, serde_json::Value>,
        extra_vars: &BTreeMap<String, String>,
    ) -> Result<String> {
        let template = self.templates.get(template_id).ok_or_else(|| Error::Config {
            message: format!("unknown prompt template {template_id:?}"),
        })?;

        let stringified: BTreeMap<String, String> = sections
            .iter()
            .map(|(k, v)| (k.clone(), stringify(v)))
            .collect();

        let mut limits: BTreeMap<&str, usize> = stringified
            .keys()
            .map(|k| (k.as_str(), self.section_limit(k)))
            .collect();

        let mut prompt = self.assemble(template_id, template, &stringified, extra_vars, &limits);
        if prompt.chars().count() <= self.max_chars {
            return Ok(prompt);
        }

        // Over budget: halve the expendable sections, most expendable
        // first, re-assembling after each cut.
        'shrink: for pass in 0..MAX_SHRINK_PASSES {
            for section in SHRINK_ORDER {
                let Some(limit) = limits.get_mut(section) else {
                    continue;
                };
                if *limit <= 1 {
                    continue;
                }
                *limit /= 2;
                prompt = self.assemble(template_id, template, &stringified, extra_vars, &limits);
                if prompt.chars().count() <= self.max_chars {
                    debug!(template_id, pass, section, "prompt fit after shrinking");
                    break 'shrink;
                }
            }
        }

        if prompt.chars().count() > self.max_chars {
            warn!(
                template_id,
                chars = prompt.chars().count(),
                max = self.max_chars,
                "prompt still over budget after shrinking, hard clipping"
            );
            let keep = self.max_chars.saturating_sub(HARD_CLIP_MARKER.chars().count());
            let mut clipped: String = prompt.chars().take(keep).collect();
            clipped.push_str(HARD_CLIP_MARKER);
            prompt = clipped;
        }
        Ok(prompt)
    }

    fn section_limit(&self, section: &str) -> usize {
        self.section_limits
            .get(section)
            .copied()
            .unwrap_or(DEFAULT_SECTION_LIMIT)
    }

    fn assemble(
        &self,
        template_id: &str,
        template: &crate::template::PromptTemplate,
        sections: &BTreeMap<String, String>,
        extra_vars: &BTreeMap<String, String>,
        limits: &BTreeMap<&str, usize>,
    ) -> String {
        let template_text = format!("{}\n\n{}", template.system, template.body);
        // Single-pass substitution: placeholders are resolved only where
        // they appear in the template itself, so a section whose content
        // happens to contain `{name}` cannot pull in another section.
        let text = substitute(&template_text, |name| {
            if let Some(value) = sections.get(name) {
                let limit = limits.get(name).copied().unwrap_or(DEFAULT_SECTION_LIMIT);
                return Some(clip_section(value, limit));
            }
            extra_vars.get(name).cloned()
        });
        debug!(
            template_id,
            chars = text.chars().count(),
            "prompt assembled"
        );
        text
    }
}

/// Replace `{name}` tokens in one left-to-right scan. Substituted values
/// are never re-scanned; unknown names and non-identifier braces pass
/// through untouched.
fn substitute(template: &str, mut resolve: impl FnMut(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close)
                if close > 0
                    && after[..close]
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_') =>
            {
                let name = &after[..close];
                match resolve(name) {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push('{');
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(TemplateSet::builtin())
    }
}

fn stringify(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Clip `text` to `max` characters, noting how much was removed.
fn clip_section(text: &str, max: usize) -> String {
    let total = text.chars().count();
    if total <= max {
        return text.to_string();
    }
    let removed = total - max;
    let mut clipped: String = text.chars().take(max).collect();
    clipped.push_str(&format!("… [removed {removed} chars]"));
    clipped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{TEMPLATE_INIT, TEMPLATE_THINKING};
    use serde_json::json;

    fn no_vars() -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    fn sections(pairs: &[(&str, serde_json::Value)]) -> BTreeMap<String, serde_json::Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn full_thinking_sections() -> BTreeMap<String, serde_json::Value> {
        sections(&[
            ("objective", json!("answer the question")),
            ("plan", json!("1. look up\n2. answer")),
            ("state", json!("working")),
            ("summaries", json!("- step one done")),
            ("recent_events", json!("- thought: begin")),
            ("results", json!("")),
            ("stored_results", json!("")),
            ("knowledge_digest", json!("Knowledge base is empty.")),
            ("notes", json!("")),
            ("tool_stats", json!("")),
            ("tools", json!("Tool Name: echo")),
        ])
    }

    #[test]
    fn render_substitutes_placeholders() {
        let builder = PromptBuilder::default();
        let prompt = builder
            .render(
                TEMPLATE_INIT,
                &sections(&[
                    ("objective", json!("find the tallest mountain")),
                    ("tools", json!("Tool Name: echo")),
                ]),
                &no_vars(),
            )
            .unwrap();
        assert!(prompt.contains("find the tallest mountain"));
        assert!(prompt.contains("Tool Name: echo"));
        assert!(!prompt.contains("{objective}"));
    }

    #[test]
    fn unknown_template_is_an_error() {
        let builder = PromptBuilder::default();
        let err = builder
            .render("no_such", &BTreeMap::new(), &no_vars())
            .unwrap_err();
        assert!(err.to_string().contains("no_such"));
    }

    #[test]
    fn section_clip_notes_removed_chars() {
        let builder = PromptBuilder::default().with_section_limit("objective", 100);
        let long = "a".repeat(500);
        let prompt = builder
            .render(
                TEMPLATE_INIT,
                &sections(&[("objective", json!(long)), ("tools", json!(""))]),
                &no_vars(),
            )
            .unwrap();
        assert!(prompt.contains(&"a".repeat(100)));
        assert!(!prompt.contains(&"a".repeat(101)));
        assert!(prompt.contains("[removed 400 chars]"));
    }

    #[test]
    fn non_string_sections_are_json_encoded() {
        let builder = PromptBuilder::default();
        let prompt = builder
            .render(
                TEMPLATE_INIT,
                &sections(&[
                    ("objective", json!({"goal": "count"})),
                    ("tools", json!("")),
                ]),
                &no_vars(),
            )
            .unwrap();
        assert!(prompt.contains(r#"{"goal":"count"}"#));
    }

    #[test]
    fn global_ceiling_is_never_exceeded() {
        let builder = PromptBuilder::default().with_max_chars(600);
        let mut s = full_thinking_sections();
        s.insert("results".to_string(), json!("r".repeat(5_000)));
        s.insert("summaries".to_string(), json!("s".repeat(5_000)));
        let prompt = builder.render(TEMPLATE_THINKING, &s, &no_vars()).unwrap();
        assert!(prompt.chars().count() <= 600);
    }

    #[test]
    fn shrinking_cuts_expendable_sections_before_the_plan() {
        // Budget chosen so halving the results section is enough.
        let builder = PromptBuilder::default().with_max_chars(3_000);
        let mut s = full_thinking_sections();
        s.insert("results".to_string(), json!("r".repeat(10_000)));
        s.insert("plan".to_string(), json!("1. the precious plan"));
        let prompt = builder.render(TEMPLATE_THINKING, &s, &no_vars()).unwrap();
        assert!(prompt.chars().count() <= 3_000);
        assert!(prompt.contains("1. the precious plan"));
    }

    #[test]
    fn extra_vars_substitute_without_clipping() {
        let builder = PromptBuilder::default().with_section_limit("objective", 10);
        let mut vars = BTreeMap::new();
        vars.insert("tools".to_string(), "t".repeat(50));
        let prompt = builder
            .render(
                TEMPLATE_INIT,
                &sections(&[("objective", json!("x".repeat(40)))]),
                &vars,
            )
            .unwrap();
        // The section was clipped; the extra var was not.
        assert!(prompt.contains("[removed 30 chars]"));
        assert!(prompt.contains(&"t".repeat(50)));
    }

    #[test]
    fn section_content_with_placeholder_syntax_stays_literal() {
        let builder = PromptBuilder::default();
        let mut s = full_thinking_sections();
        s.insert(
            "summaries".to_string(),
            json!("- model wrote a sneaky {tools} reference"),
        );
        s.insert("tools".to_string(), json!("SECRET CATALOG"));
        let prompt = builder.render(TEMPLATE_THINKING, &s, &no_vars()).unwrap();
        assert!(prompt.contains("sneaky {tools} reference"));
        assert_eq!(prompt.matches("SECRET CATALOG").count(), 1);
    }

    #[test]
    fn render_is_deterministic() {
        let builder = PromptBuilder::default().with_max_chars(800);
        let mut s = full_thinking_sections();
        s.insert("results".to_string(), json!("x".repeat(3_000)));
        let a = builder.render(TEMPLATE_THINKING, &s, &no_vars()).unwrap();
        let b = builder.render(TEMPLATE_THINKING, &s, &no_vars()).unwrap();
        assert_eq!(a, b);
    }
}
