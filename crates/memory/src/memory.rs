//! Bounded working memory for an agent run.
//!
//! Everything in here is capacity-bounded: summaries live in a ring,
//! the step timeline evicts FIFO, and the raw tool-event ring keeps only
//! the most recent entries. Rendering functions are pure — calling them
//! never mutates state, so the same memory renders the same text twice.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use stepwise_core::error::MemoryError;
use tracing::debug;

/// Default capacity of the rolling summary ring.
pub const DEFAULT_HISTORY_LENGTH: usize = 25;
/// Default capacity of the step timeline.
pub const DEFAULT_TIMELINE_LENGTH: usize = 80;
/// Raw tool events kept for diagnostics.
const TOOL_EVENT_RING: usize = 20;

/// What a timeline record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Plan,
    Thought,
    Summary,
    State,
    Actions,
    Results,
    ToolEvent,
    Note,
    Knowledge,
    FinalAnswer,
}

impl StepKind {
    pub fn label(&self) -> &'static str {
        match self {
            StepKind::Plan => "plan",
            StepKind::Thought => "thought",
            StepKind::Summary => "summary",
            StepKind::State => "state",
            StepKind::Actions => "actions",
            StepKind::Results => "results",
            StepKind::ToolEvent => "tool_event",
            StepKind::Note => "note",
            StepKind::Knowledge => "knowledge",
            StepKind::FinalAnswer => "final_answer",
        }
    }
}

/// One entry in the step timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub kind: StepKind,
    pub detail: String,
    /// Loop step the record belongs to, when one applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<u32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

/// Per-tool usage counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolTelemetry {
    pub calls: u64,
    pub success: u64,
    pub failure: u64,
    pub cache_hits: u64,
    pub errors: u64,
}

/// Bounded working memory: summaries, state, stored results, timeline,
/// long-term notes, and tool telemetry.
#[derive(Debug, Clone)]
pub struct Memory {
    history_length: usize,
    timeline_length: usize,
    summaries: VecDeque<String>,
    state: Option<String>,
    stored: BTreeMap<String, serde_json::Value>,
    timeline: VecDeque<StepRecord>,
    notes: Vec<String>,
    telemetry: BTreeMap<String, ToolTelemetry>,
    tool_events: VecDeque<String>,
}

impl Memory {
    pub fn new() -> Self {
        Self {
            history_length: DEFAULT_HISTORY_LENGTH,
            timeline_length: DEFAULT_TIMELINE_LENGTH,
            summaries: VecDeque::new(),
            state: None,
            stored: BTreeMap::new(),
            timeline: VecDeque::new(),
            notes: Vec::new(),
            telemetry: BTreeMap::new(),
            tool_events: VecDeque::new(),
        }
    }

    pub fn with_history_length(mut self, n: usize) -> Self {
        self.history_length = n.max(1);
        self
    }

    pub fn with_timeline_length(mut self, n: usize) -> Self {
        self.timeline_length = n.max(1);
        self
    }

    // --- summaries ---

    /// Append a per-step summary. Blank input is ignored; the oldest
    /// summary is evicted once the ring is full. Also logged on the
    /// timeline.
    pub fn add_summary(&mut self, summary: &str, step: Option<u32>) {
        let summary = summary.trim();
        if summary.is_empty() {
            return;
        }
        if self.summaries.len() == self.history_length {
            self.summaries.pop_front();
        }
        self.summaries.push_back(summary.to_string());
        self.record(StepKind::Summary, summary, step, BTreeMap::new());
    }

    pub fn summaries(&self) -> impl Iterator<Item = &str> {
        self.summaries.iter().map(|s| s.as_str())
    }

    // --- state ---

    /// Replace the current-state string. Last write wins; the previous
    /// state survives only as a timeline entry.
    pub fn set_state(&mut self, state: &str, step: Option<u32>) {
        let state = state.trim();
        if state.is_empty() {
            return;
        }
        self.state = Some(state.to_string());
        self.record(StepKind::State, state, step, BTreeMap::new());
    }

    pub fn state(&self) -> Option<&str> {
        self.state.as_deref()
    }

    // --- stored results ---

    /// Store a model-addressable result under `key`.
    pub fn store_result(&mut self, key: &str, value: serde_json::Value) -> Result<(), MemoryError> {
        let key = key.trim();
        if key.is_empty() {
            return Err(MemoryError::InvalidKey(key.to_string()));
        }
        self.stored.insert(key.to_string(), value);
        Ok(())
    }

    pub fn get_stored_result(&self, key: &str) -> Option<&serde_json::Value> {
        self.stored.get(key.trim())
    }

    pub fn clear_stored_result(&mut self, key: &str) -> Option<serde_json::Value> {
        self.stored.remove(key.trim())
    }

    /// Stored-result keys, sorted.
    pub fn list_stored_keys(&self) -> Vec<&str> {
        self.stored.keys().map(|k| k.as_str()).collect()
    }

    // --- timeline ---

    /// Append a timeline record, evicting the oldest when full.
    pub fn record(
        &mut self,
        kind: StepKind,
        detail: impl Into<String>,
        step: Option<u32>,
        metadata: BTreeMap<String, String>,
    ) {
        if self.timeline.len() == self.timeline_length {
            self.timeline.pop_front();
        }
        self.timeline.push_back(StepRecord {
            kind,
            detail: detail.into(),
            step,
            metadata,
            timestamp: Utc::now(),
        });
    }

    /// Record a batch of fields from one loop step. Blank fields are
    /// skipped so callers can pass everything they have unconditionally.
    pub fn remember_step(&mut self, step: u32, entries: &[(StepKind, String)]) {
        for (kind, detail) in entries {
            let detail = detail.trim();
            if detail.is_empty() {
                continue;
            }
            self.record(*kind, detail, Some(step), BTreeMap::new());
        }
    }

    pub fn timeline(&self) -> impl Iterator<Item = &StepRecord> {
        self.timeline.iter()
    }

    // --- long-term notes ---

    /// Append a durable note. Blanks and exact duplicates are skipped.
    pub fn add_long_term_note(&mut self, note: &str) {
        let note = note.trim();
        if note.is_empty() || self.notes.iter().any(|n| n == note) {
            return;
        }
        self.notes.push(note.to_string());
    }

    pub fn long_term_notes(&self) -> &[String] {
        &self.notes
    }

    /// Replace the note list wholesale (used when reloading persisted
    /// state).
    pub fn restore_long_term_notes(&mut self, notes: Vec<String>) {
        self.notes = notes
            .into_iter()
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect();
    }

    // --- tool telemetry ---

    /// Record the outcome of one tool call. Infallible by design: a
    /// telemetry miss must never abort the loop.
    pub fn record_tool_event(
        &mut self,
        tool: &str,
        success: bool,
        cache_hit: Option<bool>,
        error: Option<&str>,
    ) {
        let entry = self.telemetry.entry(tool.to_string()).or_default();
        entry.calls += 1;
        if success {
            entry.success += 1;
        } else {
            entry.failure += 1;
        }
        if cache_hit == Some(true) {
            entry.cache_hits += 1;
        }
        if error.is_some() {
            entry.errors += 1;
        }

        let line = match error {
            Some(reason) => format!("{tool}: error ({reason})"),
            None if success => format!("{tool}: ok"),
            None => format!("{tool}: failed"),
        };
        debug!(tool, success, ?cache_hit, "tool event recorded");
        if self.tool_events.len() == TOOL_EVENT_RING {
            self.tool_events.pop_front();
        }
        self.tool_events.push_back(line.clone());
        self.record(StepKind::ToolEvent, line, None, BTreeMap::new());
    }

    pub fn tool_telemetry(&self, tool: &str) -> Option<&ToolTelemetry> {
        self.telemetry.get(tool)
    }

    // --- rendering (pure) ---

    /// The most recent `limit` timeline records, one per line.
    pub fn render_recent_events(&self, limit: usize) -> String {
        let skip = self.timeline.len().saturating_sub(limit);
        self.timeline
            .iter()
            .skip(skip)
            .map(|r| match r.step {
                Some(step) => format!("- [step {step}] {}: {}", r.kind.label(), r.detail),
                None => format!("- {}: {}", r.kind.label(), r.detail),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// The most recent `limit` long-term notes, one per line.
    pub fn render_long_term_notes(&self, limit: usize) -> String {
        let skip = self.notes.len().saturating_sub(limit);
        self.notes
            .iter()
            .skip(skip)
            .map(|n| format!("- {n}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn render_summaries(&self) -> String {
        self.summaries
            .iter()
            .map(|s| format!("- {s}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn render_stored_results(&self) -> String {
        self.stored
            .iter()
            .map(|(k, v)| match v {
                serde_json::Value::String(s) => format!("- {k}: {s}"),
                other => format!("- {k}: {other}"),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn render_tool_stats(&self) -> String {
        self.telemetry
            .iter()
            .map(|(tool, t)| {
                format!(
                    "- {tool}: {} calls, {} ok, {} failed, {} errors, {} cache hits",
                    t.calls, t.success, t.failure, t.errors, t.cache_hits
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Render every memory section into named text blocks for the prompt
    /// builder. Pure; the same memory always snapshots identically.
    pub fn snapshot_for_prompt(&self) -> BTreeMap<String, String> {
        let mut sections = BTreeMap::new();
        sections.insert("summaries".to_string(), self.render_summaries());
        sections.insert(
            "state".to_string(),
            self.state.clone().unwrap_or_default(),
        );
        sections.insert("stored_results".to_string(), self.render_stored_results());
        sections.insert(
            "recent_events".to_string(),
            self.render_recent_events(DEFAULT_HISTORY_LENGTH),
        );
        sections.insert(
            "notes".to_string(),
            self.render_long_term_notes(DEFAULT_HISTORY_LENGTH),
        );
        sections.insert("tool_stats".to_string(), self.render_tool_stats());
        sections
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

/// Clip `text` to at most `max` characters, appending `marker` when
/// anything was removed. Operates on characters, not bytes.
pub(crate) fn clip_chars(text: &str, max: usize, marker: &str) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(max).collect();
    clipped.push_str(marker);
    clipped
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn summary_ring_evicts_oldest() {
        let mut mem = Memory::new().with_history_length(3);
        for i in 0..5 {
            mem.add_summary(&format!("summary {i}"), Some(i));
        }
        let got: Vec<_> = mem.summaries().collect();
        assert_eq!(got, vec!["summary 2", "summary 3", "summary 4"]);
    }

    #[test]
    fn blank_summary_is_skipped() {
        let mut mem = Memory::new();
        mem.add_summary("   ", None);
        assert_eq!(mem.summaries().count(), 0);
        assert_eq!(mem.timeline().count(), 0);
    }

    #[test]
    fn state_last_write_wins() {
        let mut mem = Memory::new();
        mem.set_state("searching", Some(1));
        mem.set_state("summarizing", Some(2));
        assert_eq!(mem.state(), Some("summarizing"));
        // Blank updates do not clobber the current state.
        mem.set_state("  ", Some(3));
        assert_eq!(mem.state(), Some("summarizing"));
        // Both writes left timeline entries behind.
        assert_eq!(mem.timeline().count(), 2);
    }

    #[test]
    fn store_result_rejects_blank_key() {
        let mut mem = Memory::new();
        let err = mem.store_result("   ", json!(1)).unwrap_err();
        assert!(matches!(err, MemoryError::InvalidKey(_)));
    }

    #[test]
    fn stored_results_round_trip() {
        let mut mem = Memory::new();
        mem.store_result("population", json!({"tokyo": 37_000_000}))
            .unwrap();
        mem.store_result("capital", json!("Tokyo")).unwrap();
        assert_eq!(mem.list_stored_keys(), vec!["capital", "population"]);
        assert_eq!(mem.get_stored_result("capital"), Some(&json!("Tokyo")));
        assert_eq!(mem.clear_stored_result("capital"), Some(json!("Tokyo")));
        assert!(mem.get_stored_result("capital").is_none());
    }

    #[test]
    fn timeline_evicts_fifo() {
        let mut mem = Memory::new().with_timeline_length(2);
        mem.record(StepKind::Thought, "first", Some(1), BTreeMap::new());
        mem.record(StepKind::Thought, "second", Some(2), BTreeMap::new());
        mem.record(StepKind::Thought, "third", Some(3), BTreeMap::new());
        let details: Vec<_> = mem.timeline().map(|r| r.detail.as_str()).collect();
        assert_eq!(details, vec!["second", "third"]);
    }

    #[test]
    fn remember_step_skips_blank_fields() {
        let mut mem = Memory::new();
        mem.remember_step(
            4,
            &[
                (StepKind::Thought, "look up the weather".to_string()),
                (StepKind::Summary, "".to_string()),
                (StepKind::State, "  ".to_string()),
            ],
        );
        assert_eq!(mem.timeline().count(), 1);
        assert_eq!(mem.timeline().next().unwrap().step, Some(4));
    }

    #[test]
    fn tool_telemetry_accumulates() {
        let mut mem = Memory::new();
        mem.record_tool_event("search", true, Some(true), None);
        mem.record_tool_event("search", true, Some(false), None);
        mem.record_tool_event("search", false, None, Some("timeout"));
        let t = mem.tool_telemetry("search").unwrap();
        assert_eq!(t.calls, 3);
        assert_eq!(t.success, 2);
        assert_eq!(t.failure, 1);
        assert_eq!(t.cache_hits, 1);
        assert_eq!(t.errors, 1);
        // Each event also lands on the timeline.
        assert_eq!(
            mem.timeline().filter(|r| r.kind == StepKind::ToolEvent).count(),
            3
        );
    }

    #[test]
    fn renders_are_idempotent() {
        let mut mem = Memory::new();
        mem.add_summary("found the answer", Some(1));
        mem.record(StepKind::Results, "echo: hi", Some(1), BTreeMap::new());
        let first = mem.render_recent_events(10);
        let second = mem.render_recent_events(10);
        assert_eq!(first, second);
        assert_eq!(mem.snapshot_for_prompt(), mem.snapshot_for_prompt());
    }

    #[test]
    fn notes_deduplicate() {
        let mut mem = Memory::new();
        mem.add_long_term_note("user prefers metric units");
        mem.add_long_term_note("user prefers metric units");
        assert_eq!(mem.long_term_notes().len(), 1);
        assert_eq!(
            mem.render_long_term_notes(5),
            "- user prefers metric units"
        );
    }

    #[test]
    fn clip_respects_char_boundaries() {
        assert_eq!(clip_chars("héllo", 3, "…"), "hél…");
        assert_eq!(clip_chars("short", 10, "…"), "short");
    }
}
