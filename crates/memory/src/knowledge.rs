//! Persisted, tag-indexed knowledge base layered over [`Memory`].
//!
//! The store is capacity-bounded (oldest item evicted first), prunes
//! entries past a staleness horizon after every mutation, and rewrites
//! its whole persistence document synchronously so a crash never leaves
//! a partially applied update behind.

use crate::memory::{clip_chars, Memory, StepKind};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use stepwise_core::error::MemoryError;
use tracing::{debug, info, warn};

/// Maximum stored text length per item; longer values are truncated.
pub const KNOWLEDGE_TEXT_LIMIT: usize = 4000;
/// Marker appended to truncated item text.
pub const TRUNCATION_MARKER: &str = " …";
/// Default item capacity.
pub const DEFAULT_MAX_ITEMS: usize = 150;
/// Default staleness horizon.
pub const DEFAULT_MAX_AGE_DAYS: i64 = 30;

const DIGEST_TEXT_CLIP: usize = 200;

/// One stored piece of knowledge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeItem {
    pub text: String,
    /// Normalized (trimmed, lowercased, sorted, deduplicated) tags.
    #[serde(default)]
    pub tags: Vec<String>,
    pub added_at: DateTime<Utc>,
    /// Loop step that produced the item, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<u32>,
}

#[derive(Debug, Clone)]
struct Entry {
    key: String,
    item: KnowledgeItem,
}

/// On-disk document shape.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedDocument {
    #[serde(default)]
    knowledge_base: BTreeMap<String, KnowledgeItem>,
    #[serde(default)]
    long_term_notes: Vec<String>,
}

/// A [`Memory`] extended with a bounded, persisted knowledge base.
///
/// Derefs to the wrapped memory, so all working-memory operations are
/// available directly on the store.
#[derive(Debug)]
pub struct KnowledgeStore {
    memory: Memory,
    /// Insertion-ordered; lookups scan, which is fine at this capacity.
    entries: Vec<Entry>,
    max_items: usize,
    max_age_days: i64,
    path: Option<PathBuf>,
}

impl KnowledgeStore {
    pub fn new(memory: Memory) -> Self {
        Self {
            memory,
            entries: Vec::new(),
            max_items: DEFAULT_MAX_ITEMS,
            max_age_days: DEFAULT_MAX_AGE_DAYS,
            path: None,
        }
    }

    pub fn with_capacity(mut self, max_items: usize) -> Self {
        self.max_items = max_items.max(1);
        self
    }

    pub fn with_max_age_days(mut self, days: i64) -> Self {
        self.max_age_days = days.max(1);
        self
    }

    /// Attach a persistence file and replay its contents. A missing file
    /// is a fresh start; a corrupt one is ignored with a warning rather
    /// than aborting construction. Pruning re-applies immediately so a
    /// reload never resurrects stale items.
    pub fn with_storage(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self.load();
        let pruned = self.prune_stale();
        if pruned > 0 {
            if let Err(e) = self.persist() {
                warn!(error = %e, "could not persist after load-time pruning");
            }
        }
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // --- mutation ---

    /// Store (or replace) a knowledge item.
    ///
    /// Non-string values are JSON-encoded; text longer than
    /// [`KNOWLEDGE_TEXT_LIMIT`] characters is truncated with a marker.
    /// When the store is at capacity and the key is new, the oldest item
    /// is evicted first.
    pub fn store_knowledge(
        &mut self,
        key: &str,
        value: &serde_json::Value,
        tags: &[String],
        step: Option<u32>,
    ) -> Result<(), MemoryError> {
        let key = key.trim();
        if key.is_empty() {
            return Err(MemoryError::InvalidKey(key.to_string()));
        }

        let raw = match value {
            serde_json::Value::String(s) => s.trim().to_string(),
            other => serde_json::to_string(other)
                .map_err(|e| MemoryError::Serialization(e.to_string()))?,
        };
        let text = clip_chars(&raw, KNOWLEDGE_TEXT_LIMIT, TRUNCATION_MARKER);

        let item = KnowledgeItem {
            text,
            tags: normalize_tags(tags),
            added_at: Utc::now(),
            step,
        };

        if let Some(existing) = self.entries.iter_mut().find(|e| e.key == key) {
            existing.item = item;
        } else {
            if self.entries.len() >= self.max_items {
                self.evict_oldest();
            }
            self.entries.push(Entry {
                key: key.to_string(),
                item,
            });
        }

        let note_text = self
            .retrieve_by_key(key)
            .map(|i| clip_chars(&i.text, 120, TRUNCATION_MARKER))
            .unwrap_or_default();
        self.memory
            .add_long_term_note(&format!("knowledge[{key}]: {note_text}"));
        self.memory.record(
            StepKind::Knowledge,
            format!("stored knowledge under {key:?}"),
            step,
            BTreeMap::new(),
        );
        debug!(key, "knowledge stored");

        self.prune_stale();
        self.persist()
    }

    /// Remove an item by key. Persists even when the key was absent so
    /// the document and in-memory state cannot drift.
    pub fn remove_knowledge(&mut self, key: &str) -> Result<Option<KnowledgeItem>, MemoryError> {
        let key = key.trim();
        let removed = self
            .entries
            .iter()
            .position(|e| e.key == key)
            .map(|i| self.entries.remove(i).item);
        if removed.is_some() {
            self.memory.record(
                StepKind::Knowledge,
                format!("removed knowledge under {key:?}"),
                None,
                BTreeMap::new(),
            );
        }
        self.persist()?;
        Ok(removed)
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .enumerate()
            .min_by_key(|(_, e)| e.item.added_at)
            .map(|(i, _)| i);
        if let Some(i) = oldest {
            let evicted = self.entries.remove(i);
            info!(key = %evicted.key, "knowledge base at capacity, evicted oldest item");
        }
    }

    /// Drop items past the staleness horizon. Returns how many were
    /// removed.
    pub fn prune_stale(&mut self) -> usize {
        let cutoff = Utc::now() - Duration::days(self.max_age_days);
        let before = self.entries.len();
        self.entries.retain(|e| e.item.added_at >= cutoff);
        let removed = before - self.entries.len();
        if removed > 0 {
            info!(removed, "pruned stale knowledge items");
            self.memory.record(
                StepKind::Knowledge,
                format!("pruned {removed} stale knowledge item(s)"),
                None,
                BTreeMap::new(),
            );
        }
        removed
    }

    /// Append a durable note and persist it with the knowledge base.
    pub fn add_long_term_note(&mut self, note: &str) -> Result<(), MemoryError> {
        self.memory.add_long_term_note(note);
        self.persist()
    }

    // --- retrieval ---

    pub fn retrieve_by_key(&self, key: &str) -> Option<&KnowledgeItem> {
        let key = key.trim();
        self.entries.iter().find(|e| e.key == key).map(|e| &e.item)
    }

    /// Items matching the query tags: with `require_all` every query tag
    /// must be present, otherwise any overlap matches.
    pub fn retrieve_by_tags(
        &self,
        tags: &[String],
        require_all: bool,
    ) -> Vec<(&str, &KnowledgeItem)> {
        let query = normalize_tags(tags);
        if query.is_empty() {
            return Vec::new();
        }
        self.entries
            .iter()
            .filter(|e| {
                if require_all {
                    query.iter().all(|t| e.item.tags.contains(t))
                } else {
                    query.iter().any(|t| e.item.tags.contains(t))
                }
            })
            .map(|e| (e.key.as_str(), &e.item))
            .collect()
    }

    /// Items scored against the whitespace-split query terms: a term
    /// matching the key scores 3, a tag 1.5, the body 2. Results come
    /// back in descending score order; ties keep insertion order.
    pub fn retrieve_related(&self, query: &str, limit: usize) -> Vec<(&str, &KnowledgeItem)> {
        let terms: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if terms.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(f64, &Entry)> = self
            .entries
            .iter()
            .filter_map(|e| {
                let key_lc = e.key.to_lowercase();
                let text_lc = e.item.text.to_lowercase();
                let mut score = 0.0;
                for term in &terms {
                    if key_lc.contains(term.as_str()) {
                        score += 3.0;
                    }
                    if e.item.tags.iter().any(|t| t == term) {
                        score += 1.5;
                    }
                    if text_lc.contains(term.as_str()) {
                        score += 2.0;
                    }
                }
                (score > 0.0).then_some((score, e))
            })
            .collect();

        // Stable sort keeps insertion order among equal scores.
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored
            .into_iter()
            .take(limit)
            .map(|(_, e)| (e.key.as_str(), &e.item))
            .collect()
    }

    // --- rendering ---

    /// A compact overview for prompts: item count, dominant tag, oldest
    /// entry age, and the most recent `limit` items.
    pub fn render_knowledge_digest(&self, limit: usize) -> String {
        if self.entries.is_empty() {
            return "Knowledge base is empty.".to_string();
        }

        let mut tag_counts: BTreeMap<&str, usize> = BTreeMap::new();
        for e in &self.entries {
            for t in &e.item.tags {
                *tag_counts.entry(t.as_str()).or_default() += 1;
            }
        }
        let top_tag = tag_counts
            .iter()
            .max_by_key(|(_, n)| **n)
            .map(|(t, _)| *t)
            .unwrap_or("none");
        let oldest = self
            .entries
            .iter()
            .map(|e| e.item.added_at)
            .min()
            .unwrap_or_else(Utc::now);
        let age_days = (Utc::now() - oldest).num_days();

        let mut lines = vec![format!(
            "{} item(s) | top tag: {top_tag} | oldest entry: {age_days} day(s) old",
            self.entries.len()
        )];
        // Replacing a key keeps its slot, so recency goes by timestamp,
        // not position.
        let mut recent: Vec<&Entry> = self.entries.iter().collect();
        recent.sort_by(|a, b| b.item.added_at.cmp(&a.item.added_at));
        for e in recent.into_iter().take(limit) {
            lines.push(format!(
                "- {} [{}]: {}",
                e.key,
                e.item.tags.join(", "),
                clip_chars(&e.item.text, DIGEST_TEXT_CLIP, TRUNCATION_MARKER)
            ));
        }
        lines.join("\n")
    }

    /// Memory's prompt snapshot plus the knowledge digest section.
    pub fn snapshot_for_prompt(&self) -> BTreeMap<String, String> {
        let mut sections = self.memory.snapshot_for_prompt();
        sections.insert(
            "knowledge_digest".to_string(),
            self.render_knowledge_digest(10),
        );
        sections
    }

    // --- persistence ---

    /// Rewrite the whole persistence document. A no-op without a path.
    pub fn persist(&self) -> Result<(), MemoryError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let doc = PersistedDocument {
            knowledge_base: self
                .entries
                .iter()
                .map(|e| (e.key.clone(), e.item.clone()))
                .collect(),
            long_term_notes: self.memory.long_term_notes().to_vec(),
        };
        let json = serde_json::to_string_pretty(&doc)
            .map_err(|e| MemoryError::Serialization(e.to_string()))?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| MemoryError::Storage(e.to_string()))?;
            }
        }
        std::fs::write(path, json).map_err(|e| MemoryError::Storage(e.to_string()))?;
        debug!(path = %path.display(), items = self.entries.len(), "knowledge base persisted");
        Ok(())
    }

    fn load(&mut self) {
        let Some(path) = &self.path else {
            return;
        };
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not read knowledge base");
                return;
            }
        };
        let doc: PersistedDocument = match serde_json::from_str(&raw) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring corrupt knowledge base");
                return;
            }
        };

        let mut entries: Vec<Entry> = doc
            .knowledge_base
            .into_iter()
            .map(|(key, item)| Entry { key, item })
            .collect();
        // The document map is keyed alphabetically; restore age order so
        // eviction and tie-breaking behave the same after a reload.
        entries.sort_by(|a, b| {
            a.item
                .added_at
                .cmp(&b.item.added_at)
                .then_with(|| a.key.cmp(&b.key))
        });
        self.entries = entries;
        self.memory.restore_long_term_notes(doc.long_term_notes);
        info!(path = %path.display(), items = self.entries.len(), "knowledge base loaded");
    }
}

impl Deref for KnowledgeStore {
    type Target = Memory;

    fn deref(&self) -> &Memory {
        &self.memory
    }
}

impl DerefMut for KnowledgeStore {
    fn deref_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }
}

fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = tags
        .iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}
