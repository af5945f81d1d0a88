//! Runtime configuration for the stepwise agent.
//!
//! Loaded from TOML; every field has a default so an empty document is a
//! valid configuration. Validation happens at load time so a bad budget
//! fails fast instead of surfacing mid-run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use stepwise_core::error::{Error, Result};
use tracing::info;

/// Agent runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    /// Total loop steps before the run degrades to a summary answer.
    pub max_steps: u32,
    /// Re-prompts allowed while waiting for an initial plan.
    pub init_retries: u32,
    /// Re-prompts allowed after an unparseable thinking response.
    pub parse_retries: u32,
    /// Capacity of the rolling summary ring.
    pub history_length: usize,
    /// Capacity of the step timeline.
    pub timeline_length: usize,
    /// Knowledge base item capacity.
    pub max_kb_items: usize,
    /// Knowledge items older than this are pruned.
    pub kb_max_age_days: i64,
    /// Persistence file for the knowledge base; in-memory only when unset.
    pub storage_path: Option<PathBuf>,
    /// Ceiling on one inference call.
    pub inference_timeout_secs: u64,
    /// Ceiling on one tool invocation.
    pub tool_timeout_secs: u64,
    /// Global prompt character ceiling.
    pub max_prompt_chars: usize,
    /// Per-section character limits, overriding the builder defaults.
    pub section_limits: BTreeMap<String, usize>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 12,
            init_retries: 2,
            parse_retries: 2,
            history_length: 25,
            timeline_length: 80,
            max_kb_items: 150,
            kb_max_age_days: 30,
            storage_path: None,
            inference_timeout_secs: 60,
            tool_timeout_secs: 30,
            max_prompt_chars: 12_000,
            section_limits: BTreeMap::new(),
        }
    }
}

impl AgentConfig {
    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("could not read {}: {e}", path.display()),
        })?;
        let config = Self::from_toml_str(&raw)?;
        info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).map_err(|e| Error::Config {
            message: format!("invalid configuration: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject budgets that would make the loop unable to do anything.
    pub fn validate(&self) -> Result<()> {
        let reject = |field: &str| {
            Err(Error::Config {
                message: format!("{field} must be greater than zero"),
            })
        };
        if self.max_steps == 0 {
            return reject("max_steps");
        }
        if self.history_length == 0 {
            return reject("history_length");
        }
        if self.timeline_length == 0 {
            return reject("timeline_length");
        }
        if self.max_kb_items == 0 {
            return reject("max_kb_items");
        }
        if self.kb_max_age_days <= 0 {
            return reject("kb_max_age_days");
        }
        if self.inference_timeout_secs == 0 {
            return reject("inference_timeout_secs");
        }
        if self.tool_timeout_secs == 0 {
            return reject("tool_timeout_secs");
        }
        if self.max_prompt_chars == 0 {
            return reject("max_prompt_chars");
        }
        Ok(())
    }
}
