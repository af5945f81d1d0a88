//! Tool trait — the abstraction over agent capabilities.
//!
//! Tools are what let the agent act in the world: look something up,
//! compute something, send something. The loop never sees a tool body;
//! it only sees a name, a documented argument schema, and a result.

use crate::error::ToolError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single documented argument of a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParam {
    /// Argument name as the model must spell it.
    pub name: String,
    /// Human-readable type tag ("string", "number", ...).
    pub type_tag: String,
}

impl ToolParam {
    pub fn new(name: impl Into<String>, type_tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_tag: type_tag.into(),
        }
    }
}

/// A model-requested tool invocation, normalized by the response parser.
///
/// `args` keeps insertion order (`serde_json::Map` preserves it with the
/// default feature set), so rendering an action back into text is stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Tool name, matched case-sensitively against the registry.
    pub tool: String,
    /// Arguments as a JSON object.
    #[serde(default)]
    pub args: serde_json::Map<String, serde_json::Value>,
}

/// The result of a tool invocation.
///
/// `success`, `cache_hit`, and `info` form an optional telemetry
/// side-channel: the loop strips them before surfacing `payload` to the
/// model, but feeds them to memory's tool-event counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    /// The primary payload, folded into the step's results map.
    pub payload: serde_json::Value,

    /// Whether the tool considers the call successful.
    pub success: bool,

    /// Whether the result came from a cache, if the tool tracks that.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_hit: Option<bool>,

    /// Free-form telemetry annotations.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub info: serde_json::Map<String, serde_json::Value>,
}

impl ToolOutput {
    /// A successful text payload.
    pub fn text(payload: impl Into<String>) -> Self {
        Self {
            payload: serde_json::Value::String(payload.into()),
            success: true,
            cache_hit: None,
            info: serde_json::Map::new(),
        }
    }

    /// A successful structured payload.
    pub fn json(payload: serde_json::Value) -> Self {
        Self {
            payload,
            success: true,
            cache_hit: None,
            info: serde_json::Map::new(),
        }
    }

    /// A failed call whose error is still a usable result for the model.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            payload: serde_json::Value::String(message.into()),
            success: false,
            cache_hit: None,
            info: serde_json::Map::new(),
        }
    }

    /// Annotate the output with cache-hit telemetry.
    pub fn with_cache_hit(mut self, hit: bool) -> Self {
        self.cache_hit = Some(hit);
        self
    }
}

/// The core Tool trait.
///
/// Each tool implements this trait and is registered in the
/// [`ToolRegistry`], which the agent loop uses for dispatch and for
/// rendering the tool catalog into prompts.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "echo", "calculator").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model verbatim).
    fn description(&self) -> &str;

    /// The documented arguments, in declaration order.
    fn parameters(&self) -> Vec<ToolParam>;

    /// Execute the tool with the given JSON-object arguments.
    async fn invoke(&self, args: serde_json::Value) -> std::result::Result<ToolOutput, ToolError>;

    /// Render this tool's catalog entry for inclusion in prompts.
    fn catalog_entry(&self) -> String {
        let args = self
            .parameters()
            .iter()
            .map(|p| format!("{}: {}", p.name, p.type_tag))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "Tool Name: {}\nDescription: {}\nArguments: {}",
            self.name(),
            self.description(),
            args
        )
    }
}

/// A registry of available tools.
///
/// The agent loop uses this to:
/// 1. Render the tool catalog into prompts
/// 2. Look up and execute tools when the model requests them
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name. Lookup is case-sensitive.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Execute a single action against the registry.
    pub async fn execute(&self, action: &Action) -> std::result::Result<ToolOutput, ToolError> {
        let tool = self
            .tools
            .get(&action.tool)
            .ok_or_else(|| ToolError::NotFound(action.tool.clone()))?;
        tool.invoke(serde_json::Value::Object(action.args.clone()))
            .await
    }

    /// Render the full tool catalog, one entry per tool, sorted by name
    /// so the prompt text is deterministic.
    pub fn catalog(&self) -> String {
        let mut entries: Vec<_> = self.tools.values().map(|t| t.catalog_entry()).collect();
        entries.sort();
        entries.join("\n\n")
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
