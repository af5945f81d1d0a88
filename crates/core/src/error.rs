//! Error types for the stepwise domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all stepwise operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Inference errors ---
    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Memory errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Response parsing errors ---
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    // --- Agent loop errors ---
    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum InferenceError {
    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Inference timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name} — {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Invalid key: {0:?} (keys must be non-blank)")]
    InvalidKey(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors from the response parser.
///
/// `MalformedAction` is deliberately distinct from `NoRecognizedFields`:
/// a response that *tried* to emit an Action blob but produced broken JSON
/// warrants a different corrective prompt than a response with no
/// recognizable structure at all.
#[derive(Debug, Clone, Error)]
pub enum ParseError {
    #[error("No recognized fields in model response")]
    NoRecognizedFields,

    #[error("Malformed Action JSON: {0}")]
    MalformedAction(String),
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Initialization failed: no plan after {attempts} attempt(s)")]
    InitializationFailed { attempts: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_error_displays_correctly() {
        let err = Error::Tool(ToolError::ExecutionFailed {
            tool_name: "echo".into(),
            reason: "missing argument".into(),
        });
        assert!(err.to_string().contains("echo"));
        assert!(err.to_string().contains("missing argument"));
    }

    #[test]
    fn invalid_key_mentions_offending_key() {
        let err = Error::Memory(MemoryError::InvalidKey("   ".into()));
        assert!(err.to_string().contains("non-blank"));
    }

    #[test]
    fn parse_errors_are_distinct() {
        let none = ParseError::NoRecognizedFields;
        let bad = ParseError::MalformedAction("unexpected token".into());
        assert_ne!(none.to_string(), bad.to_string());
    }
}
