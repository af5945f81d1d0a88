//! Inference boundary — the opaque `prompt in, text out` call.
//!
//! The agent loop never speaks HTTP itself; transport, authentication,
//! and model selection all live behind this trait. Transport failures
//! propagate up unretried — retrying is a caller policy decision.

use crate::error::InferenceError;
use async_trait::async_trait;

/// An opaque text-completion backend.
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    /// The provider name (e.g., "openrouter", "scripted").
    fn name(&self) -> &str;

    /// Send a fully rendered prompt and return the raw model text.
    async fn infer(&self, prompt: &str) -> std::result::Result<String, InferenceError>;
}
