//! Core domain types and traits for the stepwise agent runtime.
//!
//! This crate defines the seams between the agent loop and its
//! collaborators: the [`Tool`](tool::Tool) boundary, the
//! [`InferenceProvider`](inference::InferenceProvider) boundary, and the
//! shared error taxonomy. Everything else in the workspace depends on it;
//! it depends on nothing internal.

pub mod error;
pub mod inference;
pub mod tool;

pub use error::{AgentError, Error, InferenceError, MemoryError, ParseError, Result, ToolError};
pub use inference::InferenceProvider;
pub use tool::{Action, Tool, ToolOutput, ToolParam, ToolRegistry};
