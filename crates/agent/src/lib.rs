//! The stepwise agent control loop.
//!
//! [`AgentLoop`] drives one objective through Init, then alternating
//! Thinking and Acting phases, until the model produces a final answer
//! or the step budget runs out. The loop is strictly sequential; the
//! only suspension points are inference and tool calls, both bounded by
//! configured timeouts.

pub mod loop_runner;

pub use loop_runner::{AgentLoop, RunOutcome};
