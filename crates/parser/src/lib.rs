//! Model-response parsing for the stepwise agent runtime.
//!
//! Models are asked for JSON but do not always comply, so parsing is an
//! ordered pipeline of strategies: whole-response JSON, fenced JSON
//! block, then loose-text field extraction. The first strategy that
//! recognizes at least one field wins; nothing downstream ever touches
//! the raw response text again.

mod parse;
mod response;

pub use parse::ResponseParser;
pub use response::ParsedResponse;
