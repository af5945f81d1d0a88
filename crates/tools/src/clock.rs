//! Clock tool — reports the current UTC time.

use async_trait::async_trait;
use chrono::Utc;
use stepwise_core::{Tool, ToolError, ToolOutput, ToolParam};

pub struct ClockTool;

#[async_trait]
impl Tool for ClockTool {
    fn name(&self) -> &str {
        "clock"
    }

    fn description(&self) -> &str {
        "Returns the current date and time in UTC (RFC 3339)"
    }

    fn parameters(&self) -> Vec<ToolParam> {
        Vec::new()
    }

    async fn invoke(&self, _args: serde_json::Value) -> Result<ToolOutput, ToolError> {
        Ok(ToolOutput::text(
            Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        ))
    }
}
