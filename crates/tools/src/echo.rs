//! Echo tool — returns its input unchanged. Mostly useful for smoke
//! tests and loop demonstrations.

use async_trait::async_trait;
use stepwise_core::{Tool, ToolError, ToolOutput, ToolParam};

pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Returns the provided text unchanged"
    }

    fn parameters(&self) -> Vec<ToolParam> {
        vec![ToolParam::new("text", "string")]
    }

    async fn invoke(&self, args: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let text = args
            .get("text")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArguments("echo requires a text argument".into()))?;
        Ok(ToolOutput::text(text))
    }
}
