//! Echo 工具（测试与本地演示用）

use async_trait::async_trait;
use serde_json::Value;

use crate::core::CallContext;
use crate::tools::Tool;

/// Echo 工具：回显文本
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo text back (for testing)."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "text": {"type": "string", "description": "text to echo", "default": "(empty)"}
            },
            "required": []
        })
    }

    async fn execute(&self, params: Value, _ctx: &CallContext) -> Result<Value, String> {
        let text = params
            .get("text")
            .and_then(|v| v.as_str())
            .unwrap_or("(empty)");
        Ok(serde_json::json!({ "text": text }))
    }
}
