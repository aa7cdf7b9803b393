//! 棋盘上下文工具：把调用方透传的 game context 交给 LLM 查看
//!
//! 过长时按 maxLength 截断并追加 "..."；maxLength 为 0 表示不截断。

use async_trait::async_trait;
use serde_json::Value;

use crate::core::CallContext;
use crate::tools::{Tool, ToolType};

const DEFAULT_MAX_LENGTH: u64 = 1000;

pub struct BoardContextTool;

#[async_trait]
impl Tool for BoardContextTool {
    fn name(&self) -> &str {
        "board_context"
    }

    fn description(&self) -> &str {
        "Return the current board/game context as text."
    }

    fn tool_type(&self) -> ToolType {
        ToolType::InfoRetrieval
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "maxLength": {
                    "type": "number",
                    "description": "maximum characters returned, 0 for unlimited",
                    "default": DEFAULT_MAX_LENGTH
                }
            }
        })
    }

    fn output_schema(&self) -> Option<Value> {
        Some(serde_json::json!({ "required": ["boardContext"] }))
    }

    async fn execute(&self, params: Value, ctx: &CallContext) -> Result<Value, String> {
        if ctx.game_context.is_null() {
            return Ok(serde_json::json!({
                "isError": true,
                "error": "no game context available",
            }));
        }
        let max_length = params
            .get("maxLength")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_MAX_LENGTH) as usize;
        let text = match &ctx.game_context {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let board_context = if max_length > 0 && text.chars().count() > max_length {
            format!("{}...", text.chars().take(max_length).collect::<String>())
        } else {
            text
        };
        Ok(serde_json::json!({ "boardContext": board_context }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_board_context_truncates() {
        let ctx = CallContext::new(
            Value::String("B[dd]W[pp]B[dp]".into()),
            CancellationToken::new(),
        );
        let out = BoardContextTool
            .execute(serde_json::json!({"maxLength": 5}), &ctx)
            .await
            .unwrap();
        assert_eq!(out["boardContext"], "B[dd]...");
    }

    #[tokio::test]
    async fn test_board_context_without_game_is_flagged_error() {
        let ctx = CallContext::new(Value::Null, CancellationToken::new());
        let out = BoardContextTool.execute(Value::Null, &ctx).await.unwrap();
        assert_eq!(out["isError"], true);
    }
}
