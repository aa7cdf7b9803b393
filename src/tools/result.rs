//! 工具结果归一化
//!
//! 工具可能返回 JSON-RPC 错误信封、旧式 {error} 对象、{isError: true} 对象或任意成功载荷；
//! 这里统一成 Continue / Failed 两种结果。判定顺序固定，第一个命中者生效：
//! 1. jsonrpc == "2.0" 且带 error：消息取 error.data，缺省时取 error.message
//! 2. 带 error 字段：消息即 error
//! 3. isError == true：消息取 error / message / "tool operation failed"
//! 4. 其余视为成功；若描述中声明了 outputSchema.required，缺失字段只记 warn 日志

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::tools::ToolDispatcher;

const DEFAULT_FAILURE_MESSAGE: &str = "tool operation failed";

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolFailure {
    pub message: String,
    /// JSON-RPC 错误码（仅信封错误）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ToolFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            details: None,
        }
    }
}

/// 归一化后的工具调用结果：要么继续推理，要么携带错误终止本轮
#[derive(Clone, Debug, PartialEq)]
pub enum ToolInvocationResult {
    Continue { tool_result: Value },
    Failed(ToolFailure),
}

impl ToolInvocationResult {
    pub fn should_continue(&self) -> bool {
        matches!(self, ToolInvocationResult::Continue { .. })
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ToolInvocationResult::Failed(f) => Some(&f.message),
            ToolInvocationResult::Continue { .. } => None,
        }
    }

    pub fn tool_result(&self) -> Option<&Value> {
        match self {
            ToolInvocationResult::Continue { tool_result } => Some(tool_result),
            ToolInvocationResult::Failed(_) => None,
        }
    }
}

fn field<'a>(raw: &'a Value, key: &str) -> Option<&'a Value> {
    raw.get(key)
        .filter(|v| !v.is_null() && **v != Value::Bool(false))
}

fn text_of(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// 只按固定优先级判定，不做 schema 检查
pub fn classify(raw: &Value) -> ToolInvocationResult {
    if raw.get("jsonrpc").and_then(Value::as_str) == Some("2.0") {
        if let Some(err) = field(raw, "error") {
            let message = field(err, "data")
                .or_else(|| field(err, "message"))
                .map(text_of)
                .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string());
            return ToolInvocationResult::Failed(ToolFailure {
                message,
                code: err.get("code").and_then(Value::as_i64),
                details: err.get("data").cloned(),
            });
        }
    }

    if let Some(err) = field(raw, "error") {
        return ToolInvocationResult::Failed(ToolFailure::new(text_of(err)));
    }

    if raw.get("isError").and_then(Value::as_bool) == Some(true) {
        let message = field(raw, "message")
            .map(text_of)
            .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string());
        return ToolInvocationResult::Failed(ToolFailure::new(message));
    }

    ToolInvocationResult::Continue {
        tool_result: raw.clone(),
    }
}

/// 结果处理器：在 classify 之外，用注册表描述做宽松的输出字段检查
pub struct ToolResultProcessor {
    dispatcher: Arc<dyn ToolDispatcher>,
}

impl ToolResultProcessor {
    pub fn new(dispatcher: Arc<dyn ToolDispatcher>) -> Self {
        Self { dispatcher }
    }

    pub fn process(&self, raw: &Value, tool_name: Option<&str>) -> ToolInvocationResult {
        let result = classify(raw);
        if let (ToolInvocationResult::Continue { tool_result }, Some(name)) = (&result, tool_name) {
            self.check_required_outputs(tool_result, name);
        }
        result
    }

    fn check_required_outputs(&self, tool_result: &Value, name: &str) {
        let Some(descriptor) = self.dispatcher.list_tools().into_iter().find(|t| t.name == name)
        else {
            return;
        };
        let missing: Vec<String> = descriptor
            .required_outputs()
            .into_iter()
            .filter(|k| tool_result.get(k).is_none())
            .collect();
        if !missing.is_empty() {
            tracing::warn!(tool = name, ?missing, "tool result missing required output fields");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_jsonrpc_error_prefers_data() {
        let raw = json!({
            "jsonrpc": "2.0",
            "error": {"code": -32601, "message": "tool not found", "data": "no such tool: foo"}
        });
        let result = classify(&raw);
        assert!(!result.should_continue());
        assert_eq!(result.error(), Some("no such tool: foo"));
        match result {
            ToolInvocationResult::Failed(f) => assert_eq!(f.code, Some(-32601)),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_jsonrpc_error_falls_back_to_message() {
        let raw = json!({"jsonrpc": "2.0", "error": {"code": -32603, "message": "server error"}});
        assert_eq!(classify(&raw).error(), Some("server error"));
    }

    #[test]
    fn test_jsonrpc_error_object_data_is_stringified() {
        let raw = json!({
            "jsonrpc": "2.0",
            "error": {"code": -32600, "message": "invalid", "data": {"details": "missing jsonrpc"}}
        });
        assert_eq!(classify(&raw).error(), Some(r#"{"details":"missing jsonrpc"}"#));
    }

    #[test]
    fn test_legacy_flat_error() {
        assert_eq!(classify(&json!({"error": "engine not configured"})).error(), Some("engine not configured"));
    }

    #[test]
    fn test_is_error_with_jsonrpc_but_no_error_field() {
        let raw = json!({"jsonrpc": "2.0", "isError": true, "message": "move rejected"});
        assert_eq!(classify(&raw).error(), Some("move rejected"));
    }

    #[test]
    fn test_is_error_without_text_uses_default() {
        assert_eq!(classify(&json!({"isError": true})).error(), Some("tool operation failed"));
    }

    #[test]
    fn test_plain_payload_continues() {
        let raw = json!({"winrate": 0.54, "error": null});
        let result = classify(&raw);
        assert!(result.should_continue());
        assert_eq!(result.tool_result(), Some(&raw));
    }

    #[test]
    fn test_missing_required_output_is_still_success() {
        let mut registry = crate::tools::ToolRegistry::new();
        registry.register(crate::tools::BoardContextTool);
        let processor = ToolResultProcessor::new(Arc::new(registry));
        let result = processor.process(&json!({"unexpected": 1}), Some("board_context"));
        assert!(result.should_continue());
    }
}
