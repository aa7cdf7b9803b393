//! 决策 JSON Schema 生成（schemars）
//!
//! 把三种合法决策的结构注入思考 prompt，减少 LLM 输出格式错误。

use std::collections::HashMap;

use schemars::{schema_for, JsonSchema};

/// 与 ThoughtEngine 解析的决策格式一致（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
#[serde(tag = "action", rename_all = "snake_case")]
enum DecisionFormat {
    /// 调用工具
    ToolCall { tool: ToolCallFormat },
    /// 直接回答用户
    Respond { content: String },
    /// 追问用户
    AskClarification { content: String },
}

#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallFormat {
    /// 工具目录中的工具名
    pub name: String,
    /// 工具参数，依工具不同而不同
    pub parameters: HashMap<String, serde_json::Value>,
}

/// 返回决策的 JSON Schema 字符串，可拼入 prompt
pub fn decision_schema_json() -> String {
    let schema = schema_for!(DecisionFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}
