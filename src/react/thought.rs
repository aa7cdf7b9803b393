//! ThoughtEngine：思考 prompt 构造与决策解析
//!
//! prompt 依次包含：按类型分组的工具目录 JSON、之前的用户消息、标记为 [latest] 的最新消息、
//! 最近一次工具结果（格式化 JSON）、三种决策的输出格式说明。
//! 无法解析的决策是传输层违约，直接报错，不做任何默认兜底。

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, AgentSupervisor, CallContext, HistoryKind};
use crate::llm::{LlmReply, LlmTransport};
use crate::tools::{decision_schema_json, ToolCatalog, ToolDispatcher, ToolRequest};

/// 最新一条用户消息的行首标记
pub const LATEST_MARKER: &str = "[latest]";

/// 单步推理的决策
#[derive(Clone, Debug, PartialEq)]
pub enum Decision {
    ToolCall(ToolRequest),
    Respond { content: Option<String> },
    AskClarification { content: Option<String> },
    /// action 字段存在但不是已知取值
    Unrecognized { action: String, content: Option<String> },
}

/// 构造 prompt 所需的输入（从 AgentState 快照中提取）
#[derive(Clone, Debug, Default)]
pub struct PromptInput {
    pub catalog: ToolCatalog,
    pub user_messages: Vec<String>,
    pub last_tool_result: Option<Value>,
}

pub fn build_thought_prompt(input: &PromptInput) -> String {
    let mut prompt =
        String::from("你是一个围棋助手，需要分析最新的用户请求和工具执行结果，然后决定下一步操作。\n\n");

    let catalog = serde_json::to_string_pretty(&input.catalog.grouped_json())
        .unwrap_or_else(|_| "{}".to_string());
    prompt.push_str(&format!("可用工具（按类型分组）:\n{}\n\n", catalog));

    if let Some((latest, earlier)) = input.user_messages.split_last() {
        if !earlier.is_empty() {
            prompt.push_str("用户历史消息:\n");
            for msg in earlier {
                prompt.push_str(&format!("- {}\n", msg));
            }
            prompt.push('\n');
        }
        prompt.push_str(&format!("最新用户消息:\n{} {}\n", LATEST_MARKER, latest));
    }

    if let Some(result) = &input.last_tool_result {
        let pretty = serde_json::to_string_pretty(result).unwrap_or_else(|_| result.to_string());
        prompt.push_str(&format!("\n最近的工具执行结果:\n{}\n", pretty));
    }

    prompt.push_str("\n请你根据以上信息，决定是调用工具、直接回答用户还是追问用户。\n\n");
    prompt.push_str("输出格式要求（只输出一个 JSON 对象）:\n");
    prompt.push_str("1. 如果决定调用工具:\n");
    prompt.push_str("   {\"action\":\"tool_call\",\"tool\":{\"name\":\"工具名称\",\"parameters\":{参数对象}}}\n");
    prompt.push_str("2. 如果决定直接回答用户:\n");
    prompt.push_str("   {\"action\":\"respond\",\"content\":\"回答内容\"}\n");
    prompt.push_str("3. 如果需要追问用户:\n");
    prompt.push_str("   {\"action\":\"ask_clarification\",\"content\":\"追问内容\"}\n");
    prompt.push_str(&format!("\nJSON Schema:\n{}\n", decision_schema_json()));
    prompt
}

/// 去掉 ```json ... ``` 代码块包裹
pub(crate) fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.rfind("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim())
}

fn optional_text(v: &Value, key: &str) -> Option<String> {
    match v.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    }
}

/// 决策中的 tool 字段：工具类型由调用器按注册表回填，模型给出的其余字段一概忽略
#[derive(Deserialize)]
struct RawTool {
    name: String,
    #[serde(default)]
    parameters: Option<Value>,
}

/// 解析 LLM 回复为决策；同时返回解析后的原始 JSON（写入 thought 历史）
pub fn parse_decision(reply: LlmReply) -> Result<(Decision, Value), AgentError> {
    let value = match reply {
        LlmReply::Structured(v) => v,
        LlmReply::Text(text) => serde_json::from_str::<Value>(strip_code_fence(&text))
            .map_err(|e| AgentError::ParseDecision(format!("无法解析LLM响应: {}", e)))?,
    };

    let action = match value.get("action") {
        Some(Value::String(a)) if !a.is_empty() => a.clone(),
        _ => return Err(AgentError::ParseDecision("LLM响应缺少action字段".to_string())),
    };

    let decision = match action.as_str() {
        "tool_call" => {
            let tool = value
                .get("tool")
                .cloned()
                .and_then(|t| serde_json::from_value::<RawTool>(t).ok())
                .filter(|t| !t.name.is_empty())
                .ok_or_else(|| AgentError::InvalidDecision("Invalid tool information".to_string()))?;
            Decision::ToolCall(ToolRequest::new(tool.name, tool.parameters))
        }
        "respond" => Decision::Respond {
            content: optional_text(&value, "content"),
        },
        "ask_clarification" => Decision::AskClarification {
            content: optional_text(&value, "content"),
        },
        _ => Decision::Unrecognized {
            content: optional_text(&value, "content"),
            action,
        },
    };
    Ok((decision, value))
}

/// 思考引擎：持有 LLM 传输与工具注册表
pub struct ThoughtEngine {
    llm: Arc<dyn LlmTransport>,
    dispatcher: Arc<dyn ToolDispatcher>,
}

impl ThoughtEngine {
    pub fn new(llm: Arc<dyn LlmTransport>, dispatcher: Arc<dyn ToolDispatcher>) -> Self {
        Self { llm, dispatcher }
    }

    pub fn prompt_input(&self, supervisor: &AgentSupervisor) -> PromptInput {
        let catalog = ToolCatalog::from_dispatcher(self.dispatcher.as_ref());
        supervisor.with_state(|s| PromptInput {
            catalog,
            user_messages: s
                .history
                .iter()
                .filter(|e| e.kind == HistoryKind::User)
                .map(|e| match &e.payload {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
            last_tool_result: s
                .conversation
                .as_ref()
                .and_then(|c| c.last_tool_result.clone()),
        })
    }

    /// 一次思考：构造 prompt -> 调用 LLM -> 解析决策 -> 写入 thought 历史
    ///
    /// 传输失败时停止循环并回到 Idle，以 AgentError::Llm 返回而不是 panic。
    pub async fn think(
        &self,
        supervisor: &AgentSupervisor,
        cancel: CancellationToken,
    ) -> Result<Decision, AgentError> {
        let prompt = build_thought_prompt(&self.prompt_input(supervisor));
        tracing::debug!(prompt_chars = prompt.chars().count(), "thought prompt built");

        let ctx = CallContext::new(supervisor.with_state(|s| s.game_context()), cancel);
        let reply = match self.llm.complete(&prompt, &ctx).await {
            Ok(reply) => reply,
            Err(e) => {
                supervisor.halt_to_idle();
                return Err(AgentError::Llm(e.to_string()));
            }
        };

        let (decision, raw) = parse_decision(reply)?;
        supervisor.with_state(|s| s.push_history(HistoryKind::Thought, raw));
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{EchoTool, ToolRegistry};
    use serde_json::json;

    #[test]
    fn test_parse_text_and_structured() {
        let (d, _) = parse_decision(LlmReply::from(r#"{"action":"respond","content":"Play at C4."}"#)).unwrap();
        assert_eq!(
            d,
            Decision::Respond {
                content: Some("Play at C4.".into())
            }
        );

        let (d, _) = parse_decision(LlmReply::Structured(json!({
            "action": "tool_call",
            "tool": {"name": "echo", "parameters": {"text": "hi"}}
        })))
        .unwrap();
        assert_eq!(d, Decision::ToolCall(ToolRequest::new("echo", Some(json!({"text": "hi"})))));
    }

    #[test]
    fn test_parse_fenced_json() {
        let text = "```json\n{\"action\":\"ask_clarification\",\"content\":\"Which corner?\"}\n```";
        let (d, _) = parse_decision(LlmReply::from(text)).unwrap();
        assert!(matches!(d, Decision::AskClarification { .. }));
    }

    #[test]
    fn test_parse_failures_are_fatal() {
        let err = parse_decision(LlmReply::from("I think you should play C4")).unwrap_err();
        assert!(matches!(err, AgentError::ParseDecision(_)));

        let err = parse_decision(LlmReply::Structured(json!({"content": "x"}))).unwrap_err();
        assert!(matches!(err, AgentError::ParseDecision(_)));

        let err = parse_decision(LlmReply::Structured(json!({"action": "tool_call", "tool": {}}))).unwrap_err();
        assert!(matches!(err, AgentError::InvalidDecision(_)));
    }

    #[test]
    fn test_tool_call_ignores_echoed_type() {
        let reply = LlmReply::Structured(json!({
            "action": "tool_call",
            "tool": {"name": "echo", "type": "mcp", "parameters": {"text": "x"}}
        }));
        let (d, _) = parse_decision(reply).unwrap();
        assert_eq!(
            d,
            Decision::ToolCall(ToolRequest::new("echo", Some(json!({"text": "x"}))))
        );
    }

    #[test]
    fn test_unknown_action_is_unrecognized() {
        let (d, _) = parse_decision(LlmReply::Structured(json!({"action": "dance"}))).unwrap();
        assert_eq!(
            d,
            Decision::Unrecognized {
                action: "dance".into(),
                content: None
            }
        );
    }

    #[test]
    fn test_prompt_sections_in_order() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        let input = PromptInput {
            catalog: ToolCatalog::from_dispatcher(&registry),
            user_messages: vec!["first question".into(), "second question".into()],
            last_tool_result: Some(json!({"winrate": 0.6})),
        };
        let prompt = build_thought_prompt(&input);

        let catalog_at = prompt.find("\"execution\"").unwrap();
        let earlier_at = prompt.find("- first question").unwrap();
        let latest_at = prompt.find("[latest] second question").unwrap();
        let result_at = prompt.find("\"winrate\": 0.6").unwrap();
        let format_at = prompt.find("\"action\":\"tool_call\"").unwrap();
        assert!(catalog_at < earlier_at);
        assert!(earlier_at < latest_at);
        assert!(latest_at < result_at);
        assert!(result_at < format_at);
        assert!(!prompt.contains("- second question"));

        assert_eq!(prompt, build_thought_prompt(&input));
    }
}
