//! 各阶段 prompt 构造、计划合并与阶段结果解析

use serde_json::{json, Value};

use crate::llm::LlmReply;
use crate::react::thought::strip_code_fence;
use crate::workflow::{ExecutionStep, PhaseContext, PlannedStep, ProcessStepId};

/// 生成五步计划细化的 prompt
pub fn plan_prompt(user_message: &str, catalog_json: &Value) -> String {
    let phases: Vec<Value> = ProcessStepId::ALL
        .iter()
        .map(|id| json!({"id": id.as_str(), "name": id.name(), "description": id.description()}))
        .collect();
    let phases = serde_json::to_string_pretty(&phases).unwrap_or_default();
    let tools = serde_json::to_string_pretty(catalog_json).unwrap_or_default();

    let mut prompt = String::from("你是一个围棋助手，请使用五步问题解决流程处理用户请求。\n\n");
    prompt.push_str(&format!("用户请求:\n{}\n\n", user_message));
    prompt.push_str(&format!("五个固定阶段:\n{}\n\n", phases));
    prompt.push_str(&format!("可用工具:\n{}\n\n", tools));
    prompt.push_str("请为每个阶段给出 objectives（字符串数组）与 expectedOutput（字符串），");
    prompt.push_str("只输出 JSON 数组，每项形如 {\"id\":\"阶段ID\",\"objectives\":[...],\"expectedOutput\":\"...\"}。");
    prompt
}

/// 从 LLM 回复中取出计划项；无法解析为数组（或 {steps: [...]}）即为错误
pub fn parse_plan(reply: LlmReply) -> Result<Vec<Value>, String> {
    let value = match reply {
        LlmReply::Structured(v) => v,
        LlmReply::Text(text) => serde_json::from_str::<Value>(strip_code_fence(&text))
            .map_err(|e| format!("无法解析五步流程计划: {}", e))?,
    };
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => match map.remove("steps") {
            Some(Value::Array(items)) => Ok(items),
            _ => Err("五步流程计划缺少 steps 数组".to_string()),
        },
        _ => Err("五步流程计划格式错误".to_string()),
    }
}

/// 按阶段 ID 合并 LLM 细化结果；阶段列表始终是固定的五项，缺失部分使用内置默认值
pub fn merge_plan(items: &[Value]) -> Vec<PlannedStep> {
    ProcessStepId::ALL
        .iter()
        .map(|id| {
            let mut step = PlannedStep::default_for(*id);
            let Some(item) = items
                .iter()
                .find(|v| v.get("id").and_then(Value::as_str) == Some(id.as_str()))
            else {
                return step;
            };
            if let Some(objectives) = item.get("objectives").and_then(Value::as_array) {
                let objectives: Vec<String> = objectives
                    .iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect();
                if !objectives.is_empty() {
                    step.objectives = objectives;
                }
            }
            if let Some(expected) = item.get("expectedOutput").and_then(Value::as_str) {
                if !expected.trim().is_empty() {
                    step.expected_output = expected.to_string();
                }
            }
            step
        })
        .collect()
}

pub fn format_plan(plan: &[PlannedStep]) -> String {
    let mut text = String::from("## 五步问题解决流程计划\n\n");
    text.push_str("基于您的问题，我将按照以下五个步骤来解决:\n\n");
    for (i, step) in plan.iter().enumerate() {
        text.push_str(&format!("{}. **{}**: {}\n", i + 1, step.name, step.description));
        text.push_str(&format!("   - 目标: {}\n", step.objectives.join(", ")));
        text.push_str(&format!("   - 预期输出: {}\n\n", step.expected_output));
    }
    text.push_str("请确认是否按此计划执行？");
    text
}

fn phase_instructions(phase: ProcessStepId) -> &'static str {
    match phase {
        ProcessStepId::TaskClarification => {
            "请分析用户的核心需求与问题边界，澄清歧义并定义成功标准。\n\
             输出 JSON：{\"summary\":\"...\",\"details\":\"...\",\"successCriteria\":\"...\"}"
        }
        ProcessStepId::EnvironmentPerception => {
            "请结合棋局上下文与已明确的任务，收集解决问题所需的信息。\n\
             输出 JSON：{\"summary\":\"...\",\"details\":\"...\",\"contextAnalysis\":\"...\"}"
        }
        ProcessStepId::Planning => {
            "请根据任务与环境分析制定执行计划。executionSteps 必须是数组，每项为字符串，\n\
             或 {\"description\":\"...\",\"toolCall\":{\"name\":\"工具名称\",\"parameters\":{}}}。\n\
             输出 JSON：{\"summary\":\"...\",\"details\":\"...\",\"executionSteps\":[...]}"
        }
        ProcessStepId::Execution => {
            "以下是按计划执行的步骤与工具结果，请汇总执行情况与关键数据。\n\
             输出 JSON：{\"summary\":\"...\",\"details\":\"...\"}"
        }
        ProcessStepId::Observation => {
            "请评估执行结果，指出成功与不足之处并给出最终结论。\n\
             输出 JSON：{\"summary\":\"...\",\"details\":\"...\",\"conclusion\":\"...\"}"
        }
    }
}

/// 阶段 prompt：上下文结构体在这里才序列化为 JSON
pub fn phase_prompt(ctx: &PhaseContext, catalog_json: Option<&Value>) -> String {
    let context = serde_json::to_string_pretty(ctx).unwrap_or_default();
    let mut prompt = format!(
        "你是一个围棋助手，当前处于五步问题解决流程的「{}」阶段（{}）。\n\n",
        ctx.phase.name(),
        ctx.phase.as_str()
    );
    prompt.push_str(&format!("阶段上下文:\n{}\n\n", context));
    if let Some(tools) = catalog_json {
        let tools = serde_json::to_string_pretty(tools).unwrap_or_default();
        prompt.push_str(&format!("可用工具:\n{}\n\n", tools));
    }
    prompt.push_str(phase_instructions(ctx.phase));
    prompt
}

/// 解析阶段回复：JSON 对象原样保留，其余文本包装为 {summary, details}
pub fn parse_phase_body(reply: LlmReply) -> Value {
    let raw = match reply {
        LlmReply::Structured(v @ Value::Object(_)) => return v,
        LlmReply::Structured(Value::String(s)) => s,
        LlmReply::Structured(other) => other.to_string(),
        LlmReply::Text(text) => text,
    };
    match serde_json::from_str::<Value>(strip_code_fence(&raw)) {
        Ok(v @ Value::Object(_)) => v,
        _ => json!({"summary": raw, "details": raw}),
    }
}

/// 读取规划结果中的 executionSteps；缺失或格式不对返回 None
pub fn execution_steps(planning: &Value) -> Option<Vec<ExecutionStep>> {
    let steps = planning.get("executionSteps")?;
    serde_json::from_value(steps.clone()).ok()
}
