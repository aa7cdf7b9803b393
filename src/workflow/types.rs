//! 五步流程类型定义
//!
//! 阶段身份是常量，顺序固定；LLM 只负责细化每个阶段的目标与预期输出。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::ToolRequest;

static ORDER: [ProcessStepId; 5] = ProcessStepId::ALL;

/// 五个固定阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStepId {
    TaskClarification,
    EnvironmentPerception,
    Planning,
    Execution,
    Observation,
}

impl ProcessStepId {
    pub const ALL: [ProcessStepId; 5] = [
        ProcessStepId::TaskClarification,
        ProcessStepId::EnvironmentPerception,
        ProcessStepId::Planning,
        ProcessStepId::Execution,
        ProcessStepId::Observation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProcessStepId::TaskClarification => "task_clarification",
            ProcessStepId::EnvironmentPerception => "environment_perception",
            ProcessStepId::Planning => "planning",
            ProcessStepId::Execution => "execution",
            ProcessStepId::Observation => "observation",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == id)
    }

    pub fn name(self) -> &'static str {
        match self {
            ProcessStepId::TaskClarification => "明确任务",
            ProcessStepId::EnvironmentPerception => "感知环境",
            ProcessStepId::Planning => "思考规划",
            ProcessStepId::Execution => "执行行动",
            ProcessStepId::Observation => "观察迭代",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ProcessStepId::TaskClarification => "理解和澄清用户请求",
            ProcessStepId::EnvironmentPerception => "收集相关信息和上下文",
            ProcessStepId::Planning => "制定解决方案和执行计划",
            ProcessStepId::Execution => "按照计划执行具体操作",
            ProcessStepId::Observation => "评估结果并根据需要调整",
        }
    }

    fn default_objectives(self) -> &'static [&'static str] {
        match self {
            ProcessStepId::TaskClarification => &[
                "分析用户的核心需求",
                "识别问题的边界和范围",
                "澄清任何可能的歧义或假设",
                "定义成功标准",
            ],
            ProcessStepId::EnvironmentPerception => &[
                "分析当前棋盘状态",
                "识别相关的上下文信息",
                "收集解决问题所需的信息",
            ],
            ProcessStepId::Planning => &["提出解决思路", "设计具体的执行步骤", "评估可能的风险"],
            ProcessStepId::Execution => &[
                "执行计划中的关键操作",
                "应用适当的工具和方法",
                "记录执行过程和结果",
            ],
            ProcessStepId::Observation => &["评估执行结果", "识别成功和不足之处", "提供改进建议"],
        }
    }

    fn default_expected_output(self) -> &'static str {
        match self {
            ProcessStepId::TaskClarification => "对任务的清晰理解和成功标准",
            ProcessStepId::EnvironmentPerception => "完整的环境分析报告",
            ProcessStepId::Planning => "详细的行动计划和执行步骤",
            ProcessStepId::Execution => "操作执行结果和关键数据",
            ProcessStepId::Observation => "最终评估和总结报告",
        }
    }

    pub fn index(self) -> usize {
        Self::ALL.iter().position(|s| *s == self).unwrap_or_default()
    }

    /// 本阶段之前的所有阶段（执行前必须都已有结果）
    pub fn prerequisites(self) -> &'static [ProcessStepId] {
        &ORDER[..self.index()]
    }
}

/// 细化后的阶段计划
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedStep {
    pub id: ProcessStepId,
    pub name: String,
    pub description: String,
    pub objectives: Vec<String>,
    pub expected_output: String,
}

impl PlannedStep {
    pub fn default_for(id: ProcessStepId) -> Self {
        Self {
            id,
            name: id.name().to_string(),
            description: id.description().to_string(),
            objectives: id.default_objectives().iter().map(|s| s.to_string()).collect(),
            expected_output: id.default_expected_output().to_string(),
        }
    }
}

/// 「继续下一阶段」按钮
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NextButton {
    pub action: String,
    pub next_step_index: usize,
}

impl NextButton {
    pub fn to_step(next_step_index: usize) -> Self {
        Self {
            action: "continueFiveStepProcess".to_string(),
            next_step_index,
        }
    }
}

/// start 的返回：待人工确认的流程计划
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessPlan {
    /// 给用户看的计划文本
    pub content: String,
    pub steps: Vec<PlannedStep>,
    pub requires_human_confirmation: bool,
    pub button: NextButton,
}

/// 流程上下文：由 start 建立，execute_process_step 时传回
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessContext {
    pub user_message: String,
    #[serde(default)]
    pub game_context: Value,
    pub step_plan: Vec<PlannedStep>,
}

/// 规划阶段给出的执行步骤：纯文本，或附带工具调用
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExecutionStep {
    Text(String),
    Detailed {
        description: String,
        #[serde(rename = "toolCall", default, skip_serializing_if = "Option::is_none")]
        tool_call: Option<ToolRequest>,
    },
}

impl ExecutionStep {
    pub fn description(&self) -> &str {
        match self {
            ExecutionStep::Text(s) => s,
            ExecutionStep::Detailed { description, .. } => description,
        }
    }

    pub fn tool_call(&self) -> Option<&ToolRequest> {
        match self {
            ExecutionStep::Text(_) => None,
            ExecutionStep::Detailed { tool_call, .. } => tool_call.as_ref(),
        }
    }
}

/// 执行阶段中单个步骤的记录；工具失败只记在 error 中，不影响其余步骤
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub step_index: usize,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 单阶段 prompt 的强类型上下文，只在传给 LLM 时序列化
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseContext {
    pub phase: ProcessStepId,
    pub user_message: String,
    pub game_context: Value,
    pub plan: PlannedStep,
    /// 前序阶段结果
    pub prior_results: BTreeMap<ProcessStepId, Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub execution_results: Vec<ExecutionRecord>,
}

/// execute_process_step 的返回
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutcome {
    pub step_index: usize,
    pub step_id: ProcessStepId,
    pub step_name: String,
    /// 阶段结果的格式化 JSON
    pub content: String,
    pub success: bool,
    pub is_last_step: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_button: Option<NextButton>,
}

/// 五步流程状态；每次进入流程模式时重建
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FiveStepState {
    pub is_running: bool,
    pub current_step: Option<ProcessStepId>,
    /// 由 start 写入一次后不再变化
    pub step_plan: Vec<PlannedStep>,
    /// 阶段结果只写一次
    pub step_results: BTreeMap<ProcessStepId, Value>,
    pub process_context: Option<ProcessContext>,
    pub current_step_result: Option<StepOutcome>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fixed_order_and_prerequisites() {
        let ids: Vec<&str> = ProcessStepId::ALL.iter().map(|s| s.as_str()).collect();
        assert_eq!(
            ids,
            vec!["task_clarification", "environment_perception", "planning", "execution", "observation"]
        );
        assert!(ProcessStepId::TaskClarification.prerequisites().is_empty());
        assert_eq!(
            ProcessStepId::Execution.prerequisites(),
            &[
                ProcessStepId::TaskClarification,
                ProcessStepId::EnvironmentPerception,
                ProcessStepId::Planning
            ]
        );
        assert_eq!(ProcessStepId::from_id("planning"), Some(ProcessStepId::Planning));
        assert_eq!(ProcessStepId::from_id("plan"), None);
    }

    #[test]
    fn test_execution_steps_accept_text_and_tool_calls() {
        let steps: Vec<ExecutionStep> = serde_json::from_value(json!([
            "读取棋盘",
            {"description": "获取棋盘上下文", "toolCall": {"name": "board_context", "parameters": {"maxLength": 0}}}
        ]))
        .unwrap();
        assert_eq!(steps[0].description(), "读取棋盘");
        assert!(steps[0].tool_call().is_none());
        assert_eq!(steps[1].tool_call().map(|t| t.name.as_str()), Some("board_context"));
    }

    #[test]
    fn test_step_results_serialize_with_phase_ids() {
        let mut state = FiveStepState::default();
        state.step_results.insert(ProcessStepId::Planning, json!({"summary": "x"}));
        let v = serde_json::to_value(&state).unwrap();
        assert_eq!(v["stepResults"]["planning"]["summary"], "x");
        assert_eq!(v["isRunning"], false);
    }
}
