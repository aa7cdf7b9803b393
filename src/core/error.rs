//! Agent 错误类型、错误分类与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 AgentError 与剩余重试次数决定 Retry / HaltToIdle / Abort。

use serde::Serialize;
use thiserror::Error;

use crate::core::state::AgentPhase;

/// 编排器对外暴露的错误分类（序列化为 llm_error / tool_error / ...）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    LlmError,
    ToolError,
    ValidationError,
    TimeoutError,
    UnknownError,
}

/// Agent 运行过程中可能出现的错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    /// LLM 传输层失败（网络、API）
    #[error("LLM error: {0}")]
    Llm(String),

    /// LLM 返回内容无法解析为决策
    #[error("failed to parse LLM decision: {0}")]
    ParseDecision(String),

    /// 决策结构不合法（如 tool_call 缺少工具名）
    #[error("invalid decision: {0}")]
    InvalidDecision(String),

    #[error("{0}")]
    Tool(String),

    #[error("Maximum execution steps ({max_steps}) reached")]
    StepLimitExceeded { max_steps: u32 },

    #[error("Execution timed out after {timeout_ms}ms")]
    WallClockTimeout { timeout_ms: u64 },

    #[error("{phase:?} phase timed out after {timeout_ms}ms")]
    PhaseTimeout { phase: AgentPhase, timeout_ms: u64 },

    /// 五步流程中的 LLM / 工具调用超时；step 为 plan 或阶段 id
    #[error("five-step {step} step timed out after {timeout_ms}ms")]
    ProcessStepTimeout { step: &'static str, timeout_ms: u64 },

    #[error("step index {index} is out of range (plan has {len} steps)")]
    StepIndexOutOfRange { index: usize, len: usize },

    #[error("missing prerequisite: {0}")]
    MissingPrerequisite(String),

    #[error("orchestrator busy")]
    Busy,

    #[error("nothing to resume")]
    NothingToResume,

    #[error("Agent execution stopped")]
    Stopped,

    #[error("{0}")]
    Unknown(String),
}

impl AgentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::Llm(_) | AgentError::ParseDecision(_) => ErrorKind::LlmError,
            AgentError::Tool(_) => ErrorKind::ToolError,
            AgentError::InvalidDecision(_)
            | AgentError::StepIndexOutOfRange { .. }
            | AgentError::MissingPrerequisite(_)
            | AgentError::Busy
            | AgentError::NothingToResume => ErrorKind::ValidationError,
            AgentError::StepLimitExceeded { .. }
            | AgentError::WallClockTimeout { .. }
            | AgentError::PhaseTimeout { .. }
            | AgentError::ProcessStepTimeout { .. } => ErrorKind::TimeoutError,
            AgentError::Stopped | AgentError::Unknown(_) => ErrorKind::UnknownError,
        }
    }
}

/// 错误发生时的编排器上下文
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ErrorContext {
    pub phase: AgentPhase,
    pub execution_count: u32,
}

/// 结构化错误记录：写入 last_error 并推送给所有 error handler
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    /// Unix 毫秒时间戳
    pub timestamp: i64,
    pub context: ErrorContext,
}

impl ErrorRecord {
    pub fn new(err: &AgentError, context: ErrorContext) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            stack: None,
            timestamp: chrono::Utc::now().timestamp_millis(),
            context,
        }
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 重新开始当前迭代（不增加执行步数）
    Retry { attempt: u32, max: u32 },
    /// 没有模型无法继续推理：停止循环并回到 Idle
    HaltToIdle,
    /// 终止当前任务
    Abort,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_variants_share_kind_but_differ() {
        let steps = AgentError::StepLimitExceeded { max_steps: 3 };
        let wall = AgentError::WallClockTimeout { timeout_ms: 10 };
        let phase = AgentError::PhaseTimeout {
            phase: AgentPhase::Thinking,
            timeout_ms: 60_000,
        };
        for err in [&steps, &wall, &phase] {
            assert_eq!(err.kind(), ErrorKind::TimeoutError);
        }
        assert_ne!(steps, wall);
        assert_eq!(steps.to_string(), "Maximum execution steps (3) reached");
        assert!(phase.to_string().contains("Thinking"));
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::ValidationError).unwrap();
        assert_eq!(json, "\"validation_error\"");
    }
}
