//! 状态定义：AgentPhase 状态机、历史记录、对话上下文与循环计数
//!
//! AgentState 只归 AgentSupervisor 所有；监听者只能拿到阶段值或 AgentStats 快照。

use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::error::ErrorRecord;

/// 编排器当前所处阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentPhase {
    Idle,
    Thinking,
    Acting,
    Observing,
    Error,
    Paused,
}

/// 历史记录条目类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    User,
    Thought,
    ToolCall,
    ToolResult,
}

/// 只追加的历史条目
#[derive(Clone, Debug, Serialize)]
pub struct HistoryEntry {
    pub kind: HistoryKind,
    pub payload: Value,
    /// Unix 毫秒时间戳
    pub timestamp: i64,
    pub step_index: u32,
}

/// 每次 run 设置一次的对话上下文；只有 last_tool_result 会在循环中被更新
#[derive(Clone, Debug, Serialize)]
pub struct ConversationContext {
    pub initial_message: String,
    /// 外部棋局状态，原样透传给工具与 LLM
    pub game_context: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_tool_result: Option<Value>,
}

/// 循环预算：步数、总时长、重试次数
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct LoopLimits {
    pub max_steps: u32,
    pub timeout_ms: u64,
    pub max_retries: u32,
}

impl Default for LoopLimits {
    fn default() -> Self {
        Self {
            max_steps: 20,
            timeout_ms: 300_000,
            max_retries: 3,
        }
    }
}

/// 单阶段超时：工具调用通常比纯推理慢，因此三者独立
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhaseTimeouts {
    pub think: Duration,
    pub act: Duration,
    pub observe: Duration,
}

impl Default for PhaseTimeouts {
    fn default() -> Self {
        Self {
            think: Duration::from_secs(60),
            act: Duration::from_secs(120),
            observe: Duration::from_secs(30),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AgentState {
    pub phase: AgentPhase,
    pub history: Vec<HistoryEntry>,
    pub conversation: Option<ConversationContext>,
    pub is_running: bool,
    pub execution_count: u32,
    pub limits: LoopLimits,
    pub start_time: Option<Instant>,
    pub retry_count: u32,
    pub last_error: Option<ErrorRecord>,
}

impl Default for AgentState {
    fn default() -> Self {
        Self::with_limits(LoopLimits::default())
    }
}

impl AgentState {
    pub fn with_limits(limits: LoopLimits) -> Self {
        Self {
            phase: AgentPhase::Idle,
            history: Vec::new(),
            conversation: None,
            is_running: false,
            execution_count: 0,
            limits,
            start_time: None,
            retry_count: 0,
            last_error: None,
        }
    }

    /// 清空一切运行痕迹，但保留上次配置的预算（与 run 的「未设置字段沿用旧值」一致）
    pub fn reset(&mut self) {
        *self = Self::with_limits(self.limits);
    }

    pub fn push_history(&mut self, kind: HistoryKind, payload: Value) {
        self.history.push(HistoryEntry {
            kind,
            payload,
            timestamp: chrono::Utc::now().timestamp_millis(),
            step_index: self.execution_count,
        });
    }

    pub fn game_context(&self) -> Value {
        self.conversation
            .as_ref()
            .map(|c| c.game_context.clone())
            .unwrap_or(Value::Null)
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.map(|t| t.elapsed()).unwrap_or_default()
    }

    pub fn is_timed_out(&self) -> bool {
        self.start_time.is_some() && self.elapsed() > Duration::from_millis(self.limits.timeout_ms)
    }

    pub fn stats(&self) -> AgentStats {
        AgentStats {
            phase: self.phase,
            execution_count: self.execution_count,
            max_steps: self.limits.max_steps,
            remaining_steps: self.limits.max_steps.saturating_sub(self.execution_count),
            elapsed_secs: self.elapsed().as_secs(),
            timeout_ms: self.limits.timeout_ms,
            retry_count: self.retry_count,
            max_retries: self.limits.max_retries,
            has_error: self.last_error.is_some(),
            last_error: self.last_error.clone(),
        }
    }
}

/// 每次外部调用（LLM / 工具）携带的上下文
///
/// cancel 在阶段超时或 reset 时被取消；愿意配合的实现可据此提前放弃后台工作。
#[derive(Clone, Debug)]
pub struct CallContext {
    pub game_context: Value,
    pub cancel: CancellationToken,
}

impl CallContext {
    pub fn new(game_context: Value, cancel: CancellationToken) -> Self {
        Self {
            game_context,
            cancel,
        }
    }
}

/// 执行统计快照（getStats）
#[derive(Clone, Debug, Serialize)]
pub struct AgentStats {
    pub phase: AgentPhase,
    pub execution_count: u32,
    pub max_steps: u32,
    pub remaining_steps: u32,
    pub elapsed_secs: u64,
    pub timeout_ms: u64,
    pub retry_count: u32,
    pub max_retries: u32,
    pub has_error: bool,
    pub last_error: Option<ErrorRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_keeps_limits_and_clears_history() {
        let mut state = AgentState::with_limits(LoopLimits {
            max_steps: 5,
            timeout_ms: 1_000,
            max_retries: 1,
        });
        state.execution_count = 4;
        state.push_history(HistoryKind::User, Value::String("hi".into()));
        state.phase = AgentPhase::Observing;

        state.reset();

        assert_eq!(state.limits.max_steps, 5);
        assert!(state.history.is_empty());
        assert_eq!(state.execution_count, 0);
        assert_eq!(state.phase, AgentPhase::Idle);
    }

    #[test]
    fn test_stats_remaining_steps_saturates() {
        let mut state = AgentState::default();
        state.execution_count = 25;
        assert_eq!(state.stats().remaining_steps, 0);
        assert!(!state.is_timed_out());
    }
}
