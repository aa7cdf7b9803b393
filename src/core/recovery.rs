//! 错误恢复引擎
//!
//! 根据 AgentError 类型与剩余重试预算返回 RecoveryAction，供推理循环决定重试、回到 Idle 还是终止。

use crate::core::{AgentError, RecoveryAction};
use crate::core::state::AgentState;

/// 将错误映射为可执行动作；Retry 会消耗一次 retry_count
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &AgentError, state: &mut AgentState) -> RecoveryAction {
        match err {
            // 没有模型无法继续推理，一次传输故障就停下，避免空转
            AgentError::Llm(_) => RecoveryAction::HaltToIdle,
            AgentError::ParseDecision(_)
            | AgentError::InvalidDecision(_)
            | AgentError::Tool(_)
            | AgentError::PhaseTimeout { .. }
            | AgentError::Unknown(_) => {
                if state.retry_count < state.limits.max_retries {
                    state.retry_count += 1;
                    tracing::warn!(
                        "Retrying operation... Attempt {}/{} ({})",
                        state.retry_count,
                        state.limits.max_retries,
                        err
                    );
                    RecoveryAction::Retry {
                        attempt: state.retry_count,
                        max: state.limits.max_retries,
                    }
                } else {
                    RecoveryAction::Abort
                }
            }
            _ => RecoveryAction::Abort,
        }
    }
}
