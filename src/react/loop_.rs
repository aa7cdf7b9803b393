//! 推理主循环
//!
//! Thinking -> Acting -> Observing -> 下一轮 Thinking 或终止；受最大步数、总时长与单阶段超时约束。
//! 失败交给 RecoveryEngine：重试时不增加 execution_count，预算耗尽即终止。
//! stop / pause 不打断进行中的外部调用，只在下一个阶段边界生效。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::{
    AgentError, AgentPhase, AgentSupervisor, HistoryKind, PhaseTimeouts, RecoveryAction,
    RecoveryEngine,
};
use crate::react::{Decision, ThoughtEngine};
use crate::tools::{ToolInvocationResult, ToolInvoker};

const NO_RESPONSE_CONTENT: &str = "No response content";
const CLARIFICATION_FALLBACK: &str = "需要更多信息";
const UNRECOGNIZED_FALLBACK: &str = "抱歉，我无法理解您的问题";

/// 循环的终止回复
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Reply {
    pub content: String,
    #[serde(rename = "needsClarification", skip_serializing_if = "std::ops::Not::not")]
    pub needs_clarification: bool,
}

impl Reply {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            needs_clarification: false,
        }
    }
}

/// Acting 阶段的产出
#[derive(Clone, Debug, PartialEq)]
enum ActionResult {
    /// 工具成功，继续推理
    ToolResult(Value),
    Terminal(Reply),
}

/// 一轮迭代的结果
enum Iteration {
    Continue,
    Done(Reply),
}

pub struct ReasoningLoop {
    thought: ThoughtEngine,
    invoker: Arc<ToolInvoker>,
    recovery: RecoveryEngine,
    timeouts: PhaseTimeouts,
}

impl ReasoningLoop {
    pub fn new(thought: ThoughtEngine, invoker: Arc<ToolInvoker>, timeouts: PhaseTimeouts) -> Self {
        Self {
            thought,
            invoker,
            recovery: RecoveryEngine::new(),
            timeouts,
        }
    }

    /// 从迭代守卫开始驱动循环，直到得到回复或终止性错误
    ///
    /// 调用前 AgentState 已由调用方初始化（user 历史、对话上下文、is_running）。
    /// 返回 Err 之前已经完成了错误上报与阶段迁移。
    pub async fn drive(
        &self,
        supervisor: &AgentSupervisor,
        cancel: CancellationToken,
    ) -> Result<Reply, AgentError> {
        let mut retrying = false;
        loop {
            let err = match self.iterate(supervisor, &cancel, retrying).await {
                Ok(Iteration::Done(reply)) => {
                    supervisor.with_state(|s| s.is_running = false);
                    supervisor.transition(AgentPhase::Idle);
                    return Ok(reply);
                }
                Ok(Iteration::Continue) => {
                    retrying = false;
                    continue;
                }
                Err(err) => err,
            };

            if err == AgentError::Stopped {
                tracing::info!("reasoning loop stopped at phase boundary");
                return Err(err);
            }

            let action = supervisor.with_state(|s| self.recovery.handle(&err, s));
            match action {
                RecoveryAction::Retry { .. } => {
                    retrying = true;
                }
                RecoveryAction::HaltToIdle => {
                    // ThoughtEngine 已经回到 Idle
                    supervisor.report_error(&err);
                    return Err(err);
                }
                RecoveryAction::Abort => {
                    supervisor.fail(&err);
                    return Err(err);
                }
            }
        }
    }

    async fn iterate(
        &self,
        supervisor: &AgentSupervisor,
        cancel: &CancellationToken,
        retrying: bool,
    ) -> Result<Iteration, AgentError> {
        let (count, limits, timed_out) =
            supervisor.with_state(|s| (s.execution_count, s.limits, s.is_timed_out()));
        ensure_running(supervisor)?;
        if timed_out {
            return Err(AgentError::WallClockTimeout {
                timeout_ms: limits.timeout_ms,
            });
        }

        // 重试沿用当前步，不占用新的步数
        if !retrying {
            if count >= limits.max_steps {
                return Err(AgentError::StepLimitExceeded {
                    max_steps: limits.max_steps,
                });
            }
            supervisor.with_state(|s| s.execution_count += 1);
        }

        supervisor.transition(AgentPhase::Thinking);
        let decision = with_phase_timeout(AgentPhase::Thinking, self.timeouts.think, cancel, |token| {
            self.thought.think(supervisor, token)
        })
        .await?;

        ensure_running(supervisor)?;
        supervisor.transition(AgentPhase::Acting);
        let action = with_phase_timeout(AgentPhase::Acting, self.timeouts.act, cancel, |token| {
            self.act(supervisor, decision, token)
        })
        .await?;

        ensure_running(supervisor)?;
        supervisor.transition(AgentPhase::Observing);
        with_phase_timeout(AgentPhase::Observing, self.timeouts.observe, cancel, |_| async move {
            Ok(observe(supervisor, action))
        })
        .await
    }

    async fn act(
        &self,
        supervisor: &AgentSupervisor,
        decision: Decision,
        cancel: CancellationToken,
    ) -> Result<ActionResult, AgentError> {
        match decision {
            Decision::ToolCall(request) => {
                match self.invoker.invoke(supervisor, request, cancel).await {
                    ToolInvocationResult::Continue { tool_result } => {
                        Ok(ActionResult::ToolResult(tool_result))
                    }
                    ToolInvocationResult::Failed(failure) => Err(AgentError::Tool(failure.message)),
                }
            }
            Decision::Respond { content } => Ok(ActionResult::Terminal(Reply::new(
                content.unwrap_or_else(|| NO_RESPONSE_CONTENT.to_string()),
            ))),
            Decision::AskClarification { content } => Ok(ActionResult::Terminal(Reply {
                content: content.unwrap_or_else(|| CLARIFICATION_FALLBACK.to_string()),
                needs_clarification: true,
            })),
            Decision::Unrecognized { action, content } => {
                tracing::warn!(%action, "unrecognized decision action, answering with fallback");
                Ok(ActionResult::Terminal(Reply::new(
                    content.unwrap_or_else(|| UNRECOGNIZED_FALLBACK.to_string()),
                )))
            }
        }
    }
}

/// Observing：工具结果写入历史与对话上下文，并重置重试预算
fn observe(supervisor: &AgentSupervisor, action: ActionResult) -> Iteration {
    match action {
        ActionResult::Terminal(reply) => Iteration::Done(reply),
        ActionResult::ToolResult(tool_result) => {
            supervisor.with_state(|s| {
                s.push_history(HistoryKind::ToolResult, tool_result.clone());
                if let Some(conversation) = s.conversation.as_mut() {
                    conversation.last_tool_result = Some(tool_result);
                }
                s.retry_count = 0;
            });
            Iteration::Continue
        }
    }
}

fn ensure_running(supervisor: &AgentSupervisor) -> Result<(), AgentError> {
    if supervisor.is_running() {
        Ok(())
    } else {
        Err(AgentError::Stopped)
    }
}

/// 单阶段超时：计时器到期即丢弃后续逻辑，并取消交给外部调用的子令牌
///
/// 父令牌被取消（reset）时同样立即返回 Stopped。
pub(crate) async fn with_phase_timeout<T, F, Fut>(
    phase: AgentPhase,
    limit: Duration,
    cancel: &CancellationToken,
    f: F,
) -> Result<T, AgentError>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T, AgentError>>,
{
    let child = cancel.child_token();
    let fut = f(child.clone());
    tokio::select! {
        res = tokio::time::timeout(limit, fut) => match res {
            Ok(inner) => inner,
            Err(_) => {
                child.cancel();
                tracing::warn!(?phase, timeout_ms = limit.as_millis() as u64, "phase timed out");
                Err(AgentError::PhaseTimeout {
                    phase,
                    timeout_ms: limit.as_millis() as u64,
                })
            }
        },
        _ = cancel.cancelled() => Err(AgentError::Stopped),
    }
}
