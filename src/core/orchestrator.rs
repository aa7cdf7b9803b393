//! Agent 编排器：对外门面
//!
//! 持有 AgentSupervisor（状态、监听者、错误处理器）、推理循环与五步流程，
//! 提供 run / stop / pause / resume / reset 等控制操作。每个实例同一时刻只允许一个 run 在进行。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::Instrument;

use crate::core::{
    AgentError, AgentPhase, AgentStats, AgentSupervisor, ConversationContext, ErrorHandler,
    ErrorKind, HistoryKind, LoopLimits, PhaseTimeouts, StateListener, SubscriptionId,
};
use crate::llm::LlmTransport;
use crate::react::{ReasoningLoop, Reply, ThoughtEngine};
use crate::tools::{ToolDescriptor, ToolDispatcher, ToolInvoker, ToolType};
use crate::workflow::{FiveStepState, FiveStepWorkflow, ProcessContext, ProcessPlan, StepOutcome};

/// run 的可选参数；未设置的字段沿用上一次的值（初始为配置默认值）
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub max_steps: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub enable_five_step_process: Option<bool>,
}

/// run / resume 的结果：回复、待确认的五步计划，或错误
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RunOutcome {
    Reply(Reply),
    ProcessPlan(ProcessPlan),
    Failed {
        #[serde(rename = "error")]
        message: String,
        kind: ErrorKind,
    },
}

impl RunOutcome {
    pub fn failed(err: &AgentError) -> Self {
        RunOutcome::Failed {
            message: err.to_string(),
            kind: err.kind(),
        }
    }

    pub fn content(&self) -> Option<&str> {
        match self {
            RunOutcome::Reply(reply) => Some(&reply.content),
            RunOutcome::ProcessPlan(plan) => Some(&plan.content),
            RunOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            RunOutcome::Failed { message, .. } => Some(message),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, RunOutcome::Failed { .. })
    }
}

/// 同一实例上的 in-flight 标记；drop 时释放
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, AgentError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| InFlight(flag))
            .map_err(|_| AgentError::Busy)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct AgentOrchestrator {
    supervisor: AgentSupervisor,
    reasoning: ReasoningLoop,
    workflow: FiveStepWorkflow,
    invoker: Arc<ToolInvoker>,
    five_step_default: AtomicBool,
    in_flight: AtomicBool,
}

impl AgentOrchestrator {
    pub fn new(
        llm: Arc<dyn LlmTransport>,
        dispatcher: Arc<dyn ToolDispatcher>,
        limits: LoopLimits,
        timeouts: PhaseTimeouts,
    ) -> Self {
        let invoker = Arc::new(ToolInvoker::new(dispatcher.clone()));
        Self {
            supervisor: AgentSupervisor::new(limits),
            reasoning: ReasoningLoop::new(
                ThoughtEngine::new(llm.clone(), dispatcher),
                invoker.clone(),
                timeouts,
            ),
            workflow: FiveStepWorkflow::new(llm, invoker.clone(), timeouts),
            invoker,
            five_step_default: AtomicBool::new(false),
            in_flight: AtomicBool::new(false),
        }
    }

    /// run 未指定 enable_five_step_process 时的默认值
    pub fn set_five_step_default(&self, enabled: bool) {
        self.five_step_default.store(enabled, Ordering::Relaxed);
    }

    /// 处理一条用户消息
    ///
    /// 开始前完整重置状态；协作模式或 enable_five_step_process 时返回待确认的五步计划，
    /// 否则驱动推理循环直到回复或终止。
    pub async fn run(&self, message: &str, game_context: Value, options: RunOptions) -> RunOutcome {
        let _guard = match InFlight::acquire(&self.in_flight) {
            Ok(guard) => guard,
            Err(err) => {
                tracing::warn!("run rejected: another run is in flight");
                return RunOutcome::failed(&err);
            }
        };

        let span = tracing::info_span!("run", run_id = %uuid::Uuid::new_v4());
        async move {
            let cancel = self.reset_state();
            if let Some(enabled) = options.enable_five_step_process {
                self.set_five_step_default(enabled);
            }
            let five_step = self.five_step_default.load(Ordering::Relaxed)
                || self.supervisor.human_collaboration();

            self.supervisor.with_state(|s| {
                if let Some(v) = options.max_steps {
                    s.limits.max_steps = v;
                }
                if let Some(v) = options.timeout_ms {
                    s.limits.timeout_ms = v;
                }
                if let Some(v) = options.max_retries {
                    s.limits.max_retries = v;
                }
                s.start_time = Some(std::time::Instant::now());
                s.conversation = Some(ConversationContext {
                    initial_message: message.to_string(),
                    game_context: game_context.clone(),
                    last_tool_result: None,
                });
                s.push_history(HistoryKind::User, Value::String(message.to_string()));
                s.is_running = !five_step;
            });
            tracing::info!(five_step, "run started");

            let outcome = if five_step {
                match self.workflow.start(message, game_context, cancel).await {
                    Ok(plan) => RunOutcome::ProcessPlan(plan),
                    Err(err) => {
                        self.supervisor.report_error(&err);
                        RunOutcome::failed(&err)
                    }
                }
            } else {
                match self.reasoning.drive(&self.supervisor, cancel).await {
                    Ok(reply) => RunOutcome::Reply(reply),
                    Err(err) => RunOutcome::failed(&err),
                }
            };
            tracing::info!(failed = outcome.is_failed(), "run finished");
            outcome
        }
        .instrument(span)
        .await
    }

    /// 停止：清除运行标志并进入 Paused；进行中的外部调用会跑完，但循环不再进入下一阶段
    ///
    /// 没有运行中的推理循环时不做任何事，之后的 resume 返回 NothingToResume。
    pub fn stop(&self) {
        if self.supervisor.pause() {
            tracing::info!("stop requested");
        } else {
            tracing::debug!("stop ignored: reasoning loop not running");
        }
    }

    pub fn pause(&self) {
        if self.supervisor.pause() {
            tracing::info!("pause requested");
        } else {
            tracing::debug!("pause ignored: reasoning loop not running");
        }
    }

    /// 从迭代守卫处继续被暂停的推理循环；暂停时未完成的阶段不会恢复
    pub async fn resume(&self) -> RunOutcome {
        let _guard = match InFlight::acquire(&self.in_flight) {
            Ok(guard) => guard,
            Err(err) => return RunOutcome::failed(&err),
        };
        let resumable = self
            .supervisor
            .with_state(|s| s.phase == AgentPhase::Paused && s.conversation.is_some());
        if !resumable {
            return RunOutcome::failed(&AgentError::NothingToResume);
        }

        tracing::info!("resuming reasoning loop");
        self.supervisor.with_state(|s| s.is_running = true);
        match self
            .reasoning
            .drive(&self.supervisor, self.supervisor.cancel_token())
            .await
        {
            Ok(reply) => RunOutcome::Reply(reply),
            Err(err) => RunOutcome::failed(&err),
        }
    }

    /// 清空历史、计数与错误并回到 Idle；连续调用与调用一次等价
    pub fn reset(&self) {
        self.reset_state();
    }

    fn reset_state(&self) -> tokio_util::sync::CancellationToken {
        let cancel = self.supervisor.renew_cancel_token();
        // 阶段保留到 transition 再切换，监听者才能收到 (Idle, old)
        let old = self.supervisor.with_state(|s| {
            let old = s.phase;
            s.reset();
            s.phase = old;
            old
        });
        if old != AgentPhase::Idle {
            self.supervisor.transition(AgentPhase::Idle);
        }
        cancel
    }

    /// 执行五步流程的某个阶段；context 为空时使用 start 建立的上下文
    pub async fn execute_process_step(
        &self,
        step_index: usize,
        context: Option<ProcessContext>,
    ) -> Result<StepOutcome, AgentError> {
        let _guard = InFlight::acquire(&self.in_flight)?;
        let context = context
            .or_else(|| self.workflow.process_context())
            .ok_or_else(|| AgentError::MissingPrerequisite("five-step process not started".to_string()))?;
        self.workflow
            .execute_process_step(&self.supervisor, step_index, &context, self.supervisor.cancel_token())
            .await
    }

    pub fn get_stats(&self) -> AgentStats {
        self.supervisor.stats()
    }

    pub fn get_five_step_process_state(&self) -> FiveStepState {
        self.workflow.snapshot()
    }

    pub fn reset_five_step_process(&self) {
        self.workflow.reset();
    }

    pub fn set_human_collaboration_enabled(&self, enabled: bool) {
        tracing::info!(enabled, "human collaboration mode changed");
        self.supervisor.set_human_collaboration(enabled);
    }

    pub fn human_collaboration_enabled(&self) -> bool {
        self.supervisor.human_collaboration()
    }

    pub fn phase(&self) -> AgentPhase {
        self.supervisor.phase()
    }

    /// 历史与对话上下文的只读快照
    pub fn state_snapshot(&self) -> crate::core::AgentState {
        self.supervisor.snapshot()
    }

    pub fn add_state_listener(&self, listener: StateListener) -> SubscriptionId {
        self.supervisor.add_state_listener(listener)
    }

    pub fn remove_state_listener(&self, id: SubscriptionId) -> bool {
        self.supervisor.remove_state_listener(id)
    }

    pub fn add_error_handler(&self, handler: ErrorHandler) -> SubscriptionId {
        self.supervisor.add_error_handler(handler)
    }

    pub fn remove_error_handler(&self, id: SubscriptionId) -> bool {
        self.supervisor.remove_error_handler(id)
    }

    pub fn available_tools(&self, filter: Option<ToolType>) -> Vec<ToolDescriptor> {
        self.invoker
            .catalog()
            .available(filter)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn tools_by_type(&self) -> Vec<(ToolType, Vec<ToolDescriptor>)> {
        self.invoker
            .catalog()
            .grouped()
            .into_iter()
            .map(|(ty, tools)| (ty, tools.into_iter().cloned().collect()))
            .collect()
    }

    pub fn format_tools_list(&self, detailed: bool) -> String {
        self.invoker.catalog().format_list(detailed)
    }

    pub fn tool_details(&self, name: &str) -> Option<String> {
        self.invoker.catalog().details(name)
    }
}
