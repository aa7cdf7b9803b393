//! 五步流程引擎
//!
//! start 只生成待确认的计划；每个阶段由调用方通过 execute_process_step 显式驱动。
//! 阶段错误只影响当前阶段：已保存的结果不变，调用方可以重试同一个阶段。

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, AgentPhase, AgentSupervisor, CallContext, PhaseTimeouts};
use crate::llm::{LlmReply, LlmTransport};
use crate::react::loop_::with_phase_timeout;
use crate::tools::{ToolInvocationResult, ToolInvoker};
use crate::workflow::phases::{
    execution_steps, format_plan, merge_plan, parse_phase_body, parse_plan, phase_prompt,
    plan_prompt,
};
use crate::workflow::{
    ExecutionRecord, FiveStepState, NextButton, PhaseContext, PlannedStep, ProcessContext,
    ProcessPlan, ProcessStepId, StepOutcome,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// start 生成计划时的超时标签
const PLAN_STEP: &str = "plan";

/// 五步流程借用推理循环的计时器；超时改报为流程自己的步骤，避免与推理循环的 Thinking / Acting 混淆
fn step_timeout(step: &'static str, err: AgentError) -> AgentError {
    match err {
        AgentError::PhaseTimeout { timeout_ms, .. } => AgentError::ProcessStepTimeout { step, timeout_ms },
        other => other,
    }
}

/// 阶段 prompt 中引用哪些前序结果
fn context_inputs(phase: ProcessStepId) -> &'static [ProcessStepId] {
    match phase {
        ProcessStepId::TaskClarification => &[],
        ProcessStepId::EnvironmentPerception => &[ProcessStepId::TaskClarification],
        ProcessStepId::Planning => &[
            ProcessStepId::TaskClarification,
            ProcessStepId::EnvironmentPerception,
        ],
        ProcessStepId::Execution => &[ProcessStepId::Planning],
        ProcessStepId::Observation => &[ProcessStepId::Execution],
    }
}

pub struct FiveStepWorkflow {
    llm: Arc<dyn LlmTransport>,
    invoker: Arc<ToolInvoker>,
    timeouts: PhaseTimeouts,
    state: Mutex<FiveStepState>,
}

impl FiveStepWorkflow {
    pub fn new(llm: Arc<dyn LlmTransport>, invoker: Arc<ToolInvoker>, timeouts: PhaseTimeouts) -> Self {
        Self {
            llm,
            invoker,
            timeouts,
            state: Mutex::new(FiveStepState::default()),
        }
    }

    pub fn snapshot(&self) -> FiveStepState {
        lock(&self.state).clone()
    }

    pub fn process_context(&self) -> Option<ProcessContext> {
        lock(&self.state).process_context.clone()
    }

    pub fn reset(&self) {
        *lock(&self.state) = FiveStepState::default();
    }

    /// 生成五步计划，返回待人工确认的 ProcessPlan；失败时流程不会进入运行状态
    pub async fn start(
        &self,
        user_message: &str,
        game_context: Value,
        cancel: CancellationToken,
    ) -> Result<ProcessPlan, AgentError> {
        self.reset();
        let prompt = plan_prompt(user_message, &self.invoker.catalog().grouped_json());
        let reply = self.complete(PLAN_STEP, &prompt, &game_context, &cancel).await?;
        let items = parse_plan(reply).map_err(AgentError::ParseDecision)?;
        let plan = merge_plan(&items);

        {
            let mut state = lock(&self.state);
            state.is_running = true;
            state.step_plan = plan.clone();
            state.process_context = Some(ProcessContext {
                user_message: user_message.to_string(),
                game_context,
                step_plan: plan.clone(),
            });
        }
        tracing::info!(phases = plan.len(), "five-step plan generated, awaiting confirmation");

        Ok(ProcessPlan {
            content: format_plan(&plan),
            steps: plan,
            requires_human_confirmation: true,
            button: NextButton::to_step(0),
        })
    }

    /// 执行单个阶段；已有结果的阶段直接返回保存的结果
    pub async fn execute_process_step(
        &self,
        supervisor: &AgentSupervisor,
        step_index: usize,
        context: &ProcessContext,
        cancel: CancellationToken,
    ) -> Result<StepOutcome, AgentError> {
        let Some(planned) = context.step_plan.get(step_index).cloned() else {
            return Err(AgentError::StepIndexOutOfRange {
                index: step_index,
                len: context.step_plan.len(),
            });
        };
        let phase = planned.id;
        let is_last_step = step_index + 1 == context.step_plan.len();

        let results = lock(&self.state).step_results.clone();
        if let Some(stored) = results.get(&phase) {
            tracing::debug!(phase = phase.as_str(), "phase already completed, returning stored result");
            return Ok(outcome(step_index, &planned, stored, is_last_step));
        }
        if let Some(missing) = phase.prerequisites().iter().find(|p| !results.contains_key(*p)) {
            return Err(AgentError::MissingPrerequisite(format!(
                "phase {} requires a {} result",
                phase.as_str(),
                missing.as_str()
            )));
        }

        lock(&self.state).current_step = Some(phase);
        tracing::info!(phase = phase.as_str(), step_index, "executing five-step phase");

        let phase_ctx = PhaseContext {
            phase,
            user_message: context.user_message.clone(),
            game_context: context.game_context.clone(),
            plan: planned.clone(),
            prior_results: context_inputs(phase)
                .iter()
                .filter_map(|p| results.get(p).map(|r| (*p, r.clone())))
                .collect::<BTreeMap<_, _>>(),
            execution_results: Vec::new(),
        };

        let body = match phase {
            ProcessStepId::Execution => self.run_execution(supervisor, phase_ctx, &cancel).await,
            ProcessStepId::Planning => {
                let catalog = self.invoker.catalog().grouped_json();
                self.run_phase(&phase_ctx, Some(&catalog), &cancel).await
            }
            ProcessStepId::TaskClarification
            | ProcessStepId::EnvironmentPerception
            | ProcessStepId::Observation => self.run_phase(&phase_ctx, None, &cancel).await,
        };
        let body = match body {
            Ok(body) => body,
            Err(err) => {
                lock(&self.state).current_step = None;
                tracing::warn!(phase = phase.as_str(), error = %err, "five-step phase failed");
                return Err(err);
            }
        };

        let mut state = lock(&self.state);
        let stored = state.step_results.entry(phase).or_insert(body).clone();
        let result = outcome(step_index, &planned, &stored, is_last_step);
        state.current_step_result = Some(result.clone());
        if is_last_step {
            state.is_running = false;
            state.current_step = None;
        }
        Ok(result)
    }

    async fn run_phase(
        &self,
        ctx: &PhaseContext,
        catalog: Option<&Value>,
        cancel: &CancellationToken,
    ) -> Result<Value, AgentError> {
        let prompt = phase_prompt(ctx, catalog);
        let reply = self
            .complete(ctx.phase.as_str(), &prompt, &ctx.game_context, cancel)
            .await?;
        Ok(parse_phase_body(reply))
    }

    /// 执行阶段：先逐个执行规划给出的工具步骤（单个失败不影响其余），再请 LLM 汇总
    async fn run_execution(
        &self,
        supervisor: &AgentSupervisor,
        mut ctx: PhaseContext,
        cancel: &CancellationToken,
    ) -> Result<Value, AgentError> {
        let steps = ctx
            .prior_results
            .get(&ProcessStepId::Planning)
            .and_then(execution_steps)
            .ok_or_else(|| {
                AgentError::MissingPrerequisite(
                    "phase execution requires planning executionSteps".to_string(),
                )
            })?;

        let mut records = Vec::with_capacity(steps.len());
        for (step_index, step) in steps.iter().enumerate() {
            let mut record = ExecutionRecord {
                step_index,
                description: step.description().to_string(),
                tool: None,
                result: None,
                error: None,
            };
            if let Some(request) = step.tool_call() {
                record.tool = Some(request.name.clone());
                let invoked = with_phase_timeout(AgentPhase::Acting, self.timeouts.act, cancel, |token| async move {
                    Ok(self.invoker.invoke(supervisor, request.clone(), token).await)
                })
                .await
                .map_err(|e| step_timeout(ProcessStepId::Execution.as_str(), e));
                match invoked {
                    Ok(ToolInvocationResult::Continue { tool_result }) => record.result = Some(tool_result),
                    Ok(ToolInvocationResult::Failed(failure)) => record.error = Some(failure.message),
                    Err(err) => record.error = Some(err.to_string()),
                }
                if let Some(error) = &record.error {
                    tracing::warn!(tool = %request.name, %error, "execution step tool failed, continuing");
                }
            }
            records.push(record);
        }

        ctx.execution_results = records;
        let mut body = self.run_phase(&ctx, None, cancel).await?;
        if let Value::Object(map) = &mut body {
            map.insert(
                "executionResults".to_string(),
                serde_json::to_value(&ctx.execution_results).unwrap_or(Value::Null),
            );
        }
        Ok(body)
    }

    /// LLM 调用受 think 超时约束，超时报为 ProcessStepTimeout { step }
    async fn complete(
        &self,
        step: &'static str,
        prompt: &str,
        game_context: &Value,
        cancel: &CancellationToken,
    ) -> Result<LlmReply, AgentError> {
        with_phase_timeout(AgentPhase::Thinking, self.timeouts.think, cancel, |token| async move {
            let ctx = CallContext::new(game_context.clone(), token);
            self.llm
                .complete(prompt, &ctx)
                .await
                .map_err(|e| AgentError::Llm(e.to_string()))
        })
        .await
        .map_err(|e| step_timeout(step, e))
    }
}

fn outcome(step_index: usize, planned: &PlannedStep, result: &Value, is_last_step: bool) -> StepOutcome {
    StepOutcome {
        step_index,
        step_id: planned.id,
        step_name: planned.name.clone(),
        content: serde_json::to_string_pretty(result).unwrap_or_else(|_| result.to_string()),
        success: true,
        is_last_step,
        next_button: (!is_last_step).then(|| NextButton::to_step(step_index + 1)),
    }
}
