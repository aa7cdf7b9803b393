//! 五步流程集成测试：通过编排器门面生成计划并逐阶段执行

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use goban_agent::config::AppConfig;
use goban_agent::core::{AgentError, AgentPhase, CallContext, HistoryKind};
use goban_agent::llm::{KeywordLlm, LlmError, LlmReply, LlmTransport};
use goban_agent::tools::{Tool, ToolType};
use goban_agent::workflow::{NextButton, ProcessStepId};
use goban_agent::{AgentOrchestrator, OrchestratorBuilder, RunOptions, RunOutcome};
use serde_json::{json, Value};

/// 人机协作工具：记录收到的参数
struct AskPlayer {
    seen: Arc<Mutex<Vec<Value>>>,
}

#[async_trait]
impl Tool for AskPlayer {
    fn name(&self) -> &str {
        "ask_player"
    }

    fn description(&self) -> &str {
        "ask the player to choose between candidate moves"
    }

    fn tool_type(&self) -> ToolType {
        ToolType::HumanCollaboration
    }

    async fn execute(&self, params: Value, _ctx: &CallContext) -> Result<Value, String> {
        self.seen.lock().unwrap().push(params);
        Ok(json!({"choice": "C4"}))
    }
}

fn phase_llm() -> KeywordLlm {
    KeywordLlm::new()
        .on("五个固定阶段", json!({"steps": [{"id": "observation", "objectives": ["复盘"]}]}))
        .on("（task_clarification）", json!({"summary": "给出下一手", "details": "白棋行棋"}))
        .on("（environment_perception）", json!({"summary": "左上角有劫", "details": "劫材充足"}))
        .on(
            "（planning）",
            json!({
                "summary": "读盘后询问棋手",
                "executionSteps": [
                    {"description": "读取棋局", "toolCall": {"name": "board_context", "parameters": {}}},
                    {"description": "询问棋手", "toolCall": {"name": "ask_player", "parameters": {"candidates": ["C4", "D4"]}}},
                ]
            }),
        )
        .on("（execution）", json!({"summary": "棋手选择 C4"}))
        .on("（observation）", "结论：C4")
}

fn build(llm: Arc<KeywordLlm>, seen: Arc<Mutex<Vec<Value>>>) -> AgentOrchestrator {
    OrchestratorBuilder::new(AppConfig::default())
        .with_llm(llm)
        .with_tool(AskPlayer { seen })
        .build()
}

#[tokio::test]
async fn test_five_step_run_then_phases_in_order() {
    let llm = Arc::new(phase_llm());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let orch = build(llm.clone(), seen.clone());
    let transitions = Arc::new(Mutex::new(0usize));
    let t = transitions.clone();
    orch.add_state_listener(Arc::new(move |_, _| *t.lock().unwrap() += 1));

    let outcome = orch
        .run(
            "下一手下哪里？",
            json!({"to_play": "white"}),
            RunOptions {
                enable_five_step_process: Some(true),
                ..RunOptions::default()
            },
        )
        .await;

    let plan = match outcome {
        RunOutcome::ProcessPlan(plan) => plan,
        other => panic!("expected a process plan, got {:?}", other),
    };
    assert!(plan.requires_human_confirmation);
    assert_eq!(plan.button, NextButton::to_step(0));
    let ids: Vec<ProcessStepId> = plan.steps.iter().map(|s| s.id).collect();
    assert_eq!(ids, ProcessStepId::ALL.to_vec());
    assert_eq!(plan.steps[4].objectives, vec!["复盘"]);
    assert!(plan.content.contains("请确认是否按此计划执行？"));

    // 五步模式不驱动推理循环
    assert_eq!(orch.phase(), AgentPhase::Idle);
    assert_eq!(*transitions.lock().unwrap(), 0);
    assert!(!orch.state_snapshot().is_running);
    assert!(orch.get_five_step_process_state().is_running);

    for index in 0..5 {
        let step = orch.execute_process_step(index, None).await.unwrap();
        assert_eq!(step.step_id, ProcessStepId::ALL[index]);
        assert!(step.success);
        assert_eq!(step.is_last_step, index == 4);
    }

    let state = orch.get_five_step_process_state();
    assert!(!state.is_running);
    assert_eq!(state.step_results.len(), 5);
    assert_eq!(
        state.step_results[&ProcessStepId::Observation],
        json!({"summary": "结论：C4", "details": "结论：C4"})
    );
    let records = state.step_results[&ProcessStepId::Execution]["executionResults"]
        .as_array()
        .unwrap()
        .clone();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r["error"].is_null()));
    assert_eq!(records[1]["result"], json!({"choice": "C4"}));

    // 协作模式未开启时不注入 humanCollaborationRequired
    assert!(seen.lock().unwrap()[0].get("humanCollaborationRequired").is_none());

    // 执行阶段的 prompt 带着工具执行记录
    let execution_prompt = llm
        .prompts()
        .into_iter()
        .find(|p| p.contains("（execution）"))
        .unwrap();
    assert!(execution_prompt.contains("读盘后询问棋手"));
    assert_eq!(
        orch.state_snapshot()
            .history
            .iter()
            .filter(|e| e.kind == HistoryKind::ToolCall)
            .count(),
        2
    );
}

#[tokio::test]
async fn test_out_of_order_phase_is_rejected_and_recoverable() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let orch = build(Arc::new(phase_llm()), seen);
    orch.run(
        "q",
        Value::Null,
        RunOptions {
            enable_five_step_process: Some(true),
            ..RunOptions::default()
        },
    )
    .await;

    let err = orch.execute_process_step(3, None).await.unwrap_err();
    assert_eq!(
        err,
        AgentError::MissingPrerequisite("phase execution requires a task_clarification result".to_string())
    );
    assert!(orch.get_five_step_process_state().step_results.is_empty());

    // 按顺序补齐前三步后执行阶段可以运行
    for index in 0..4 {
        orch.execute_process_step(index, None).await.unwrap();
    }
    assert_eq!(orch.get_five_step_process_state().step_results.len(), 4);

    // 已完成阶段重复执行返回保存的结果
    let again = orch.execute_process_step(0, None).await.unwrap();
    assert!(again.content.contains("给出下一手"));
}

#[tokio::test]
async fn test_step_before_start_is_missing_prerequisite() {
    let orch = build(Arc::new(phase_llm()), Arc::new(Mutex::new(Vec::new())));
    let err = orch.execute_process_step(0, None).await.unwrap_err();
    assert!(matches!(err, AgentError::MissingPrerequisite(_)));
}

#[tokio::test]
async fn test_human_collaboration_routes_to_five_step_and_flags_tools() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let orch = build(Arc::new(phase_llm()), seen.clone());
    orch.set_human_collaboration_enabled(true);

    let outcome = orch.run("q", Value::Null, RunOptions::default()).await;
    assert!(matches!(outcome, RunOutcome::ProcessPlan(_)));

    for index in 0..4 {
        orch.execute_process_step(index, None).await.unwrap();
    }
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0]["humanCollaborationRequired"], json!(true));
    assert_eq!(seen[0]["candidates"], json!(["C4", "D4"]));
}

#[tokio::test]
async fn test_reset_five_step_process_clears_state() {
    let orch = build(Arc::new(phase_llm()), Arc::new(Mutex::new(Vec::new())));
    orch.run(
        "q",
        Value::Null,
        RunOptions {
            enable_five_step_process: Some(true),
            ..RunOptions::default()
        },
    )
    .await;
    orch.execute_process_step(0, None).await.unwrap();

    orch.reset_five_step_process();
    let state = orch.get_five_step_process_state();
    assert!(!state.is_running);
    assert!(state.step_results.is_empty());
    assert!(state.process_context.is_none());

    // 关闭默认值后回到推理循环（PhaseLlm 对推理 prompt 没有规则，应以错误结束）
    let outcome = orch
        .run(
            "q",
            Value::Null,
            RunOptions {
                enable_five_step_process: Some(false),
                ..RunOptions::default()
            },
        )
        .await;
    assert!(!matches!(outcome, RunOutcome::ProcessPlan(_)));
}

/// 规划阶段第一次调用失败，之后交给 KeywordLlm
struct FlakyPlanning {
    inner: KeywordLlm,
    failed: AtomicBool,
}

#[async_trait]
impl LlmTransport for FlakyPlanning {
    async fn complete(&self, prompt: &str, ctx: &CallContext) -> Result<LlmReply, LlmError> {
        if prompt.contains("（planning）") && !self.failed.swap(true, Ordering::SeqCst) {
            return Err(LlmError::Transport("planning call dropped".into()));
        }
        self.inner.complete(prompt, ctx).await
    }
}

#[tokio::test]
async fn test_failed_phase_can_be_retried_without_losing_results() {
    let llm = Arc::new(FlakyPlanning {
        inner: phase_llm(),
        failed: AtomicBool::new(false),
    });
    let orch = OrchestratorBuilder::new(AppConfig::default())
        .with_llm(llm)
        .with_tool(AskPlayer {
            seen: Arc::new(Mutex::new(Vec::new())),
        })
        .build();
    orch.run(
        "q",
        Value::Null,
        RunOptions {
            enable_five_step_process: Some(true),
            ..RunOptions::default()
        },
    )
    .await;
    orch.execute_process_step(0, None).await.unwrap();
    orch.execute_process_step(1, None).await.unwrap();
    let before = orch.get_five_step_process_state().step_results;

    let err = orch.execute_process_step(2, None).await.unwrap_err();
    assert!(matches!(err, AgentError::Llm(_)));
    let state = orch.get_five_step_process_state();
    assert_eq!(state.step_results, before);
    assert_eq!(state.current_step, None);
    assert!(state.is_running);

    let step = orch.execute_process_step(2, None).await.unwrap();
    assert_eq!(step.step_id, ProcessStepId::Planning);
    let state = orch.get_five_step_process_state();
    assert_eq!(state.step_results.len(), 3);
    assert_eq!(
        state.step_results[&ProcessStepId::TaskClarification],
        before[&ProcessStepId::TaskClarification]
    );
    assert_eq!(
        state.step_results[&ProcessStepId::EnvironmentPerception],
        before[&ProcessStepId::EnvironmentPerception]
    );
}
