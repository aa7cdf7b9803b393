//! Goban Agent - 围棋助手的智能体编排核心
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误与恢复、状态、状态监管、编排器门面
//! - **llm**: LLM 传输抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **observability**: tracing 初始化
//! - **react**: ThoughtEngine 与 think -> act -> observe 推理循环
//! - **tools**: 工具描述、注册表、调用器与结果归一化
//! - **workflow**: 五步人机协作流程

pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod react;
pub mod tools;
pub mod workflow;

pub use crate::core::{AgentOrchestrator, OrchestratorBuilder, RunOptions, RunOutcome};
pub use crate::react::Reply;
