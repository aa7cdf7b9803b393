//! 五步人机协作流程：明确任务 -> 感知环境 -> 思考规划 -> 执行行动 -> 观察迭代

pub mod engine;
pub mod phases;
pub mod types;

pub use engine::FiveStepWorkflow;
pub use types::*;
