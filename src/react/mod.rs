//! 推理层：ThoughtEngine 决策与 think -> act -> observe 主循环

pub mod loop_;
pub mod thought;

pub use loop_::{ReasoningLoop, Reply};
pub use thought::{build_thought_prompt, parse_decision, Decision, PromptInput, ThoughtEngine, LATEST_MARKER};
