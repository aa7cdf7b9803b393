//! LLM 层：传输抽象与实现（OpenAI 兼容 / DeepSeek / Mock）

pub mod mock;
pub mod openai;
pub mod traits;

pub use mock::{KeywordLlm, MockLlmClient, ScriptedLlm};
pub use openai::{OpenAiTransport, TokenUsage, DEEPSEEK_BASE_URL, DEEPSEEK_CHAT};
pub use traits::{LlmError, LlmReply, LlmTransport};
